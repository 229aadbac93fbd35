//! UNION / INTERSECT / EXCEPT
//!
//! Rows compare positionally with null-safe equality. The result keeps the
//! left operand's column names.

use serde_json::Value;

use super::ResultSet;
use crate::error::{DbError, DbResult};
use crate::sql::clauses::SetOperator;
use crate::sql::evaluator::helpers::values_equal;

/// Positional row equality
pub(crate) fn rows_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

/// Drop repeated rows, keeping the first occurrence.
pub(crate) fn dedup_rows(rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let mut out: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
    for row in rows {
        if !out.iter().any(|kept| rows_equal(kept, &row)) {
            out.push(row);
        }
    }
    out
}

/// Combine two operands. Without ALL the result is deduplicated.
pub fn combine(
    left: ResultSet,
    op: SetOperator,
    all: bool,
    right: ResultSet,
) -> DbResult<ResultSet> {
    if left.columns.len() != right.columns.len() {
        return Err(DbError::semantic(format!(
            "The used SELECT statements have a different number of columns ({} vs {})",
            left.columns.len(),
            right.columns.len()
        )));
    }

    let ResultSet { columns, rows } = left;
    let rows = match op {
        SetOperator::Union => {
            let mut rows = rows;
            rows.extend(right.rows);
            rows
        }
        SetOperator::Intersect => rows
            .into_iter()
            .filter(|l| right.rows.iter().any(|r| rows_equal(l, r)))
            .collect(),
        SetOperator::Except => rows
            .into_iter()
            .filter(|l| !right.rows.iter().any(|r| rows_equal(l, r)))
            .collect(),
    };
    let rows = if all { rows } else { dedup_rows(rows) };

    tracing::debug!("{:?} (all: {}) produced {} rows", op, all, rows.len());
    Ok(ResultSet::new(columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rs(column: &str, values: &[Value]) -> ResultSet {
        ResultSet::new(
            vec![column.to_string()],
            values.iter().map(|v| vec![v.clone()]).collect(),
        )
    }

    #[test]
    fn test_union_dedups_union_all_keeps() {
        let one = || rs("a", &[json!(1)]);
        let u = combine(one(), SetOperator::Union, false, one()).unwrap();
        assert_eq!(u.rows, vec![vec![json!(1)]]);
        let ua = combine(one(), SetOperator::Union, true, one()).unwrap();
        assert_eq!(ua.len(), 2);
    }

    #[test]
    fn test_result_uses_left_names() {
        let out = combine(
            rs("a", &[json!(1)]),
            SetOperator::Union,
            false,
            rs("b", &[json!(2)]),
        )
        .unwrap();
        assert_eq!(out.columns, vec!["a".to_string()]);
        assert_eq!(out.rows, vec![vec![json!(1)], vec![json!(2)]]);
    }

    #[test]
    fn test_intersect_and_except() {
        let left = || rs("a", &[json!(1), json!(2), json!(2), json!(null)]);
        let right = || rs("a", &[json!(2), json!(3), json!(null)]);
        let i = combine(left(), SetOperator::Intersect, false, right()).unwrap();
        assert_eq!(i.rows, vec![vec![json!(2)], vec![json!(null)]]);
        let ia = combine(left(), SetOperator::Intersect, true, right()).unwrap();
        assert_eq!(ia.len(), 3);
        // A left row survives EXCEPT only when nothing on the right matches it
        let e = combine(left(), SetOperator::Except, false, right()).unwrap();
        assert_eq!(e.rows, vec![vec![json!(1)]]);
    }

    #[test]
    fn test_column_count_mismatch() {
        let two = ResultSet::new(vec!["a".into(), "b".into()], vec![]);
        for op in [SetOperator::Union, SetOperator::Intersect, SetOperator::Except] {
            for all in [false, true] {
                let err = combine(rs("a", &[]), op, all, two.clone()).unwrap_err();
                assert!(matches!(err, DbError::SemanticError(_)));
            }
        }
    }
}
