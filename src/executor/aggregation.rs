//! Grouping and aggregation
//!
//! - group_rows: partition row indices by the key tuple, in first-occurrence order
//! - compute_aggregate: one bound aggregate call over one group
//! - aggregate_groups: one output row per group carrying the hidden aggregate columns

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::error::DbResult;
use crate::sql::compiler::{AggregateCall, AggregateFunction, CompiledExpression};
use crate::sql::evaluator::helpers::{compare_values, number_from_f64, to_number};
use crate::sql::evaluator::Evaluator;
use crate::storage::Row;

/// Hashable form of a grouping value. Integral floats fold onto integers
/// so `1` and `1.0` share a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Int(i64),
    Float(u64),
    Text(String),
    Other(String),
}

impl KeyPart {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => KeyPart::Null,
            Value::Bool(b) => KeyPart::Int(*b as i64),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return KeyPart::Int(i);
                }
                let f = n.as_f64().unwrap_or(0.0);
                if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    KeyPart::Int(f as i64)
                } else {
                    KeyPart::Float(f.to_bits())
                }
            }
            Value::String(s) => KeyPart::Text(s.clone()),
            other => KeyPart::Other(other.to_string()),
        }
    }
}

/// Partition row indices by the value tuple of `keys`. Groups come out in
/// the order their first row appears.
pub(crate) fn group_rows(
    evaluator: &Evaluator<'_>,
    rows: &[Row],
    keys: &[CompiledExpression],
) -> DbResult<Vec<Vec<usize>>> {
    let mut index: HashMap<Vec<KeyPart>, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let mut key = Vec::with_capacity(keys.len());
        for expr in keys {
            key.push(KeyPart::from_value(&evaluator.evaluate(expr, row)?));
        }
        match index.get(&key) {
            Some(&g) => groups[g].push(i),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![i]);
            }
        }
    }
    Ok(groups)
}

/// Truncate (not round) to `scale` decimals. Values too large to scale are
/// returned as is.
fn truncate(value: f64, scale: u32) -> f64 {
    let factor = 10f64.powi(scale as i32);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.trunc() / factor
}

enum Sum {
    Int(i64),
    Float(f64),
}

impl Sum {
    fn add(self, n: &serde_json::Number) -> Self {
        match (self, n.as_i64()) {
            (Sum::Int(acc), Some(i)) => match acc.checked_add(i) {
                Some(s) => Sum::Int(s),
                None => Sum::Float(acc as f64 + i as f64),
            },
            (Sum::Int(acc), None) => Sum::Float(acc as f64 + n.as_f64().unwrap_or(0.0)),
            (Sum::Float(acc), _) => Sum::Float(acc + n.as_f64().unwrap_or(0.0)),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Sum::Int(i) => *i as f64,
            Sum::Float(f) => *f,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Sum::Int(i) => Value::from(i),
            Sum::Float(f) => Value::Number(number_from_f64(f)),
        }
    }
}

/// Evaluate one aggregate call over the rows of a group. NULL arguments are
/// skipped; `COUNT(*)` counts every row.
pub(crate) fn compute_aggregate(
    evaluator: &Evaluator<'_>,
    call: &AggregateCall,
    argument: Option<&CompiledExpression>,
    rows: &[&Row],
    avg_scale: u32,
) -> DbResult<Value> {
    let Some(argument) = argument else {
        return Ok(Value::from(rows.len()));
    };

    let mut values = Vec::with_capacity(rows.len());
    let mut seen = HashSet::new();
    for row in rows {
        let value = evaluator.evaluate(argument, row)?;
        if value.is_null() {
            continue;
        }
        if call.distinct && !seen.insert(KeyPart::from_value(&value)) {
            continue;
        }
        values.push(value);
    }

    Ok(match call.function {
        AggregateFunction::Count => Value::from(values.len()),
        AggregateFunction::Sum | AggregateFunction::Avg => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let mut sum = Sum::Int(0);
            for value in &values {
                if let Some(n) = to_number(value) {
                    sum = sum.add(&n);
                }
            }
            if call.function == AggregateFunction::Sum {
                sum.into_value()
            } else {
                let avg = truncate(sum.as_f64() / values.len() as f64, avg_scale);
                Value::Number(number_from_f64(avg))
            }
        }
        AggregateFunction::Min | AggregateFunction::Max => {
            let want = if call.function == AggregateFunction::Min {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            };
            let mut best: Option<Value> = None;
            for value in values {
                best = match best {
                    Some(current) if compare_values(&value, &current) != Some(want) => {
                        Some(current)
                    }
                    _ => Some(value),
                };
            }
            best.unwrap_or(Value::Null)
        }
    })
}

/// Aggregate a single row without building an accumulator.
fn single_row_aggregate(
    evaluator: &Evaluator<'_>,
    call: &AggregateCall,
    argument: Option<&CompiledExpression>,
    row: &Row,
    avg_scale: u32,
) -> DbResult<Value> {
    let Some(argument) = argument else {
        return Ok(Value::from(1));
    };
    let value = evaluator.evaluate(argument, row)?;
    Ok(match (call.function, value) {
        (AggregateFunction::Count, v) => Value::from(!v.is_null() as u64),
        (_, Value::Null) => Value::Null,
        (AggregateFunction::Sum, v) => match to_number(&v) {
            Some(n) => Value::Number(n),
            None => Value::from(0),
        },
        (AggregateFunction::Avg, v) => {
            let f = to_number(&v).and_then(|n| n.as_f64()).unwrap_or(0.0);
            Value::Number(number_from_f64(truncate(f, avg_scale)))
        }
        (AggregateFunction::Min | AggregateFunction::Max, v) => v,
    })
}

/// One row per group: a copy of the group's first row (an empty row for an
/// empty input) plus one hidden column per aggregate call.
pub(crate) fn aggregate_groups(
    evaluator: &Evaluator<'_>,
    rows: &[Row],
    groups: &[Vec<usize>],
    calls: &[(AggregateCall, Option<CompiledExpression>)],
    avg_scale: u32,
) -> DbResult<Vec<Row>> {
    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let mut group_row = group
            .first()
            .map(|&i| rows[i].clone())
            .unwrap_or_default();
        for (call, argument) in calls {
            let value = if let [only] = group.as_slice() {
                single_row_aggregate(evaluator, call, argument.as_ref(), &rows[*only], avg_scale)?
            } else {
                let members: Vec<&Row> = group.iter().map(|&i| &rows[i]).collect();
                compute_aggregate(evaluator, call, argument.as_ref(), &members, avg_scale)?
            };
            group_row.insert(call.key.clone(), value);
        }
        out.push(group_row);
    }
    tracing::debug!("Aggregated {} rows into {} groups", rows.len(), out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ast::Expr;
    use crate::sql::compiler::{ExpressionCompiler, SchemaContext, ScopeTable};
    use serde_json::json;

    fn scope() -> SchemaContext {
        SchemaContext::from_tables(vec![ScopeTable::new(
            "t",
            None,
            vec!["k".into(), "v".into()],
        )])
    }

    fn rows() -> Vec<Row> {
        [
            json!({"k": "a", "v": 1}),
            json!({"k": "a", "v": 2}),
            json!({"k": "b", "v": 5}),
            json!({"k": "a", "v": null}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
    }

    fn compile(sql: &str) -> CompiledExpression {
        let scope = scope();
        ExpressionCompiler::new(&scope).compile(sql).unwrap()
    }

    fn call(function: AggregateFunction, distinct: bool) -> AggregateCall {
        AggregateCall {
            key: "#agg0".into(),
            function,
            argument: Some(Expr::Column("v".into())),
            distinct,
        }
    }

    #[test]
    fn test_truncate_keeps_huge_values() {
        assert_eq!(truncate(2.666_666, 4), 2.6666);
        assert_eq!(truncate(-2.666_666, 4), -2.6666);
        assert_eq!(truncate(1e306, 12), 1e306);
        assert_eq!(truncate(f64::MAX, 4), f64::MAX);
    }

    #[test]
    fn test_groups_in_first_occurrence_order() {
        let rows = rows();
        let groups = group_rows(&Evaluator::default(), &rows, &[compile("k")]).unwrap();
        assert_eq!(groups, vec![vec![0, 1, 3], vec![2]]);
    }

    #[test]
    fn test_integral_float_keys_share_group() {
        let rows: Vec<Row> = [json!({"k": 1}), json!({"k": 1.0}), json!({"k": "1"})]
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        let groups = group_rows(&Evaluator::default(), &rows, &[compile("k")]).unwrap();
        assert_eq!(groups, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_nulls_are_skipped() {
        let rows = rows();
        let members: Vec<&Row> = rows.iter().collect();
        let arg = compile("v");
        let eval = Evaluator::default();
        let run = |f| compute_aggregate(&eval, &call(f, false), Some(&arg), &members, 4).unwrap();
        assert_eq!(run(AggregateFunction::Count), json!(3));
        assert_eq!(run(AggregateFunction::Sum), json!(8));
        assert_eq!(run(AggregateFunction::Min), json!(1));
        assert_eq!(run(AggregateFunction::Max), json!(5));
        assert_eq!(run(AggregateFunction::Avg), json!(2.6666));
        let star = AggregateCall {
            argument: None,
            ..call(AggregateFunction::Count, false)
        };
        assert_eq!(
            compute_aggregate(&eval, &star, None, &members, 4).unwrap(),
            json!(4)
        );
    }

    #[test]
    fn test_distinct_and_empty() {
        let rows = rows();
        let members: Vec<&Row> = rows.iter().take(2).chain(rows.iter().take(2)).collect();
        let arg = compile("v");
        let eval = Evaluator::default();
        let sum = compute_aggregate(&eval, &call(AggregateFunction::Sum, true), Some(&arg), &members, 4);
        assert_eq!(sum.unwrap(), json!(3));
        let empty = compute_aggregate(&eval, &call(AggregateFunction::Sum, false), Some(&arg), &[], 4);
        assert_eq!(empty.unwrap(), json!(null));
    }

    #[test]
    fn test_singleton_group_matches_full_scan() {
        let rows = rows();
        let arg = compile("v");
        let eval = Evaluator::default();
        for function in [
            AggregateFunction::Count,
            AggregateFunction::Sum,
            AggregateFunction::Avg,
            AggregateFunction::Min,
            AggregateFunction::Max,
        ] {
            for row in &rows {
                let c = call(function, false);
                let fast = single_row_aggregate(&eval, &c, Some(&arg), row, 4).unwrap();
                let slow = compute_aggregate(&eval, &c, Some(&arg), &[row], 4).unwrap();
                assert_eq!(fast, slow, "{:?} over {:?}", function, row);
            }
        }
    }

    #[test]
    fn test_aggregate_groups_keeps_first_row() {
        let rows = rows();
        let groups = vec![vec![0, 1, 3], vec![2]];
        let calls = vec![(call(AggregateFunction::Sum, false), Some(compile("v")))];
        let out = aggregate_groups(&Evaluator::default(), &rows, &groups, &calls, 4).unwrap();
        assert_eq!(out[0]["v"], json!(1));
        assert_eq!(out[0]["#agg0"], json!(3));
        assert_eq!(out[1]["#agg0"], json!(5));
    }
}
