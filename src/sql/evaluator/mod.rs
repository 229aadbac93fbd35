//! Safe evaluator
//!
//! Walks a compiled expression tree against one row. Every runtime fault
//! (undefined function, failed coercion, division by zero) comes back as a
//! [`DbError`]; nothing here panics on user data.

pub mod builtins;
pub mod helpers;

use serde_json::Value;

use self::helpers::{evaluate_binary_op, evaluate_unary_op, to_bool, to_text};
use super::ast::{BinaryOperator, Expr};
use super::compiler::CompiledExpression;
use super::like::{self, LikeMatcher};
use crate::error::DbResult;
use crate::storage::Row;

#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    like: &'a LikeMatcher,
}

impl Default for Evaluator<'static> {
    fn default() -> Self {
        Self {
            like: LikeMatcher::shared(),
        }
    }
}

impl<'a> Evaluator<'a> {
    pub fn new(like: &'a LikeMatcher) -> Self {
        Self { like }
    }

    /// Evaluate against a row. Missing keys read as NULL, unless the
    /// expression carries a presence probe, in which case any missing key
    /// makes the whole expression NULL.
    pub fn evaluate(&self, compiled: &CompiledExpression, row: &Row) -> DbResult<Value> {
        if compiled.has_presence_probe()
            && compiled.columns().iter().any(|key| lookup(row, key).is_none())
        {
            return Ok(Value::Null);
        }
        self.eval(compiled.expr(), row)
    }

    pub fn evaluate_bool(&self, compiled: &CompiledExpression, row: &Row) -> DbResult<bool> {
        Ok(to_bool(&self.evaluate(compiled, row)?))
    }

    /// Dry run against an empty row, keeping only the error.
    pub fn check(&self, compiled: &CompiledExpression) -> DbResult<()> {
        self.eval(compiled.expr(), &Row::new()).map(|_| ())
    }

    fn eval(&self, expr: &Expr, row: &Row) -> DbResult<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(key) => Ok(lookup(row, key).cloned().unwrap_or(Value::Null)),
            Expr::Unary(op, inner) => {
                let value = self.eval(inner, row)?;
                evaluate_unary_op(*op, &value)
            }
            Expr::Binary(left, BinaryOperator::And, right) => {
                if !to_bool(&self.eval(left, row)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(to_bool(&self.eval(right, row)?)))
            }
            Expr::Binary(left, BinaryOperator::Or, right) => {
                if to_bool(&self.eval(left, row)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(to_bool(&self.eval(right, row)?)))
            }
            Expr::Binary(left, op, right) => {
                let l = self.eval(left, row)?;
                let r = self.eval(right, row)?;
                evaluate_binary_op(&l, *op, &r)
            }
            Expr::Ternary(cond, then, otherwise) => {
                if to_bool(&self.eval(cond, row)?) {
                    self.eval(then, row)
                } else {
                    self.eval(otherwise, row)
                }
            }
            Expr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a, row))
                    .collect::<DbResult<Vec<_>>>()?;
                self.call(name, &values)
            }
        }
    }

    fn call(&self, name: &str, args: &[Value]) -> DbResult<Value> {
        match name {
            "LIKE" => {
                let (Some(subject), Some(pattern)) = (
                    args.first().and_then(to_text),
                    args.get(1).and_then(to_text),
                ) else {
                    return Ok(Value::Null);
                };
                let escape = match args.get(2).and_then(to_text) {
                    Some(e) => like::escape_char(&e)?,
                    None => like::DEFAULT_ESCAPE,
                };
                Ok(Value::Bool(self.like.is_match(&subject, &pattern, escape)?))
            }
            "REGEXP" => {
                let (Some(subject), Some(pattern)) = (
                    args.first().and_then(to_text),
                    args.get(1).and_then(to_text),
                ) else {
                    return Ok(Value::Null);
                };
                let re = self.like.regexp(&pattern)?;
                Ok(Value::Bool(re.is_match(&subject)))
            }
            _ => builtins::call(name, args),
        }
    }
}

/// Exact key first, then a case-insensitive match.
fn lookup<'r>(row: &'r Row, key: &str) -> Option<&'r Value> {
    row.get(key).or_else(|| {
        row.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::sql::compiler::{CompileMode, ExpressionCompiler, SchemaContext};
    use crate::storage::{ColumnDescriptor, ColumnType, TableSchema};
    use serde_json::json;

    fn scope() -> SchemaContext {
        SchemaContext::single(&TableSchema::new(
            "t",
            vec![
                ColumnDescriptor::new("a", ColumnType::Integer),
                ColumnDescriptor::new("s", ColumnType::Text),
            ],
        ))
    }

    fn row(a: Value, s: Value) -> Row {
        let mut r = Row::new();
        r.insert("a".into(), a);
        r.insert("s".into(), s);
        r
    }

    fn eval(sql: &str, r: &Row) -> DbResult<Value> {
        let scope = scope();
        let compiled = ExpressionCompiler::new(&scope).compile(sql)?;
        Evaluator::default().evaluate(&compiled, r)
    }

    #[test]
    fn test_predicates() {
        let r = row(json!(5), json!("axxxbyc"));
        assert_eq!(eval("a BETWEEN 1 AND 5", &r).unwrap(), json!(true));
        assert_eq!(eval("a NOT BETWEEN 1 AND 5", &r).unwrap(), json!(false));
        assert_eq!(eval("a IN (1, 5)", &r).unwrap(), json!(true));
        assert_eq!(eval("s LIKE 'a%b_c'", &r).unwrap(), json!(true));
        assert_eq!(eval("s LIKE 'A%B_C'", &r).unwrap(), json!(true));
        let r = row(json!(5), json!("axxxbc"));
        assert_eq!(eval("s LIKE 'a%b_c'", &r).unwrap(), json!(false));
    }

    #[test]
    fn test_case_and_null() {
        let r = row(json!(null), json!("x"));
        assert_eq!(eval("a IS NULL", &r).unwrap(), json!(true));
        assert_eq!(eval("a > 1", &r).unwrap(), json!(false));
        assert_eq!(eval("CASE WHEN a IS NULL THEN 'none' ELSE 'some' END", &r).unwrap(), json!("none"));
        assert_eq!(eval("CASE WHEN a > 0 THEN 'pos' END", &r).unwrap(), json!(null));
    }

    #[test]
    fn test_short_circuit_skips_fault() {
        let r = row(json!(0), json!("x"));
        assert_eq!(eval("a <> 0 AND 10 / a > 1", &r).unwrap(), json!(false));
        assert!(eval("10 / a > 1", &r).is_err());
    }

    #[test]
    fn test_missing_column_reads_null() {
        let r = Row::new();
        assert_eq!(eval("a IS NULL", &r).unwrap(), json!(true));
    }

    #[test]
    fn test_presence_probe() {
        let scope = scope();
        let compiled = ExpressionCompiler::new(&scope)
            .mode(CompileMode::Permissive)
            .compile("a IS NULL")
            .unwrap();
        let evaluator = Evaluator::default();
        assert_eq!(evaluator.evaluate(&compiled, &Row::new()).unwrap(), json!(null));
        let r = row(json!(null), json!("x"));
        assert_eq!(evaluator.evaluate(&compiled, &r).unwrap(), json!(true));
    }

    #[test]
    fn test_check_only_reports_faults() {
        let scope = SchemaContext::empty();
        let evaluator = Evaluator::default();
        let ok = ExpressionCompiler::new(&scope).compile("1 + 2").unwrap();
        assert!(evaluator.check(&ok).is_ok());
        let bad = ExpressionCompiler::new(&scope).compile("CAST('x' AS INTEGER)").unwrap();
        assert!(matches!(evaluator.check(&bad), Err(DbError::EvaluationError(_))));
    }

    #[test]
    fn test_builtins_through_evaluator() {
        let r = row(json!(3), json!("  Hi  "));
        assert_eq!(eval("UPPER(TRIM(s))", &r).unwrap(), json!("HI"));
        assert_eq!(eval("COALESCE(NULL, a * 2)", &r).unwrap(), json!(6));
        assert_eq!(eval("SUBSTRING('hello' FROM 2 FOR 2)", &r).unwrap(), json!("el"));
    }
}
