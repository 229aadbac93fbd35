//! Value helpers shared by the evaluator and the executors.
//!
//! - values_equal: null-safe equality with numeric coercion
//! - compare_values: ordering for comparisons, `None` when either side is null
//! - sort_order: total order for ORDER BY, ranked by type, nulls first
//! - to_bool / to_number / to_text: scalar coercions
//! - evaluate_binary_op / evaluate_unary_op: arithmetic and comparison

use std::cmp::Ordering;

use serde_json::{Number, Value};

use crate::error::{DbError, DbResult};
use crate::sql::ast::{BinaryOperator, UnaryOperator};

/// Convert f64 to a JSON number, 0 for NaN/Infinity.
pub fn number_from_f64(f: f64) -> Number {
    Number::from_f64(f).unwrap_or_else(|| Number::from(0))
}

#[inline]
pub fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(f) => f != 0.0,
            Err(_) => !s.is_empty(),
        },
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Numeric view of a value: numbers, booleans and numeric strings.
pub fn to_number(value: &Value) -> Option<Number> {
    match value {
        Value::Number(n) => Some(n.clone()),
        Value::Bool(b) => Some(Number::from(*b as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                Some(Number::from(i))
            } else {
                trimmed.parse::<f64>().ok().and_then(Number::from_f64)
            }
        }
        _ => None,
    }
}

/// Text view of a value; `None` for NULL.
pub fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        other => Some(other.to_string()),
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => a.as_f64() == b.as_f64(),
    }
}

/// Null-safe equality: NULL equals only NULL.
#[inline]
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Number(_), _) | (_, Value::Number(_)) | (Value::Bool(_), _) | (_, Value::Bool(_)) => {
            match (to_number(left), to_number(right)) {
                (Some(a), Some(b)) => numbers_equal(&a, &b),
                _ => false,
            }
        }
        _ => left == right,
    }
}

/// Ordering used by `<`, `<=`, `>`, `>=`; `None` when either side is null.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => match (x.as_i64(), y.as_i64()) {
                (Some(i), Some(j)) => Some(i.cmp(&j)),
                _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
            },
            _ => Some(to_text(a)?.cmp(&to_text(b)?)),
        },
    }
}

/// Sort rank of a value's type: null < bool < number < string < array < object
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Numbers ordered by f64 value; on a tie floats come before integers and
/// integers compare exactly.
fn number_order(a: &Number, b: &Number) -> Ordering {
    let exact = |n: &Number| n.as_i64().map(i128::from).or_else(|| n.as_u64().map(i128::from));
    let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
    x.total_cmp(&y).then_with(|| match (exact(a), exact(b)) {
        (Some(i), Some(j)) => i.cmp(&j),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    })
}

/// Total order for ORDER BY. Values are ranked by type
/// first, so numeric strings sort with strings, not with numbers.
pub fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => number_order(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn arithmetic_operand(value: &Value, op: BinaryOperator) -> DbResult<Number> {
    to_number(value).ok_or_else(|| {
        DbError::eval(format!(
            "Cannot apply '{}' to non-numeric value {}",
            op.symbol(),
            value
        ))
    })
}

fn integer_op(a: i64, b: i64, op: BinaryOperator) -> Option<i64> {
    match op {
        BinaryOperator::Add => a.checked_add(b),
        BinaryOperator::Subtract => a.checked_sub(b),
        BinaryOperator::Multiply => a.checked_mul(b),
        BinaryOperator::Modulus => a.checked_rem(b),
        _ => None,
    }
}

fn arithmetic(left: &Value, op: BinaryOperator, right: &Value) -> DbResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    if op == BinaryOperator::Add {
        if let (Value::String(a), Value::String(b)) = (left, right) {
            if to_number(left).is_none() || to_number(right).is_none() {
                return Ok(Value::String(format!("{}{}", a, b)));
            }
        }
    }

    let a = arithmetic_operand(left, op)?;
    let b = arithmetic_operand(right, op)?;

    if matches!(op, BinaryOperator::Divide | BinaryOperator::Modulus)
        && b.as_f64().unwrap_or(0.0) == 0.0
    {
        return Err(DbError::eval("Division by zero"));
    }

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(result) = integer_op(x, y, op) {
            return Ok(Value::from(result));
        }
    }

    let x = a.as_f64().unwrap_or(0.0);
    let y = b.as_f64().unwrap_or(0.0);
    let result = match op {
        BinaryOperator::Add => x + y,
        BinaryOperator::Subtract => x - y,
        BinaryOperator::Multiply => x * y,
        BinaryOperator::Divide => x / y,
        BinaryOperator::Modulus => x % y,
        _ => return Err(DbError::eval(format!("'{}' is not arithmetic", op.symbol()))),
    };
    Ok(Value::Number(number_from_f64(result)))
}

/// Non-short-circuit binary operators. `&&` and `||` are handled by the
/// evaluator so the right side is only computed when needed.
#[inline]
pub fn evaluate_binary_op(left: &Value, op: BinaryOperator, right: &Value) -> DbResult<Value> {
    match op {
        BinaryOperator::Equal => Ok(Value::Bool(values_equal(left, right))),
        BinaryOperator::NotEqual => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOperator::LessThan => Ok(Value::Bool(
            compare_values(left, right) == Some(Ordering::Less),
        )),
        BinaryOperator::LessThanOrEqual => Ok(Value::Bool(matches!(
            compare_values(left, right),
            Some(Ordering::Less | Ordering::Equal)
        ))),
        BinaryOperator::GreaterThan => Ok(Value::Bool(
            compare_values(left, right) == Some(Ordering::Greater),
        )),
        BinaryOperator::GreaterThanOrEqual => Ok(Value::Bool(matches!(
            compare_values(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ))),
        BinaryOperator::And => Ok(Value::Bool(to_bool(left) && to_bool(right))),
        BinaryOperator::Or => Ok(Value::Bool(to_bool(left) || to_bool(right))),
        BinaryOperator::Add
        | BinaryOperator::Subtract
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Modulus => arithmetic(left, op, right),
    }
}

#[inline]
pub fn evaluate_unary_op(op: UnaryOperator, operand: &Value) -> DbResult<Value> {
    match op {
        UnaryOperator::Not => Ok(Value::Bool(!to_bool(operand))),
        UnaryOperator::Negate => {
            if operand.is_null() {
                return Ok(Value::Null);
            }
            let n = to_number(operand).ok_or_else(|| {
                DbError::eval(format!("Cannot negate non-numeric value {}", operand))
            })?;
            match n.as_i64().and_then(|i| i.checked_neg()) {
                Some(i) => Ok(Value::from(i)),
                None => Ok(Value::Number(number_from_f64(-n.as_f64().unwrap_or(0.0)))),
            }
        }
    }
}
