//! Scalar SQL functions

use std::cmp::Ordering;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde_json::Value;

use super::helpers::{compare_values, number_from_f64, to_number, to_text};
use crate::error::{DbError, DbResult};
use crate::storage::ColumnType;

/// Name, minimum and maximum argument count (`None` = unbounded)
const FUNCTIONS: &[(&str, usize, Option<usize>)] = &[
    ("UPPER", 1, Some(1)),
    ("LOWER", 1, Some(1)),
    ("LENGTH", 1, Some(1)),
    ("CONCAT", 1, None),
    ("CONCAT_WS", 2, None),
    ("COALESCE", 1, None),
    ("IFNULL", 2, Some(2)),
    ("NULLIF", 2, Some(2)),
    ("ABS", 1, Some(1)),
    ("ROUND", 1, Some(2)),
    ("FLOOR", 1, Some(1)),
    ("CEIL", 1, Some(1)),
    ("MOD", 2, Some(2)),
    ("POWER", 2, Some(2)),
    ("SQRT", 1, Some(1)),
    ("SIGN", 1, Some(1)),
    ("SUBSTRING", 2, Some(3)),
    ("TRIM", 1, Some(3)),
    ("LTRIM", 1, Some(1)),
    ("RTRIM", 1, Some(1)),
    ("POSITION", 2, Some(2)),
    ("REPLACE", 3, Some(3)),
    ("REVERSE", 1, Some(1)),
    ("LEFT", 2, Some(2)),
    ("RIGHT", 2, Some(2)),
    ("LEAST", 1, None),
    ("GREATEST", 1, None),
    ("CAST", 2, Some(2)),
    ("CONVERT", 1, Some(1)),
    ("TRANSLATE", 3, Some(3)),
    ("EXTRACT", 2, Some(2)),
    ("NOW", 0, Some(0)),
    ("CURDATE", 0, Some(0)),
    ("CURTIME", 0, Some(0)),
    ("LIKE", 2, Some(3)),
    ("REGEXP", 2, Some(2)),
];

const EXTRACT_UNITS: &[&str] = &[
    "YEAR", "QUARTER", "MONTH", "WEEK", "DAY", "HOUR", "MINUTE", "SECOND",
];

pub fn is_builtin(name: &str) -> bool {
    FUNCTIONS.iter().any(|(n, _, _)| *n == name)
}

pub fn is_extract_unit(unit: &str) -> bool {
    EXTRACT_UNITS.contains(&unit)
}

pub fn check_arity(name: &str, count: usize) -> DbResult<()> {
    let Some((_, min, max)) = FUNCTIONS.iter().find(|(n, _, _)| *n == name) else {
        return Err(DbError::semantic(format!("Unknown function {}", name)));
    };
    let too_many = max.is_some_and(|m| count > m);
    if count < *min || too_many {
        let expected = match max {
            Some(m) if m == min => format!("{}", min),
            Some(m) => format!("{} to {}", min, m),
            None => format!("at least {}", min),
        };
        return Err(DbError::semantic(format!(
            "{} expects {} argument(s), got {}",
            name, expected, count
        )));
    }
    Ok(())
}

fn text_arg(args: &[Value], i: usize) -> Option<String> {
    args.get(i).and_then(to_text)
}

fn int_arg(name: &str, args: &[Value], i: usize) -> DbResult<Option<i64>> {
    match args.get(i) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => to_number(v)
            .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)))
            .map(Some)
            .ok_or_else(|| {
                DbError::eval(format!("{} expects a numeric argument, got {}", name, v))
            }),
    }
}

fn float_arg(name: &str, value: &Value) -> DbResult<f64> {
    to_number(value)
        .and_then(|n| n.as_f64())
        .ok_or_else(|| DbError::eval(format!("{} expects a numeric argument, got {}", name, value)))
}

/// Unary numeric function that keeps integers integral.
fn numeric_map(
    name: &str,
    value: &Value,
    int_op: fn(i64) -> Option<i64>,
    float_op: fn(f64) -> f64,
) -> DbResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let n = to_number(value).ok_or_else(|| {
        DbError::eval(format!("{} expects a numeric argument, got {}", name, value))
    })?;
    if let Some(result) = n.as_i64().and_then(int_op) {
        return Ok(Value::from(result));
    }
    let f = float_op(n.as_f64().unwrap_or(0.0));
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        return Ok(Value::from(f as i64));
    }
    Ok(Value::Number(number_from_f64(f)))
}

fn string_map(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match to_text(value) {
        Some(s) => Value::String(f(&s)),
        None => Value::Null,
    }
}

/// Evaluate a scalar function over already evaluated arguments.
pub fn call(name: &str, args: &[Value]) -> DbResult<Value> {
    check_arity(name, args.len())?;
    let first = args.first().unwrap_or(&Value::Null);

    match name {
        "UPPER" => Ok(string_map(first, |s| s.to_uppercase())),
        "LOWER" => Ok(string_map(first, |s| s.to_lowercase())),
        "LENGTH" => Ok(to_text(first)
            .map(|s| Value::from(s.chars().count() as i64))
            .unwrap_or(Value::Null)),
        "REVERSE" => Ok(string_map(first, |s| s.chars().rev().collect())),
        "LTRIM" => Ok(string_map(first, |s| s.trim_start().to_string())),
        "RTRIM" => Ok(string_map(first, |s| s.trim_end().to_string())),

        "CONCAT" => {
            let mut out = String::new();
            for arg in args {
                match to_text(arg) {
                    Some(s) => out.push_str(&s),
                    None => return Ok(Value::Null),
                }
            }
            Ok(Value::String(out))
        }
        "CONCAT_WS" => {
            let Some(sep) = to_text(first) else {
                return Ok(Value::Null);
            };
            let parts: Vec<String> = args[1..].iter().filter_map(to_text).collect();
            Ok(Value::String(parts.join(&sep)))
        }

        "COALESCE" | "IFNULL" => Ok(args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null)),
        "NULLIF" => {
            if super::helpers::values_equal(&args[0], &args[1]) {
                Ok(Value::Null)
            } else {
                Ok(args[0].clone())
            }
        }
        "LEAST" | "GREATEST" => {
            if args.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let pick = args.iter().reduce(|best, v| {
                let ord = compare_values(v, best);
                let better = if name == "LEAST" {
                    ord == Some(Ordering::Less)
                } else {
                    ord == Some(Ordering::Greater)
                };
                if better {
                    v
                } else {
                    best
                }
            });
            Ok(pick.cloned().unwrap_or(Value::Null))
        }

        "ABS" => numeric_map(name, first, |i| i.checked_abs(), f64::abs),
        "FLOOR" => numeric_map(name, first, Some, f64::floor),
        "CEIL" => numeric_map(name, first, Some, f64::ceil),
        "SIGN" => numeric_map(name, first, |i| Some(i.signum()), f64::signum),
        "SQRT" => {
            if first.is_null() {
                return Ok(Value::Null);
            }
            let f = float_arg(name, first)?;
            if f < 0.0 {
                return Ok(Value::Null);
            }
            Ok(Value::Number(number_from_f64(f.sqrt())))
        }
        "ROUND" => round(args),
        "MOD" => super::helpers::evaluate_binary_op(
            &args[0],
            crate::sql::ast::BinaryOperator::Modulus,
            &args[1],
        ),
        "POWER" => {
            if args.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let base = float_arg(name, &args[0])?;
            let exp = float_arg(name, &args[1])?;
            Ok(Value::Number(number_from_f64(base.powf(exp))))
        }

        "SUBSTRING" => substring(args),
        "TRIM" => trim(args),
        "POSITION" => {
            let (Some(needle), Some(hay)) = (text_arg(args, 0), text_arg(args, 1)) else {
                return Ok(Value::Null);
            };
            Ok(Value::from(match hay.find(&needle) {
                Some(byte) => hay[..byte].chars().count() as i64 + 1,
                None => 0,
            }))
        }
        "REPLACE" => {
            let (Some(s), Some(from), Some(to)) =
                (text_arg(args, 0), text_arg(args, 1), text_arg(args, 2))
            else {
                return Ok(Value::Null);
            };
            if from.is_empty() {
                return Ok(Value::String(s));
            }
            Ok(Value::String(s.replace(&from, &to)))
        }
        "LEFT" | "RIGHT" => {
            let Some(s) = text_arg(args, 0) else {
                return Ok(Value::Null);
            };
            let Some(n) = int_arg(name, args, 1)? else {
                return Ok(Value::Null);
            };
            let n = n.max(0) as usize;
            let chars: Vec<char> = s.chars().collect();
            let taken: String = if name == "LEFT" {
                chars.iter().take(n).collect()
            } else {
                chars[chars.len().saturating_sub(n)..].iter().collect()
            };
            Ok(Value::String(taken))
        }
        "TRANSLATE" => {
            let (Some(s), Some(from), Some(to)) =
                (text_arg(args, 0), text_arg(args, 1), text_arg(args, 2))
            else {
                return Ok(Value::Null);
            };
            let from: Vec<char> = from.chars().collect();
            let to: Vec<char> = to.chars().collect();
            let out = s
                .chars()
                .filter_map(|c| match from.iter().position(|f| *f == c) {
                    Some(i) => to.get(i).copied(),
                    None => Some(c),
                })
                .collect();
            Ok(Value::String(out))
        }

        "CAST" => cast(&args[0], &text_arg(args, 1).unwrap_or_default()),
        "CONVERT" => Ok(to_text(first).map(Value::String).unwrap_or(Value::Null)),

        "EXTRACT" => extract(&text_arg(args, 0).unwrap_or_default(), &args[1]),
        "NOW" => Ok(Value::String(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string())),
        "CURDATE" => Ok(Value::String(Utc::now().format("%Y-%m-%d").to_string())),
        "CURTIME" => Ok(Value::String(Utc::now().format("%H:%M:%S").to_string())),

        other => Err(DbError::eval(format!("Undefined function {}", other))),
    }
}

fn round(args: &[Value]) -> DbResult<Value> {
    let value = &args[0];
    if value.is_null() {
        return Ok(Value::Null);
    }
    let places = int_arg("ROUND", args, 1)?.unwrap_or(0);
    let n = to_number(value)
        .ok_or_else(|| DbError::eval(format!("ROUND expects a numeric argument, got {}", value)))?;
    if let (Some(i), true) = (n.as_i64(), places >= 0) {
        return Ok(Value::from(i));
    }
    let f = n.as_f64().unwrap_or(0.0);
    let factor = 10f64.powi(places.clamp(-15, 15) as i32);
    let rounded = (f * factor).round() / factor;
    if places <= 0 && rounded.abs() < i64::MAX as f64 {
        return Ok(Value::from(rounded as i64));
    }
    Ok(Value::Number(number_from_f64(rounded)))
}

/// 1-based start; a negative start counts from the end.
fn substring(args: &[Value]) -> DbResult<Value> {
    let Some(s) = text_arg(args, 0) else {
        return Ok(Value::Null);
    };
    let Some(start) = int_arg("SUBSTRING", args, 1)? else {
        return Ok(Value::Null);
    };
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let begin = match start {
        0 => return Ok(Value::String(String::new())),
        s if s > 0 => s - 1,
        s => len + s,
    };
    if begin < 0 || begin >= len {
        return Ok(Value::String(String::new()));
    }
    let count = match args.get(2) {
        Some(_) => match int_arg("SUBSTRING", args, 2)? {
            Some(c) => c.max(0),
            None => return Ok(Value::Null),
        },
        None => len - begin,
    };
    let end = (begin + count).min(len);
    Ok(Value::String(
        chars[begin as usize..end as usize].iter().collect(),
    ))
}

fn trim(args: &[Value]) -> DbResult<Value> {
    let Some(s) = text_arg(args, 0) else {
        return Ok(Value::Null);
    };
    if args.len() == 1 {
        return Ok(Value::String(s.trim().to_string()));
    }
    let Some(pad) = text_arg(args, 1) else {
        return Ok(Value::Null);
    };
    let mode = text_arg(args, 2).unwrap_or_else(|| "BOTH".to_string());
    if pad.is_empty() {
        return Ok(Value::String(s));
    }

    let mut out = s.as_str();
    if mode != "TRAILING" {
        while let Some(rest) = out.strip_prefix(pad.as_str()) {
            out = rest;
        }
    }
    if mode != "LEADING" {
        while let Some(rest) = out.strip_suffix(pad.as_str()) {
            out = rest;
        }
    }
    Ok(Value::String(out.to_string()))
}

fn cast_type(type_name: &str) -> DbResult<ColumnType> {
    let upper = type_name.to_ascii_uppercase();
    if upper.contains("INT") || upper.starts_with("SIGNED") || upper.starts_with("UNSIGNED") {
        return Ok(ColumnType::Integer);
    }
    match upper.split_whitespace().next().unwrap_or("") {
        "CHAR" | "NCHAR" | "VARCHAR" | "TEXT" | "STRING" | "BINARY" | "DATE" | "DATETIME"
        | "TIME" | "TIMESTAMP" => Ok(ColumnType::Text),
        "DECIMAL" | "NUMERIC" | "REAL" | "DOUBLE" | "FLOAT" => Ok(ColumnType::Real),
        "BOOL" | "BOOLEAN" => Ok(ColumnType::Boolean),
        _ => Err(DbError::eval(format!("Unknown CAST type {}", type_name))),
    }
}

fn cast(value: &Value, type_name: &str) -> DbResult<Value> {
    let target = cast_type(type_name)?;
    target.coerce(value.clone())
}

/// Parse a date, datetime or time string, or a millisecond timestamp.
pub fn parse_datetime(value: &Value) -> DbResult<NaiveDateTime> {
    match value {
        Value::Number(n) => {
            let ms = n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| DbError::eval("Invalid timestamp"))?;
            match Utc.timestamp_millis_opt(ms) {
                chrono::LocalResult::Single(dt) => Ok(dt.naive_utc()),
                _ => Err(DbError::eval(format!("Invalid timestamp: {}", ms))),
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.naive_utc());
            }
            for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                    return Ok(dt);
                }
            }
            if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return Ok(d.and_time(NaiveTime::MIN));
            }
            if let Ok(t) = NaiveTime::parse_from_str(s, "%H:%M:%S") {
                return Ok(NaiveDate::MIN.and_time(t));
            }
            Err(DbError::eval(format!("Invalid date '{}'", s)))
        }
        other => Err(DbError::eval(format!("Invalid date {}", other))),
    }
}

fn extract(unit: &str, value: &Value) -> DbResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let dt = parse_datetime(value)?;
    let n: i64 = match unit {
        "YEAR" => dt.year() as i64,
        "QUARTER" => ((dt.month() - 1) / 3 + 1) as i64,
        "MONTH" => dt.month() as i64,
        "WEEK" => dt.iso_week().week() as i64,
        "DAY" => dt.day() as i64,
        "HOUR" => dt.hour() as i64,
        "MINUTE" => dt.minute() as i64,
        "SECOND" => dt.second() as i64,
        other => return Err(DbError::eval(format!("Unknown EXTRACT unit {}", other))),
    };
    Ok(Value::from(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_functions() {
        assert_eq!(call("UPPER", &[json!("abc")]).unwrap(), json!("ABC"));
        assert_eq!(call("LENGTH", &[json!("héllo")]).unwrap(), json!(5));
        assert_eq!(call("CONCAT", &[json!("a"), json!(1)]).unwrap(), json!("a1"));
        assert_eq!(call("CONCAT", &[json!("a"), json!(null)]).unwrap(), json!(null));
        assert_eq!(call("REPLACE", &[json!("aXbX"), json!("X"), json!("-")]).unwrap(), json!("a-b-"));
        assert_eq!(call("UPPER", &[json!(null)]).unwrap(), json!(null));
    }

    #[test]
    fn test_substring_positions() {
        assert_eq!(call("SUBSTRING", &[json!("hello"), json!(2), json!(3)]).unwrap(), json!("ell"));
        assert_eq!(call("SUBSTRING", &[json!("hello"), json!(-3)]).unwrap(), json!("llo"));
        assert_eq!(call("SUBSTRING", &[json!("hello"), json!(0)]).unwrap(), json!(""));
        assert_eq!(call("SUBSTRING", &[json!("hello"), json!(9)]).unwrap(), json!(""));
    }

    #[test]
    fn test_trim_modes() {
        assert_eq!(call("TRIM", &[json!("  x  ")]).unwrap(), json!("x"));
        assert_eq!(
            call("TRIM", &[json!("xxaxx"), json!("x"), json!("LEADING")]).unwrap(),
            json!("axx")
        );
        assert_eq!(
            call("TRIM", &[json!("xxaxx"), json!("x"), json!("BOTH")]).unwrap(),
            json!("a")
        );
    }

    #[test]
    fn test_numeric_functions() {
        assert_eq!(call("ABS", &[json!(-3)]).unwrap(), json!(3));
        assert_eq!(call("ROUND", &[json!(2.346), json!(2)]).unwrap(), json!(2.35));
        assert_eq!(call("ROUND", &[json!(2.5)]).unwrap(), json!(3));
        assert_eq!(call("FLOOR", &[json!(2.7)]).unwrap(), json!(2));
        assert_eq!(call("CEIL", &[json!(2.1)]).unwrap(), json!(3));
        assert_eq!(call("MOD", &[json!(10), json!(3)]).unwrap(), json!(1));
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(call("COALESCE", &[json!(null), json!(2)]).unwrap(), json!(2));
        assert_eq!(call("NULLIF", &[json!(1), json!(1)]).unwrap(), json!(null));
        assert_eq!(call("IFNULL", &[json!(null), json!("d")]).unwrap(), json!("d"));
    }

    #[test]
    fn test_cast() {
        assert_eq!(call("CAST", &[json!("42"), json!("INTEGER")]).unwrap(), json!(42));
        assert_eq!(call("CAST", &[json!(7), json!("CHAR")]).unwrap(), json!("7"));
        assert!(call("CAST", &[json!("abc"), json!("SIGNED")]).is_err());
        assert!(call("CAST", &[json!(1), json!("WIDGET")]).is_err());
    }

    #[test]
    fn test_extract() {
        assert_eq!(call("EXTRACT", &[json!("YEAR"), json!("2024-03-15")]).unwrap(), json!(2024));
        assert_eq!(
            call("EXTRACT", &[json!("MINUTE"), json!("2024-03-15 10:42:00")]).unwrap(),
            json!(42)
        );
        assert_eq!(call("EXTRACT", &[json!("QUARTER"), json!("2024-08-01")]).unwrap(), json!(3));
    }

    #[test]
    fn test_position_and_translate() {
        assert_eq!(call("POSITION", &[json!("lo"), json!("hello")]).unwrap(), json!(4));
        assert_eq!(call("POSITION", &[json!("z"), json!("hello")]).unwrap(), json!(0));
        assert_eq!(
            call("TRANSLATE", &[json!("abc"), json!("ab"), json!("x")]).unwrap(),
            json!("xc")
        );
    }

    #[test]
    fn test_arity() {
        assert!(check_arity("UPPER", 2).is_err());
        assert!(check_arity("CONCAT", 5).is_ok());
        assert!(check_arity("NOPE", 1).is_err());
    }
}
