//! Table schema snapshot types
//!
//! Schemas are owned by the storage collaborator. The engine receives a
//! clone per operation and never caches it across statements.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DbError, DbResult};

/// Implicit auto-incrementing row identifier carried by every stored row.
pub const ROWID_COLUMN: &str = "rowid";

/// Column value domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    /// Untyped column, values stored as given
    Any,
}

impl ColumnType {
    /// Map a declared SQL type name onto a column domain.
    pub fn from_sql(name: &str) -> Self {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" => {
                ColumnType::Integer
            }
            "REAL" | "FLOAT" | "DOUBLE" | "DECIMAL" | "NUMERIC" => ColumnType::Real,
            "TEXT" | "VARCHAR" | "CHAR" | "STRING" | "CLOB" | "DATE" | "DATETIME" | "TIME"
            | "TIMESTAMP" => ColumnType::Text,
            "BOOL" | "BOOLEAN" => ColumnType::Boolean,
            _ => ColumnType::Any,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Any => "ANY",
        }
    }

    /// Coerce a value into this domain. NULL passes through untouched.
    pub fn coerce(&self, value: Value) -> DbResult<Value> {
        if value.is_null() {
            return Ok(value);
        }
        match self {
            ColumnType::Any => Ok(value),
            ColumnType::Text => Ok(match value {
                Value::String(s) => Value::String(s),
                Value::Number(n) => Value::String(n.to_string()),
                Value::Bool(b) => Value::String(if b { "1" } else { "0" }.to_string()),
                other => Value::String(other.to_string()),
            }),
            ColumnType::Integer => match &value {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Ok(Value::from(i))
                    } else {
                        Ok(Value::from(n.as_f64().unwrap_or(0.0).trunc() as i64))
                    }
                }
                Value::Bool(b) => Ok(Value::from(*b as i64)),
                Value::String(s) => {
                    let trimmed = s.trim();
                    if let Ok(i) = trimmed.parse::<i64>() {
                        Ok(Value::from(i))
                    } else if let Ok(f) = trimmed.parse::<f64>() {
                        Ok(Value::from(f.trunc() as i64))
                    } else {
                        Err(DbError::eval(format!(
                            "Cannot store '{}' in an INTEGER column",
                            s
                        )))
                    }
                }
                _ => Err(DbError::eval("Cannot store value in an INTEGER column")),
            },
            ColumnType::Real => match &value {
                Value::Number(n) => Ok(Value::from(n.as_f64().unwrap_or(0.0))),
                Value::Bool(b) => Ok(Value::from(if *b { 1.0 } else { 0.0 })),
                Value::String(s) => s.trim().parse::<f64>().map(Value::from).map_err(|_| {
                    DbError::eval(format!("Cannot store '{}' in a REAL column", s))
                }),
                _ => Err(DbError::eval("Cannot store value in a REAL column")),
            },
            ColumnType::Boolean => match &value {
                Value::Bool(_) => Ok(value),
                Value::Number(n) => Ok(Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0)),
                Value::String(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => Ok(Value::Bool(true)),
                    "false" | "0" | "no" | "" => Ok(Value::Bool(false)),
                    _ => Err(DbError::eval(format!(
                        "Cannot store '{}' in a BOOLEAN column",
                        s
                    ))),
                },
                _ => Err(DbError::eval("Cannot store value in a BOOLEAN column")),
            },
        }
    }
}

/// Role a column plays in the table key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    #[default]
    None,
    Primary,
    Unique,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: ColumnType,
    pub nullable: bool,
    /// DEFAULT expression source text, already validated at CREATE time
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub key: KeyRole,
    #[serde(default)]
    pub auto_increment: bool,
    /// CHECK expression source text
    #[serde(default)]
    pub check: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default: None,
            key: KeyRole::None,
            auto_increment: false,
            check: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.key = KeyRole::Primary;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    /// Table-level CHECK expressions
    #[serde(default)]
    pub checks: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            name: name.into(),
            columns,
            checks: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn primary_key(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.key == KeyRole::Primary)
    }
}

/// System columns are hidden from `*` expansion and NATURAL joins.
pub fn is_system_column(name: &str) -> bool {
    name.eq_ignore_ascii_case(ROWID_COLUMN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_from_sql() {
        assert_eq!(ColumnType::from_sql("int"), ColumnType::Integer);
        assert_eq!(ColumnType::from_sql("VARCHAR"), ColumnType::Text);
        assert_eq!(ColumnType::from_sql("double"), ColumnType::Real);
        assert_eq!(ColumnType::from_sql("blob"), ColumnType::Any);
    }

    #[test]
    fn test_coerce_integer() {
        assert_eq!(ColumnType::Integer.coerce(json!("42")).unwrap(), json!(42));
        assert_eq!(ColumnType::Integer.coerce(json!(3.9)).unwrap(), json!(3));
        assert_eq!(ColumnType::Integer.coerce(json!(null)).unwrap(), json!(null));
        assert!(ColumnType::Integer.coerce(json!("abc")).is_err());
    }

    #[test]
    fn test_coerce_text_and_bool() {
        assert_eq!(ColumnType::Text.coerce(json!(7)).unwrap(), json!("7"));
        assert_eq!(ColumnType::Boolean.coerce(json!(0)).unwrap(), json!(false));
        assert_eq!(ColumnType::Boolean.coerce(json!("yes")).unwrap(), json!(true));
    }

    #[test]
    fn test_schema_lookup_is_case_insensitive() {
        let schema = TableSchema::new(
            "users",
            vec![
                ColumnDescriptor::new("id", ColumnType::Integer).primary_key(),
                ColumnDescriptor::new("Name", ColumnType::Text),
            ],
        );
        assert!(schema.has_column("name"));
        assert_eq!(schema.primary_key().map(|c| c.name.as_str()), Some("id"));
        assert!(!schema.primary_key().unwrap().nullable);
    }
}
