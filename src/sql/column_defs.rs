//! CREATE TABLE column block
//!
//! Turns the tokens between the outer parentheses of a CREATE TABLE into
//! column descriptors plus table-level CHECK expressions.

use super::clauses::{matching_paren, split_top_level};
use super::compiler::check_constant;
use super::lexer::{render, Token, TokenKind};
use crate::error::{DbError, DbResult};
use crate::storage::{ColumnDescriptor, ColumnType, KeyRole};

/// Parsed column block of a CREATE TABLE.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnBlock {
    pub columns: Vec<ColumnDescriptor>,
    pub checks: Vec<String>,
}

const TYPE_MODIFIERS: &[&str] = &["UNSIGNED", "SIGNED", "ZEROFILL", "PRECISION", "VARYING"];

const CONSTRAINT_WORDS: &[&str] = &[
    "PRIMARY",
    "NOT",
    "NULL",
    "DEFAULT",
    "AUTO_INCREMENT",
    "AUTOINCREMENT",
    "UNIQUE",
    "CHECK",
    "COMMENT",
    "REFERENCES",
    "KEY",
];

pub fn parse_column_block(tokens: &[Token]) -> DbResult<ColumnBlock> {
    if tokens.is_empty() {
        return Err(DbError::syntax("CREATE TABLE requires at least one column"));
    }

    let mut block = ColumnBlock::default();
    let mut table_keys: Vec<(KeyRole, Vec<String>)> = Vec::new();

    for entry in split_top_level(tokens) {
        let Some(head) = entry.first() else {
            return Err(DbError::syntax("Empty column definition"));
        };

        if head.is_keyword("PRIMARY") || head.is_keyword("UNIQUE") {
            let role = if head.is_keyword("PRIMARY") {
                KeyRole::Primary
            } else {
                KeyRole::Unique
            };
            table_keys.push((role, key_columns(entry)?));
        } else if head.is_keyword("KEY") || head.is_keyword("INDEX") {
            // Plain indexes carry no semantics here
        } else if head.is_keyword("CHECK") {
            block.checks.push(parenthesized(entry, 1)?);
        } else if head.is_keyword("CONSTRAINT") {
            let rest = entry.get(2..).unwrap_or_default();
            match rest.first() {
                Some(t) if t.is_keyword("CHECK") => block.checks.push(parenthesized(rest, 1)?),
                Some(t) if t.is_keyword("PRIMARY") => {
                    table_keys.push((KeyRole::Primary, key_columns(rest)?))
                }
                Some(t) if t.is_keyword("UNIQUE") => {
                    table_keys.push((KeyRole::Unique, key_columns(rest)?))
                }
                _ => {
                    return Err(DbError::syntax(format!(
                        "Unsupported table constraint: {}",
                        render(entry)
                    )))
                }
            }
        } else {
            block.columns.push(parse_column(entry)?);
        }
    }

    for (role, names) in table_keys {
        if role == KeyRole::Primary && names.len() > 1 {
            return Err(DbError::SchemaConflict(format!(
                "Composite primary key ({}) is not supported",
                names.join(", ")
            )));
        }
        for name in names {
            let column = block
                .columns
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(&name))
                .ok_or_else(|| {
                    DbError::semantic(format!("Key refers to unknown column '{}'", name))
                })?;
            if role == KeyRole::Primary {
                if column.key == KeyRole::Primary {
                    return Err(DbError::SchemaConflict(format!(
                        "Column '{}' declared PRIMARY KEY twice",
                        column.name
                    )));
                }
                column.key = KeyRole::Primary;
                column.nullable = false;
            } else if column.key == KeyRole::None {
                column.key = KeyRole::Unique;
            }
        }
    }

    Ok(block)
}

/// `PRIMARY KEY (a)` / `UNIQUE [KEY] [name] (a, b)`
fn key_columns(entry: &[Token]) -> DbResult<Vec<String>> {
    let open = entry
        .iter()
        .position(|t| t.kind == TokenKind::LParen)
        .ok_or_else(|| DbError::syntax(format!("Key without column list: {}", render(entry))))?;
    let close = matching_paren(entry, open)
        .ok_or_else(|| DbError::syntax("Unclosed key column list"))?;
    split_top_level(&entry[open + 1..close])
        .into_iter()
        .map(|part| match part {
            [t] if t.is_identifier() => Ok(t.text.clone()),
            _ => Err(DbError::syntax(format!(
                "Invalid key column: {}",
                render(part)
            ))),
        })
        .collect()
}

/// Source text of the parenthesized expression starting at `open`.
fn parenthesized(entry: &[Token], open: usize) -> DbResult<String> {
    if !entry.get(open).is_some_and(|t| t.kind == TokenKind::LParen) {
        return Err(DbError::syntax("CHECK requires a parenthesized expression"));
    }
    let close = matching_paren(entry, open)
        .ok_or_else(|| DbError::syntax("Unclosed CHECK expression"))?;
    let inner = &entry[open + 1..close];
    if inner.is_empty() {
        return Err(DbError::syntax("Empty CHECK expression"));
    }
    Ok(render(inner))
}

fn parse_column(entry: &[Token]) -> DbResult<ColumnDescriptor> {
    let name = &entry[0];
    if !name.is_identifier() {
        return Err(DbError::syntax(format!(
            "Invalid column name '{}'",
            name.text
        )));
    }

    let mut i = 1;
    let mut data_type = ColumnType::Any;
    if let Some(t) = entry.get(i) {
        if t.kind == TokenKind::Word && !t.is_any_keyword(CONSTRAINT_WORDS) {
            data_type = ColumnType::from_sql(&t.text);
            i += 1;
            if entry.get(i).is_some_and(|t| t.kind == TokenKind::LParen) {
                i = matching_paren(entry, i)
                    .ok_or_else(|| DbError::syntax("Unclosed type length"))?
                    + 1;
            }
            while entry.get(i).is_some_and(|t| t.is_any_keyword(TYPE_MODIFIERS)) {
                i += 1;
            }
        }
    }

    let mut column = ColumnDescriptor::new(name.text.clone(), data_type);

    while i < entry.len() {
        let token = &entry[i];
        match token.upper().as_str() {
            "PRIMARY" if entry.get(i + 1).is_some_and(|t| t.is_keyword("KEY")) => {
                if column.key == KeyRole::Primary {
                    return Err(DbError::SchemaConflict(format!(
                        "Column '{}' declared PRIMARY KEY twice",
                        column.name
                    )));
                }
                column = column.primary_key();
                i += 2;
            }
            "NOT" if entry.get(i + 1).is_some_and(|t| t.is_keyword("NULL")) => {
                column.nullable = false;
                i += 2;
            }
            "NULL" => {
                if column.key != KeyRole::Primary {
                    column.nullable = true;
                }
                i += 1;
            }
            "UNIQUE" => {
                if column.key == KeyRole::None {
                    column.key = KeyRole::Unique;
                }
                i += 1;
                if entry.get(i).is_some_and(|t| t.is_keyword("KEY")) {
                    i += 1;
                }
            }
            "AUTO_INCREMENT" | "AUTOINCREMENT" => {
                column.auto_increment = true;
                i += 1;
            }
            "DEFAULT" => {
                let end = default_end(entry, i + 1)?;
                let expr = &entry[i + 1..end];
                check_constant(expr).map_err(|e| {
                    DbError::semantic(format!(
                        "Invalid DEFAULT for column '{}': {}",
                        column.name, e
                    ))
                })?;
                column.default = Some(render(expr));
                i = end;
            }
            "CHECK" => {
                column.check = Some(parenthesized(entry, i + 1)?);
                i = matching_paren(entry, i + 1)
                    .ok_or_else(|| DbError::syntax("Unclosed CHECK expression"))?
                    + 1;
            }
            "COMMENT" => i += 2,
            "REFERENCES" => {
                // Foreign keys are accepted and ignored
                i += 2;
                if entry.get(i).is_some_and(|t| t.kind == TokenKind::LParen) {
                    i = matching_paren(entry, i)
                        .ok_or_else(|| DbError::syntax("Unclosed REFERENCES list"))?
                        + 1;
                }
            }
            _ => {
                return Err(DbError::syntax(format!(
                    "Unexpected '{}' in definition of column '{}'",
                    token.text, column.name
                )))
            }
        }
    }

    Ok(column)
}

/// End index (exclusive) of a DEFAULT expression starting at `start`.
fn default_end(entry: &[Token], start: usize) -> DbResult<usize> {
    let first = entry
        .get(start)
        .ok_or_else(|| DbError::syntax("DEFAULT requires a value"))?;
    if first.kind == TokenKind::LParen {
        return matching_paren(entry, start)
            .map(|close| close + 1)
            .ok_or_else(|| DbError::syntax("Unclosed DEFAULT expression"));
    }
    if (first.is_op("-") || first.is_op("+"))
        && entry.get(start + 1).is_some_and(|t| t.kind == TokenKind::Number)
    {
        return Ok(start + 2);
    }
    if first.kind == TokenKind::Word
        && entry.get(start + 1).is_some_and(|t| t.kind == TokenKind::LParen)
    {
        return matching_paren(entry, start + 1)
            .map(|close| close + 1)
            .ok_or_else(|| DbError::syntax("Unclosed DEFAULT call"));
    }
    Ok(start + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::lexer::tokenize;

    fn block(sql: &str) -> DbResult<ColumnBlock> {
        parse_column_block(&tokenize(sql))
    }

    #[test]
    fn test_column_types_and_constraints() {
        let b = block(
            "id INT PRIMARY KEY AUTO_INCREMENT, name VARCHAR(20) NOT NULL, score DOUBLE DEFAULT 1.5, tag TEXT UNIQUE",
        )
        .unwrap();
        assert_eq!(b.columns.len(), 4);
        let id = &b.columns[0];
        assert_eq!(id.data_type, ColumnType::Integer);
        assert_eq!(id.key, KeyRole::Primary);
        assert!(id.auto_increment);
        assert!(!id.nullable);
        assert!(!b.columns[1].nullable);
        assert_eq!(b.columns[1].data_type, ColumnType::Text);
        assert_eq!(b.columns[2].default.as_deref(), Some("1.5"));
        assert_eq!(b.columns[3].key, KeyRole::Unique);
    }

    #[test]
    fn test_table_level_primary_key_and_check() {
        let b = block("a INT, b INT, PRIMARY KEY (b), CHECK (a < b)").unwrap();
        assert_eq!(b.columns[1].key, KeyRole::Primary);
        assert_eq!(b.checks, vec!["a < b".to_string()]);
    }

    #[test]
    fn test_negative_and_call_defaults() {
        let b = block("a INT DEFAULT -1, b TEXT DEFAULT UPPER('x')").unwrap();
        assert_eq!(b.columns[0].default.as_deref(), Some("- 1"));
        assert_eq!(b.columns[1].default.as_deref(), Some("UPPER('x')"));
    }

    #[test]
    fn test_invalid_default_rejected() {
        assert!(block("a INT DEFAULT missing_col").is_err());
    }

    #[test]
    fn test_composite_primary_key_rejected() {
        let err = block("a INT, b INT, PRIMARY KEY (a, b)").unwrap_err();
        assert!(matches!(err, DbError::SchemaConflict(_)));
    }

    #[test]
    fn test_untyped_column() {
        let b = block("a NOT NULL").unwrap();
        assert_eq!(b.columns[0].data_type, ColumnType::Any);
        assert!(!b.columns[0].nullable);
    }

    #[test]
    fn test_unknown_key_column() {
        assert!(block("a INT, PRIMARY KEY (zz)").is_err());
    }
}
