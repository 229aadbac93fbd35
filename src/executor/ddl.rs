//! CREATE TABLE / DROP TABLE

use super::context::StatementContext;
use super::Engine;
use crate::error::{DbError, DbResult};
use crate::sql::clauses::{split_top_level, Clause, ClauseMap};
use crate::sql::compiler::{CompileMode, SchemaContext};
use crate::sql::lexer::tokenize;
use crate::storage::{is_system_column, KeyRole, LockGuard, LockMode, LockTarget, Storage, TableSchema};

/// Validate a column block before anything is written.
fn validate_columns(schema: &TableSchema) -> DbResult<()> {
    let mut seen: Vec<String> = Vec::with_capacity(schema.columns.len());
    for column in &schema.columns {
        if is_system_column(&column.name) || column.name.starts_with('#') {
            return Err(DbError::SchemaConflict(format!(
                "Column name '{}' is reserved",
                column.name
            )));
        }
        let lower = column.name.to_ascii_lowercase();
        if seen.contains(&lower) {
            return Err(DbError::SchemaConflict(format!(
                "Duplicate column name '{}'",
                column.name
            )));
        }
        seen.push(lower);
    }
    let primaries = schema
        .columns
        .iter()
        .filter(|c| c.key == KeyRole::Primary)
        .count();
    if primaries > 1 {
        return Err(DbError::SchemaConflict(
            "Multiple primary keys defined".to_string(),
        ));
    }
    Ok(())
}

impl<S: Storage> Engine<S> {
    pub(crate) fn create_table(&self, ctx: &mut StatementContext, map: &ClauseMap) -> DbResult<()> {
        let name = map
            .get(Clause::Table)
            .and_then(|t| t.first())
            .map(|t| t.text.clone())
            .ok_or_else(|| DbError::syntax("CREATE TABLE requires a table name"))?;
        ctx.set_active_table(&name);

        let schema = TableSchema {
            name: name.clone(),
            columns: map.columns.clone(),
            checks: map.table_checks.clone(),
        };
        validate_columns(&schema)?;

        // CHECK expressions must compile against the new table and be
        // evaluable without a row.
        let scope = SchemaContext::single(&schema);
        let evaluator = self.evaluator();
        let checks = schema
            .columns
            .iter()
            .filter_map(|c| c.check.as_ref())
            .chain(schema.checks.iter());
        for text in checks {
            let compiled = self.compile(ctx, &scope, &tokenize(text), CompileMode::Strict)?;
            evaluator.check(&compiled)?;
        }

        let _guard = LockGuard::acquire(&self.storage, LockTarget::All, LockMode::Exclusive)?;
        if self.storage.table_exists(&name) {
            if map.if_exists {
                tracing::debug!("Table '{}' exists, CREATE skipped", name);
                return Ok(());
            }
            return Err(DbError::TableAlreadyExists(name));
        }
        self.storage.create_table(schema)?;
        tracing::info!("Created table '{}'", name);
        Ok(())
    }

    /// Every named table is checked before any is dropped.
    pub(crate) fn drop_tables(&self, ctx: &mut StatementContext, map: &ClauseMap) -> DbResult<()> {
        let tokens = map
            .get(Clause::Table)
            .ok_or_else(|| DbError::syntax("DROP TABLE requires a table name"))?;
        let names: Vec<String> = split_top_level(tokens)
            .into_iter()
            .filter_map(|part| part.first().map(|t| t.text.clone()))
            .collect();
        if let Some(first) = names.first() {
            ctx.set_active_table(first);
        }

        let _guard = LockGuard::acquire(&self.storage, LockTarget::All, LockMode::Exclusive)?;
        let mut targets = Vec::with_capacity(names.len());
        for name in names {
            if self.storage.table_exists(&name) {
                if !targets.contains(&name) {
                    targets.push(name);
                }
            } else if !map.if_exists {
                return Err(DbError::TableNotFound(name));
            }
        }
        for name in &targets {
            self.storage.drop_table(name)?;
            tracing::info!("Dropped table '{}'", name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::QueryOutput;
    use crate::storage::{ColumnDescriptor, ColumnType, MemoryStorage};

    fn engine() -> Engine<MemoryStorage> {
        Engine::new(MemoryStorage::new())
    }

    #[test]
    fn test_create_and_drop() {
        let engine = engine();
        let out = engine
            .execute("CREATE TABLE t (id INT PRIMARY KEY, name VARCHAR(20) NOT NULL)")
            .unwrap();
        assert!(matches!(out, QueryOutput::Done));
        let schema = engine.storage().get_schema("t").unwrap();
        assert_eq!(schema.column_names(), vec!["id", "name"]);
        assert_eq!(schema.primary_key().map(|c| c.name.as_str()), Some("id"));

        engine.execute("DROP TABLE t").unwrap();
        assert!(!engine.storage().table_exists("t"));
    }

    #[test]
    fn test_create_existing() {
        let engine = engine();
        engine.execute("CREATE TABLE t (a INT)").unwrap();
        let err = engine.execute("CREATE TABLE t (a INT)").unwrap_err();
        assert!(matches!(err, DbError::TableAlreadyExists(_)));
        assert!(engine.execute("CREATE TABLE IF NOT EXISTS t (b INT)").is_ok());
        let schema = engine.storage().get_schema("t").unwrap();
        assert_eq!(schema.column_names(), vec!["a"]);
    }

    #[test]
    fn test_reserved_and_duplicate_columns() {
        let engine = engine();
        let err = engine.execute("CREATE TABLE t (rowid INT)").unwrap_err();
        assert!(matches!(err, DbError::SchemaConflict(_)));
        let err = engine.execute("CREATE TABLE t (a INT, A TEXT)").unwrap_err();
        assert!(matches!(err, DbError::SchemaConflict(_)));
        assert!(!engine.storage().table_exists("t"));
    }

    #[test]
    fn test_check_must_compile() {
        let engine = engine();
        let err = engine
            .execute("CREATE TABLE t (a INT CHECK (missing > 0))")
            .unwrap_err();
        assert!(matches!(err, DbError::SemanticError(_)));
        assert!(engine
            .execute("CREATE TABLE t (a INT, CHECK (a > 0))")
            .is_ok());
    }

    #[test]
    fn test_drop_checks_all_names_first() {
        let storage = MemoryStorage::new();
        storage
            .create_table(TableSchema::new(
                "a",
                vec![ColumnDescriptor::new("x", ColumnType::Integer)],
            ))
            .unwrap();
        let engine = Engine::new(storage);
        let err = engine.execute("DROP TABLE a, b").unwrap_err();
        assert!(matches!(err, DbError::TableNotFound(_)));
        assert!(engine.storage().table_exists("a"));

        engine.execute("DROP TABLE IF EXISTS a, b").unwrap();
        assert!(!engine.storage().table_exists("a"));
    }
}
