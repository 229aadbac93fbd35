//! Per-statement state
//!
//! Created when a statement starts, threaded through every builder call and
//! dropped when the statement ends. Nothing here outlives one statement.

use crate::error::{DbError, DbResult};
use crate::sql::clauses::StatementKind;

#[derive(Debug, Clone)]
pub struct StatementContext {
    kind: StatementKind,
    /// Table the statement reads or writes when there is only one
    active_table: Option<String>,
    /// (alias, table) pairs registered by FROM, in FROM order
    aliases: Vec<(String, String)>,
    /// 0 for a top-level statement, +1 per enclosing subquery
    depth: usize,
}

impl StatementContext {
    pub fn new(kind: StatementKind) -> Self {
        Self {
            kind,
            active_table: None,
            aliases: Vec::new(),
            depth: 0,
        }
    }

    /// Context for a SELECT running inside another statement.
    pub fn nested(depth: usize) -> Self {
        Self {
            depth,
            ..Self::new(StatementKind::Select)
        }
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_subquery(&self) -> bool {
        self.depth > 0
    }

    pub fn set_active_table(&mut self, table: impl Into<String>) {
        self.active_table = Some(table.into());
    }

    pub fn active_table(&self) -> Option<&str> {
        self.active_table.as_deref()
    }

    /// Register a FROM alias. Two sources answering to the same alias
    /// cannot be told apart, so that is a collision.
    pub fn register_alias(&mut self, alias: &str, table: &str) -> DbResult<()> {
        if self.aliases.iter().any(|(a, _)| a.eq_ignore_ascii_case(alias)) {
            return Err(DbError::SchemaConflict(format!(
                "Not unique table/alias: '{}'",
                alias
            )));
        }
        self.aliases.push((alias.to_string(), table.to_string()));
        Ok(())
    }

    pub fn table_for_alias(&self, alias: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(a, _)| a.eq_ignore_ascii_case(alias))
            .map(|(_, t)| t.as_str())
    }

    pub fn aliases(&self) -> &[(String, String)] {
        &self.aliases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_alias_is_conflict() {
        let mut ctx = StatementContext::new(StatementKind::Select);
        ctx.register_alias("u", "users").unwrap();
        assert_eq!(ctx.table_for_alias("U"), Some("users"));
        let err = ctx.register_alias("u", "orders").unwrap_err();
        assert!(matches!(err, DbError::SchemaConflict(_)));
    }

    #[test]
    fn test_nested_context_starts_clean() {
        let ctx = StatementContext::nested(2);
        assert!(ctx.is_subquery());
        assert_eq!(ctx.kind(), StatementKind::Select);
        assert!(ctx.aliases().is_empty());
        assert_eq!(ctx.active_table(), None);
    }
}
