//! Name resolution scope for expression compilation
//!
//! A [`SchemaContext`] lists the tables visible to a statement. With a
//! single table, columns resolve to their plain names. With more than one,
//! every (table, column) pair gets a correlation key built from a prefix
//! that is unique for the statement: `#N:alias.column`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::storage::{TableSchema, ROWID_COLUMN};

static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

/// Hand out a correlation prefix that no present identifier starts with.
pub fn allocate_prefix(present: &[&str]) -> String {
    loop {
        let id = NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed);
        let prefix = format!("#{}:", id);
        if !present.iter().any(|name| name.starts_with(&prefix)) {
            return prefix;
        }
        tracing::debug!("Correlation prefix {} collides, allocating another", prefix);
    }
}

/// One table visible in a statement
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeTable {
    pub name: String,
    /// Alias, or the table name when none was given
    pub alias: String,
    pub columns: Vec<String>,
}

impl ScopeTable {
    pub fn new(name: impl Into<String>, alias: Option<String>, columns: Vec<String>) -> Self {
        let name = name.into();
        Self {
            alias: alias.unwrap_or_else(|| name.clone()),
            name,
            columns,
        }
    }

    /// Schema columns plus the implicit rowid.
    pub fn from_schema(schema: &TableSchema, alias: Option<String>) -> Self {
        let mut columns = schema.column_names();
        if !columns.iter().any(|c| c.eq_ignore_ascii_case(ROWID_COLUMN)) {
            columns.push(ROWID_COLUMN.to_string());
        }
        Self::new(schema.name.clone(), alias, columns)
    }

    pub fn column(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    fn answers_to(&self, qualifier: &str) -> bool {
        self.alias.eq_ignore_ascii_case(qualifier) || self.name.eq_ignore_ascii_case(qualifier)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaContext {
    tables: Vec<ScopeTable>,
    prefix: Option<String>,
    /// Bare names that resolve to themselves, checked before table columns
    extras: Vec<String>,
}

impl SchemaContext {
    /// Scope with no tables; only literals and calls compile.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(schema: &TableSchema) -> Self {
        Self::from_tables(vec![ScopeTable::from_schema(schema, None)])
    }

    /// Build a scope; a correlation prefix is allocated when more than one
    /// table is present.
    pub fn from_tables(tables: Vec<ScopeTable>) -> Self {
        let prefix = if tables.len() > 1 {
            let present: Vec<&str> = tables
                .iter()
                .flat_map(|t| t.columns.iter().map(String::as_str))
                .collect();
            Some(allocate_prefix(&present))
        } else {
            None
        };
        Self {
            tables,
            prefix,
            extras: Vec::new(),
        }
    }

    pub fn with_extras(mut self, names: impl IntoIterator<Item = String>) -> Self {
        for name in names {
            if !self.extras.contains(&name) {
                self.extras.push(name);
            }
        }
        self
    }

    pub fn tables(&self) -> &[ScopeTable] {
        &self.tables
    }

    pub fn is_correlated(&self) -> bool {
        self.prefix.is_some()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Row key of `column` in the table at `index`.
    pub fn key(&self, index: usize, column: &str) -> String {
        match (&self.prefix, self.tables.get(index)) {
            (Some(prefix), Some(table)) => format!("{}{}.{}", prefix, table.alias, column),
            _ => column.to_string(),
        }
    }

    /// Index of the table a qualifier names.
    pub fn table_index(&self, qualifier: &str) -> Option<usize> {
        self.tables
            .iter()
            .position(|t| t.alias.eq_ignore_ascii_case(qualifier))
            .or_else(|| self.tables.iter().position(|t| t.answers_to(qualifier)))
    }

    /// True when `key` is a row key this scope produces, exactly as
    /// [`SchemaContext::key`] or an extra name spells it.
    pub fn has_key(&self, key: &str) -> bool {
        self.extras.iter().any(|e| e == key)
            || self.tables.iter().enumerate().any(|(i, t)| {
                t.columns.iter().any(|c| self.key(i, c) == key)
            })
    }

    /// Resolve an identifier to a row key. Unqualified names try the extra
    /// names first, then each table in FROM order.
    pub fn resolve(&self, qualifier: Option<&str>, name: &str) -> Option<String> {
        match qualifier {
            Some(q) => {
                let index = self.table_index(q)?;
                let column = self.tables[index].column(name)?;
                Some(self.key(index, column))
            }
            None => {
                if let Some(extra) = self.extras.iter().find(|e| e.eq_ignore_ascii_case(name)) {
                    return Some(extra.clone());
                }
                self.tables.iter().enumerate().find_map(|(i, t)| {
                    t.column(name).map(|column| self.key(i, column))
                })
            }
        }
    }
}
