//! Storage collaborator interface
//!
//! The query core never touches bytes on disk. Everything it needs from the
//! record store goes through [`Storage`]: schema snapshots, row reads and
//! writes, the rowid counter and advisory table locks. Lock waiting and
//! backoff are the implementor's business; the core only sees pass/fail.

mod memory;
mod schema;

pub use memory::MemoryStorage;
pub use schema::{
    is_system_column, ColumnDescriptor, ColumnType, KeyRole, TableSchema, ROWID_COLUMN,
};

use crate::error::{DbError, DbResult};

/// A row: column name to scalar, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// What a lock acquisition covers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockTarget {
    Table(String),
    All,
}

impl std::fmt::Display for LockTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockTarget::Table(name) => write!(f, "table '{}'", name),
            LockTarget::All => write!(f, "all tables"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

pub trait Storage {
    fn table_exists(&self, table: &str) -> bool;

    /// Schema snapshot, `TableNotFound` when absent
    fn get_schema(&self, table: &str) -> DbResult<TableSchema>;

    fn get_primary_key(&self, table: &str) -> DbResult<Option<String>> {
        Ok(self.get_schema(table)?.primary_key().map(|c| c.name.clone()))
    }

    fn create_table(&self, schema: TableSchema) -> DbResult<()>;

    fn drop_table(&self, table: &str) -> DbResult<()>;

    fn lock_shared(&self, target: &LockTarget) -> bool;

    fn lock_exclusive(&self, target: &LockTarget) -> bool;

    fn unlock(&self, target: &LockTarget) -> bool;

    fn read_rows(&self, table: &str) -> DbResult<Vec<Row>>;

    fn append_rows(&self, table: &str, rows: Vec<Row>) -> DbResult<()>;

    fn rewrite_rows(&self, table: &str, rows: Vec<Row>) -> DbResult<()>;

    /// Next rowid that would be handed out, without consuming it
    fn next_row_id(&self, table: &str) -> DbResult<u64>;

    fn advance_row_id(&self, table: &str, n: u64) -> DbResult<()>;
}

/// Scoped advisory lock, released on drop on every exit path.
pub struct LockGuard<'a, S: Storage + ?Sized> {
    storage: &'a S,
    target: LockTarget,
    mode: LockMode,
}

impl<'a, S: Storage + ?Sized> LockGuard<'a, S> {
    pub fn acquire(storage: &'a S, target: LockTarget, mode: LockMode) -> DbResult<Self> {
        let acquired = match mode {
            LockMode::Shared => storage.lock_shared(&target),
            LockMode::Exclusive => storage.lock_exclusive(&target),
        };
        if !acquired {
            tracing::warn!("Lock acquisition failed: {:?} on {}", mode, target);
            return Err(DbError::LockUnavailable(target.to_string()));
        }
        tracing::trace!("Acquired {:?} lock on {}", mode, target);
        Ok(Self {
            storage,
            target,
            mode,
        })
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl<S: Storage + ?Sized> Drop for LockGuard<'_, S> {
    fn drop(&mut self) {
        if !self.storage.unlock(&self.target) {
            tracing::warn!("Unlock of {} reported failure", self.target);
        }
    }
}

/// Acquire locks for a set of tables, deduplicated and in sorted order.
pub fn lock_tables<'a, S: Storage + ?Sized>(
    storage: &'a S,
    tables: &[String],
    mode: LockMode,
) -> DbResult<Vec<LockGuard<'a, S>>> {
    let mut names: Vec<String> = tables.iter().map(|t| t.to_ascii_lowercase()).collect();
    names.sort();
    names.dedup();

    let mut guards = Vec::with_capacity(names.len());
    for name in names {
        guards.push(LockGuard::acquire(storage, LockTarget::Table(name), mode)?);
    }
    Ok(guards)
}
