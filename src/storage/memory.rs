//! In-memory storage collaborator
//!
//! Keeps every table as a vector of rows. Used by the shell and the test
//! suite; locks are non-blocking and simply refuse on conflict.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

use super::{LockTarget, Row, Storage, TableSchema};
use crate::error::{DbError, DbResult};

#[derive(Debug, Clone)]
struct TableData {
    schema: TableSchema,
    rows: Vec<Row>,
    next_row_id: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct LockState {
    shared: usize,
    exclusive: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<HashMap<String, TableData>>,
    locks: Mutex<HashMap<LockTarget, LockState>>,
}

fn key(table: &str) -> String {
    table.to_ascii_lowercase()
}

fn normalize(target: &LockTarget) -> LockTarget {
    match target {
        LockTarget::Table(name) => LockTarget::Table(key(name)),
        LockTarget::All => LockTarget::All,
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table and load rows into it, assigning rowids in order.
    pub fn with_table(self, schema: TableSchema, rows: Vec<Row>) -> DbResult<Self> {
        self.create_table(schema.clone())?;
        let mut stamped = Vec::with_capacity(rows.len());
        for (i, mut row) in rows.into_iter().enumerate() {
            if !row.contains_key(super::ROWID_COLUMN) {
                row.insert(super::ROWID_COLUMN.to_string(), serde_json::json!(i as u64 + 1));
            }
            stamped.push(row);
        }
        let count = stamped.len() as u64;
        self.append_rows(&schema.name, stamped)?;
        self.advance_row_id(&schema.name, count)?;
        Ok(self)
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .values()
            .map(|t| t.schema.name.clone())
            .collect();
        names.sort();
        names
    }

    fn conflicts(locks: &HashMap<LockTarget, LockState>, target: &LockTarget, exclusive: bool) -> bool {
        let held = |t: &LockTarget| locks.get(t).copied().unwrap_or_default();
        match target {
            LockTarget::All => locks.iter().any(|(_, s)| {
                s.exclusive || (exclusive && s.shared > 0)
            }),
            LockTarget::Table(_) => {
                let all = held(&LockTarget::All);
                let own = held(target);
                all.exclusive
                    || (exclusive && all.shared > 0)
                    || own.exclusive
                    || (exclusive && own.shared > 0)
            }
        }
    }
}

impl Storage for MemoryStorage {
    fn table_exists(&self, table: &str) -> bool {
        self.tables.read().contains_key(&key(table))
    }

    fn get_schema(&self, table: &str) -> DbResult<TableSchema> {
        self.tables
            .read()
            .get(&key(table))
            .map(|t| t.schema.clone())
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }

    fn create_table(&self, schema: TableSchema) -> DbResult<()> {
        let mut tables = self.tables.write();
        let k = key(&schema.name);
        if tables.contains_key(&k) {
            return Err(DbError::TableAlreadyExists(schema.name));
        }
        tables.insert(
            k,
            TableData {
                schema,
                rows: Vec::new(),
                next_row_id: 1,
            },
        );
        Ok(())
    }

    fn drop_table(&self, table: &str) -> DbResult<()> {
        self.tables
            .write()
            .remove(&key(table))
            .map(|_| ())
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }

    fn lock_shared(&self, target: &LockTarget) -> bool {
        let target = normalize(target);
        let mut locks = self.locks.lock();
        if Self::conflicts(&locks, &target, false) {
            return false;
        }
        locks.entry(target).or_default().shared += 1;
        true
    }

    fn lock_exclusive(&self, target: &LockTarget) -> bool {
        let target = normalize(target);
        let mut locks = self.locks.lock();
        if Self::conflicts(&locks, &target, true) {
            return false;
        }
        locks.entry(target).or_default().exclusive = true;
        true
    }

    fn unlock(&self, target: &LockTarget) -> bool {
        let target = normalize(target);
        let mut locks = self.locks.lock();
        let Some(state) = locks.get_mut(&target) else {
            return false;
        };
        if state.exclusive {
            state.exclusive = false;
        } else if state.shared > 0 {
            state.shared -= 1;
        } else {
            return false;
        }
        if state.shared == 0 && !state.exclusive {
            locks.remove(&target);
        }
        true
    }

    fn read_rows(&self, table: &str) -> DbResult<Vec<Row>> {
        self.tables
            .read()
            .get(&key(table))
            .map(|t| t.rows.clone())
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }

    fn append_rows(&self, table: &str, rows: Vec<Row>) -> DbResult<()> {
        let mut tables = self.tables.write();
        let data = tables
            .get_mut(&key(table))
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        data.rows.extend(rows);
        Ok(())
    }

    fn rewrite_rows(&self, table: &str, rows: Vec<Row>) -> DbResult<()> {
        let mut tables = self.tables.write();
        let data = tables
            .get_mut(&key(table))
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        data.rows = rows;
        Ok(())
    }

    fn next_row_id(&self, table: &str) -> DbResult<u64> {
        self.tables
            .read()
            .get(&key(table))
            .map(|t| t.next_row_id)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))
    }

    fn advance_row_id(&self, table: &str, n: u64) -> DbResult<()> {
        let mut tables = self.tables.write();
        let data = tables
            .get_mut(&key(table))
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        data.next_row_id += n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ColumnDescriptor, ColumnType};
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new(
            "Items",
            vec![ColumnDescriptor::new("id", ColumnType::Integer)],
        )
    }

    #[test]
    fn test_create_and_lookup_case_insensitive() {
        let storage = MemoryStorage::new();
        storage.create_table(schema()).unwrap();
        assert!(storage.table_exists("items"));
        assert_eq!(storage.get_schema("ITEMS").unwrap().name, "Items");
        assert!(matches!(
            storage.create_table(schema()),
            Err(DbError::TableAlreadyExists(_))
        ));
    }

    #[test]
    fn test_rowid_counter_is_monotonic() {
        let storage = MemoryStorage::new();
        storage.create_table(schema()).unwrap();
        assert_eq!(storage.next_row_id("items").unwrap(), 1);
        storage.advance_row_id("items", 3).unwrap();
        assert_eq!(storage.next_row_id("items").unwrap(), 4);
    }

    #[test]
    fn test_with_table_stamps_rowids() {
        let mut row = Row::new();
        row.insert("id".into(), json!(10));
        let storage = MemoryStorage::new().with_table(schema(), vec![row]).unwrap();
        let rows = storage.read_rows("items").unwrap();
        assert_eq!(rows[0]["rowid"], json!(1));
        assert_eq!(storage.next_row_id("items").unwrap(), 2);
    }

    #[test]
    fn test_shared_locks_stack_exclusive_refuses() {
        let storage = MemoryStorage::new();
        let t = LockTarget::Table("a".into());
        assert!(storage.lock_shared(&t));
        assert!(storage.lock_shared(&t));
        assert!(!storage.lock_exclusive(&t));
        assert!(storage.unlock(&t));
        assert!(storage.unlock(&t));
        assert!(!storage.unlock(&t));
        assert!(storage.lock_exclusive(&t));
    }
}
