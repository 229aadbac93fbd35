//! Common test utilities
//!
//! Provides shared helper functions for:
//! - Creating engines over in-memory storage
//! - Seeding the employee / department fixture
//! - Running queries and pulling out rows or single values

#![allow(dead_code)]

use flatdb::{Engine, MemoryStorage, QueryOutput, ResultSet};
use serde_json::Value;

pub fn create_test_engine() -> Engine<MemoryStorage> {
    Engine::new(MemoryStorage::new())
}

/// `employees` (6 rows, one without a department) and `depts` (3 rows, one
/// without employees).
pub fn create_seeded_engine() -> Engine<MemoryStorage> {
    let engine = create_test_engine();
    engine
        .execute_batch(
            "CREATE TABLE employees (
                 id INT PRIMARY KEY AUTO_INCREMENT,
                 name TEXT NOT NULL,
                 dept TEXT,
                 salary INT
             );
             CREATE TABLE depts (name TEXT PRIMARY KEY, floor INT);
             INSERT INTO employees (name, dept, salary) VALUES
                 ('Alice', 'eng', 120),
                 ('Bob', 'eng', 100),
                 ('Carol', 'sales', 90),
                 ('Dave', 'sales', 70),
                 ('Erin', 'ops', 80),
                 ('Frank', NULL, 60);
             INSERT INTO depts VALUES ('eng', 3), ('sales', 1), ('legal', 2);",
        )
        .expect("Failed to seed fixture");
    engine
}

pub fn run(engine: &Engine<MemoryStorage>, sql: &str) -> ResultSet {
    engine
        .query(sql)
        .unwrap_or_else(|e| panic!("Query failed: {}\n  {}", sql, e))
}

pub fn rows(engine: &Engine<MemoryStorage>, sql: &str) -> Vec<Vec<Value>> {
    run(engine, sql).rows
}

/// First column of every row
pub fn column(engine: &Engine<MemoryStorage>, sql: &str) -> Vec<Value> {
    rows(engine, sql)
        .into_iter()
        .map(|r| r.into_iter().next().unwrap_or(Value::Null))
        .collect()
}

pub fn scalar(engine: &Engine<MemoryStorage>, sql: &str) -> Value {
    column(engine, sql).into_iter().next().unwrap_or(Value::Null)
}

pub fn affected(engine: &Engine<MemoryStorage>, sql: &str) -> usize {
    match engine.execute(sql) {
        Ok(QueryOutput::Affected(n)) => n,
        other => panic!("Expected a row count from {}, got {:?}", sql, other),
    }
}
