//! Join engine tests
//!
//! Inner, outer and cross joins, USING / NATURAL conditions and
//! qualified column resolution across joined tables.

mod common;

use common::*;
use flatdb::{DbError, Engine, MemoryStorage};
use serde_json::{json, Value};

fn base_and_secondary() -> Engine<MemoryStorage> {
    let engine = create_test_engine();
    engine
        .execute_batch(
            "CREATE TABLE base (id INT);
             CREATE TABLE secondary (id INT, val TEXT);
             INSERT INTO base VALUES (1), (2);
             INSERT INTO secondary VALUES (1, 'x');",
        )
        .unwrap();
    engine
}

#[test]
fn test_left_join_pads_unmatched_rows() {
    let engine = base_and_secondary();
    let out = rows(
        &engine,
        "SELECT base.id, secondary.val FROM base LEFT JOIN secondary ON base.id = secondary.id",
    );
    assert_eq!(out, vec![vec![json!(1), json!("x")], vec![json!(2), json!(null)]]);
}

#[test]
fn test_inner_join_keeps_matches_only() {
    let engine = base_and_secondary();
    let out = rows(
        &engine,
        "SELECT base.id, secondary.val FROM base INNER JOIN secondary ON base.id = secondary.id",
    );
    assert_eq!(out, vec![vec![json!(1), json!("x")]]);
}

#[test]
fn test_using_and_natural_match_on() {
    let engine = base_and_secondary();
    let expected = vec![vec![json!(1), json!("x")], vec![json!(2), json!(null)]];
    assert_eq!(
        rows(
            &engine,
            "SELECT base.id, val FROM base LEFT JOIN secondary USING (id)"
        ),
        expected
    );
    assert_eq!(
        rows(
            &engine,
            "SELECT base.id, val FROM base NATURAL LEFT JOIN secondary"
        ),
        expected
    );
}

#[test]
fn test_star_over_join_lists_every_column() {
    let engine = base_and_secondary();
    let rs = run(
        &engine,
        "SELECT * FROM base JOIN secondary ON base.id = secondary.id",
    );
    assert_eq!(rs.columns, vec!["id", "id", "val"]);
    assert_eq!(rs.rows, vec![vec![json!(1), json!(1), json!("x")]]);
}

#[test]
fn test_inner_join_with_aliases() {
    let engine = create_seeded_engine();
    let out = rows(
        &engine,
        "SELECT e.name, d.floor FROM employees e INNER JOIN depts d ON e.dept = d.name ORDER BY e.id",
    );
    assert_eq!(
        out,
        vec![
            vec![json!("Alice"), json!(3)],
            vec![json!("Bob"), json!(3)],
            vec![json!("Carol"), json!(1)],
            vec![json!("Dave"), json!(1)],
        ]
    );
}

#[test]
fn test_right_join_keeps_every_secondary_row() {
    let engine = create_seeded_engine();
    let out = rows(
        &engine,
        "SELECT d.name, e.name FROM employees e RIGHT JOIN depts d ON e.dept = d.name",
    );
    assert_eq!(out.len(), 5);
    assert!(out.contains(&vec![json!("legal"), Value::Null]));
    assert!(!out.iter().any(|r| r[1] == json!("Erin")));
}

#[test]
fn test_full_join_keeps_both_sides() {
    let engine = create_seeded_engine();
    let out = rows(
        &engine,
        "SELECT e.name, d.name FROM employees e FULL OUTER JOIN depts d ON e.dept = d.name",
    );
    assert_eq!(out.len(), 7);
    assert!(out.contains(&vec![json!("Erin"), Value::Null]));
    assert!(out.contains(&vec![json!("Frank"), Value::Null]));
    assert!(out.contains(&vec![Value::Null, json!("legal")]));
}

#[test]
fn test_cross_and_comma_joins() {
    let engine = create_seeded_engine();
    assert_eq!(
        scalar(&engine, "SELECT COUNT(*) FROM employees CROSS JOIN depts"),
        json!(18)
    );
    assert_eq!(
        scalar(&engine, "SELECT COUNT(*) FROM employees, depts"),
        json!(18)
    );
    assert_eq!(
        scalar(
            &engine,
            "SELECT COUNT(*) FROM employees e, depts d WHERE e.dept = d.name"
        ),
        json!(4)
    );
}

#[test]
fn test_self_join_keeps_sides_apart() {
    let engine = create_seeded_engine();
    let out = rows(
        &engine,
        "SELECT a.name, b.name FROM employees a JOIN employees b ON a.dept = b.dept AND a.id < b.id ORDER BY a.id",
    );
    assert_eq!(
        out,
        vec![
            vec![json!("Alice"), json!("Bob")],
            vec![json!("Carol"), json!("Dave")],
        ]
    );
}

#[test]
fn test_unqualified_name_resolves_to_first_table() {
    let engine = create_seeded_engine();
    let names = column(
        &engine,
        "SELECT name FROM employees e JOIN depts d ON e.dept = d.name WHERE d.floor = 1 ORDER BY name",
    );
    assert_eq!(names, vec![json!("Carol"), json!("Dave")]);
}

#[test]
fn test_outer_join_requires_condition() {
    let engine = create_seeded_engine();
    let err = engine
        .query("SELECT * FROM employees LEFT JOIN depts")
        .unwrap_err();
    assert!(matches!(err, DbError::SyntaxError(_)));
}

#[test]
fn test_derived_table_with_duplicate_columns_rejected() {
    let engine = create_seeded_engine();
    let err = engine
        .query("SELECT * FROM (SELECT name, name FROM depts) AS x")
        .unwrap_err();
    assert!(matches!(err, DbError::SchemaConflict(_)));
}
