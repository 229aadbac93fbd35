//! UNION / INTERSECT / EXCEPT tests

mod common;

use common::*;
use flatdb::DbError;
use serde_json::json;

#[test]
fn test_union_deduplicates_union_all_does_not() {
    let engine = create_test_engine();
    let union = rows(&engine, "SELECT 1 AS a UNION SELECT 1");
    assert_eq!(union, vec![vec![json!(1)]]);
    let union_all = rows(&engine, "SELECT 1 AS a UNION ALL SELECT 1");
    assert_eq!(union_all, vec![vec![json!(1)], vec![json!(1)]]);
}

#[test]
fn test_column_count_mismatch_always_fails() {
    let engine = create_test_engine();
    for op in ["UNION", "UNION ALL", "INTERSECT", "EXCEPT", "INTERSECT ALL", "EXCEPT ALL"] {
        let sql = format!("SELECT 1 {} SELECT 1, 2", op);
        let err = engine.query(&sql).unwrap_err();
        assert!(matches!(err, DbError::SemanticError(_)), "{}", sql);
    }
}

#[test]
fn test_result_takes_left_column_names() {
    let engine = create_seeded_engine();
    let rs = run(
        &engine,
        "SELECT name AS label FROM depts UNION SELECT dept FROM employees",
    );
    assert_eq!(rs.columns, vec!["label"]);
    assert_eq!(rs.len(), 5);
}

#[test]
fn test_intersect_and_except() {
    let engine = create_seeded_engine();
    let both = column(
        &engine,
        "SELECT dept FROM employees INTERSECT SELECT name FROM depts",
    );
    assert_eq!(both, vec![json!("eng"), json!("sales")]);

    let only_depts = column(
        &engine,
        "SELECT name FROM depts EXCEPT SELECT dept FROM employees",
    );
    assert_eq!(only_depts, vec![json!("legal")]);
}

#[test]
fn test_except_drops_rows_matched_anywhere_on_the_right() {
    let engine = create_test_engine();
    engine
        .execute_batch(
            "CREATE TABLE l (a INT);
             CREATE TABLE r (a INT);
             INSERT INTO l VALUES (1), (2), (3);
             INSERT INTO r VALUES (9), (2), (8);",
        )
        .unwrap();
    let out = column(&engine, "SELECT a FROM l EXCEPT SELECT a FROM r");
    assert_eq!(out, vec![json!(1), json!(3)]);
}

#[test]
fn test_trailing_order_and_limit_apply_to_whole_compound() {
    let engine = create_seeded_engine();
    let ordered = column(
        &engine,
        "SELECT name FROM depts UNION SELECT dept FROM employees ORDER BY 1",
    );
    assert_eq!(
        ordered,
        vec![
            json!(null),
            json!("eng"),
            json!("legal"),
            json!("ops"),
            json!("sales")
        ]
    );

    let limited = column(
        &engine,
        "SELECT name FROM depts UNION (SELECT dept FROM employees) ORDER BY name DESC LIMIT 2",
    );
    assert_eq!(limited, vec![json!("sales"), json!("ops")]);
}

#[test]
fn test_operands_have_independent_aliases() {
    let engine = create_seeded_engine();
    let out = column(
        &engine,
        "SELECT x.name FROM employees x WHERE x.id = 1 UNION SELECT x.name FROM depts x WHERE x.floor = 2",
    );
    assert_eq!(out, vec![json!("Alice"), json!("legal")]);
}

#[test]
fn test_chained_operators_fold_left_to_right() {
    let engine = create_test_engine();
    let out = column(
        &engine,
        "SELECT 1 UNION SELECT 2 UNION SELECT 3 EXCEPT SELECT 2",
    );
    assert_eq!(out, vec![json!(1), json!(3)]);
}
