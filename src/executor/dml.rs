//! INSERT, UPDATE and DELETE
//!
//! Every expression a statement needs (values, SET right-hand sides,
//! WHERE, subqueries) is compiled and, where constant, evaluated before the
//! target table is locked. The exclusive lock then covers one read, the
//! integrity checks and one write.

use std::collections::HashSet;

use serde_json::Value;

use super::context::StatementContext;
use super::Engine;
use crate::error::{DbError, DbResult};
use crate::sql::clauses::{matching_paren, split_top_level, Clause, ClauseMap};
use crate::sql::compiler::{CompileMode, CompiledExpression, SchemaContext};
use crate::sql::evaluator::helpers::to_bool;
use crate::sql::lexer::{render, tokenize, Token, TokenKind};
use crate::storage::{
    KeyRole, LockGuard, LockMode, LockTarget, Row, Storage, TableSchema, ROWID_COLUMN,
};

/// Compiled integrity rules of one table
struct TableRules {
    schema: TableSchema,
    /// Per column, same order as the schema
    defaults: Vec<Option<CompiledExpression>>,
    /// (constraint label, expression)
    checks: Vec<(String, CompiledExpression)>,
}

fn target_table(map: &ClauseMap, clause: Clause) -> DbResult<String> {
    map.get(clause)
        .and_then(|t| t.first())
        .map(|t| t.text.clone())
        .ok_or_else(|| DbError::syntax("Statement requires a table name"))
}

/// Reject duplicate non-null values in PRIMARY KEY and UNIQUE columns.
fn check_unique<'r>(schema: &TableSchema, rows: impl Iterator<Item = &'r Row> + Clone) -> DbResult<()> {
    for column in schema.columns.iter().filter(|c| c.key != KeyRole::None) {
        let mut seen = HashSet::new();
        for row in rows.clone() {
            let value = row.get(&column.name).unwrap_or(&Value::Null);
            if value.is_null() {
                continue;
            }
            if !seen.insert(value.to_string()) {
                let shown = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                return Err(DbError::SchemaConflict(format!(
                    "Duplicate entry '{}' for key '{}'",
                    shown, column.name
                )));
            }
        }
    }
    Ok(())
}

/// `col = expr` or `t.col = expr`
fn split_assignment(tokens: &[Token]) -> DbResult<(&Token, &[Token])> {
    let (column, rest) = match tokens {
        [q, dot, column, rest @ ..] if q.is_identifier() && dot.kind == TokenKind::Dot => {
            (column, rest)
        }
        [column, rest @ ..] => (column, rest),
        [] => return Err(DbError::syntax("Empty assignment in SET")),
    };
    match rest.split_first() {
        Some((eq, value)) if column.is_identifier() && eq.is_op("=") && !value.is_empty() => {
            Ok((column, value))
        }
        _ => Err(DbError::syntax(format!(
            "Invalid assignment in SET: {}",
            render(tokens)
        ))),
    }
}

impl<S: Storage> Engine<S> {
    fn table_rules(&self, ctx: &StatementContext, schema: TableSchema) -> DbResult<TableRules> {
        let empty = SchemaContext::empty();
        let scope = SchemaContext::single(&schema);

        let mut defaults = Vec::with_capacity(schema.columns.len());
        let mut checks = Vec::new();
        for column in &schema.columns {
            defaults.push(match &column.default {
                Some(text) => Some(self.compile(ctx, &empty, &tokenize(text), CompileMode::Strict)?),
                None => None,
            });
            if let Some(text) = &column.check {
                let compiled = self.compile(ctx, &scope, &tokenize(text), CompileMode::Strict)?;
                checks.push((column.name.clone(), compiled));
            }
        }
        for (i, text) in schema.checks.iter().enumerate() {
            let compiled = self.compile(ctx, &scope, &tokenize(text), CompileMode::Strict)?;
            checks.push((format!("{}_chk_{}", schema.name, i + 1), compiled));
        }

        Ok(TableRules {
            schema,
            defaults,
            checks,
        })
    }

    /// Coerce every column, then enforce NOT NULL and CHECK.
    fn finalize_row(&self, rules: &TableRules, row: &mut Row) -> DbResult<()> {
        for column in &rules.schema.columns {
            let value = row.remove(&column.name).unwrap_or(Value::Null);
            let value = column.data_type.coerce(value)?;
            if value.is_null() && !column.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Column '{}' cannot be null",
                    column.name
                )));
            }
            row.insert(column.name.clone(), value);
        }

        let evaluator = self.evaluator();
        for (label, check) in &rules.checks {
            let value = evaluator.evaluate(check, row)?;
            if !value.is_null() && !to_bool(&value) {
                return Err(DbError::ConstraintViolation(format!(
                    "Check constraint '{}' is violated",
                    label
                )));
            }
        }
        Ok(())
    }

    /// `(v, ..), (v, ..)`; `None` marks a DEFAULT placeholder.
    fn values_rows(
        &self,
        ctx: &StatementContext,
        tokens: &[Token],
    ) -> DbResult<Vec<Vec<Option<Value>>>> {
        let scope = SchemaContext::empty();
        let evaluator = self.evaluator();
        let mut rows = Vec::new();
        for group in split_top_level(tokens) {
            let closes = group.first().is_some_and(|t| t.kind == TokenKind::LParen)
                && matching_paren(group, 0) == Some(group.len() - 1);
            if !closes {
                return Err(DbError::syntax(format!(
                    "Expected a parenthesized value list, found {}",
                    render(group)
                )));
            }
            let mut values = Vec::new();
            for expr in split_top_level(&group[1..group.len() - 1]) {
                if let [t] = expr {
                    if t.is_keyword("DEFAULT") {
                        values.push(None);
                        continue;
                    }
                }
                let compiled = self.compile(ctx, &scope, expr, CompileMode::Strict)?;
                values.push(Some(evaluator.evaluate(&compiled, &Row::new())?));
            }
            rows.push(values);
        }
        Ok(rows)
    }

    pub(crate) fn insert(&self, ctx: &mut StatementContext, map: &ClauseMap) -> DbResult<usize> {
        let table = target_table(map, Clause::Into)?;
        ctx.set_active_table(&table);
        let schema = self.storage.get_schema(&table)?;

        let targets: Vec<usize> = match map.get(Clause::Columns) {
            Some(tokens) => {
                let mut targets = Vec::new();
                for part in split_top_level(tokens) {
                    let name = match part {
                        [t] if t.is_identifier() => &t.text,
                        _ => {
                            return Err(DbError::syntax(format!(
                                "Invalid column in INSERT: {}",
                                render(part)
                            )))
                        }
                    };
                    let index = schema
                        .columns
                        .iter()
                        .position(|c| c.name.eq_ignore_ascii_case(name))
                        .ok_or_else(|| {
                            DbError::semantic(format!("Unknown column '{}' in '{}'", name, table))
                        })?;
                    if targets.contains(&index) {
                        return Err(DbError::SchemaConflict(format!(
                            "Column '{}' specified twice",
                            name
                        )));
                    }
                    targets.push(index);
                }
                targets
            }
            None => (0..schema.columns.len()).collect(),
        };

        let source: Vec<Vec<Option<Value>>> = match (&map.sub_statement, map.get(Clause::Values)) {
            (Some(sub), _) => {
                let mut sub_ctx = StatementContext::nested(ctx.depth() + 1);
                self.select(&mut sub_ctx, sub)?
                    .rows
                    .into_iter()
                    .map(|r| r.into_iter().map(Some).collect())
                    .collect()
            }
            (None, Some(tokens)) => self.values_rows(ctx, tokens)?,
            (None, None) => return Err(DbError::syntax("INSERT requires VALUES or SELECT")),
        };
        for (i, values) in source.iter().enumerate() {
            if values.len() != targets.len() {
                return Err(DbError::semantic(format!(
                    "Column count doesn't match value count at row {}",
                    i + 1
                )));
            }
        }

        let rules = self.table_rules(ctx, schema)?;
        let evaluator = self.evaluator();

        let _guard = LockGuard::acquire(&self.storage, LockTarget::Table(table.clone()), LockMode::Exclusive)?;
        let existing = self.storage.read_rows(&table)?;
        let first_id = self.storage.next_row_id(&table)?;

        let mut new_rows = Vec::with_capacity(source.len());
        let mut next_id = first_id;
        for values in source {
            let rowid = next_id;
            let mut row = Row::new();
            for (c, column) in rules.schema.columns.iter().enumerate() {
                let provided = targets
                    .iter()
                    .position(|&t| t == c)
                    .and_then(|p| values[p].clone());
                let value = match provided {
                    Some(v) if !(v.is_null() && column.auto_increment) => v,
                    _ if column.auto_increment => Value::from(rowid),
                    _ => match &rules.defaults[c] {
                        Some(default) => evaluator.evaluate(default, &Row::new())?,
                        None => Value::Null,
                    },
                };
                row.insert(column.name.clone(), value);
            }
            self.finalize_row(&rules, &mut row)?;
            // explicit AUTO_INCREMENT values move the counter past themselves
            next_id = rules
                .schema
                .columns
                .iter()
                .filter(|c| c.auto_increment)
                .filter_map(|c| row.get(&c.name).and_then(Value::as_u64))
                .fold(rowid + 1, |next, explicit| next.max(explicit.saturating_add(1)));
            row.insert(ROWID_COLUMN.to_string(), Value::from(rowid));
            new_rows.push(row);
        }

        check_unique(&rules.schema, existing.iter().chain(new_rows.iter()))?;

        let count = new_rows.len();
        self.storage.append_rows(&table, new_rows)?;
        self.storage.advance_row_id(&table, next_id - first_id)?;
        tracing::debug!("Inserted {} rows into '{}'", count, table);
        Ok(count)
    }

    pub(crate) fn update(&self, ctx: &mut StatementContext, map: &ClauseMap) -> DbResult<usize> {
        let table = target_table(map, Clause::Table)?;
        ctx.set_active_table(&table);
        let schema = self.storage.get_schema(&table)?;
        let scope = SchemaContext::single(&schema);

        let set_tokens = map
            .get(Clause::Set)
            .ok_or_else(|| DbError::syntax("UPDATE requires a SET clause"))?;
        let mut assignments = Vec::new();
        for part in split_top_level(set_tokens) {
            let (column, value) = split_assignment(part)?;
            let name = schema
                .column(&column.text)
                .map(|c| c.name.clone())
                .ok_or_else(|| {
                    DbError::semantic(format!("Unknown column '{}' in SET", column.text))
                })?;
            let compiled = self.compile(ctx, &scope, value, CompileMode::Strict)?;
            assignments.push((name, compiled));
        }

        let filter = map
            .get(Clause::Where)
            .map(|t| self.compile(ctx, &scope, t, CompileMode::Strict))
            .transpose()?;
        let limit = map
            .get(Clause::Limit)
            .map(|t| self.constant_count(ctx, t, "LIMIT"))
            .transpose()?;
        let rules = self.table_rules(ctx, schema)?;
        let evaluator = self.evaluator();

        let _guard = LockGuard::acquire(&self.storage, LockTarget::Table(table.clone()), LockMode::Exclusive)?;
        let mut rows = self.storage.read_rows(&table)?;
        let mut affected = 0;
        for row in rows.iter_mut() {
            if limit.is_some_and(|l| affected >= l) {
                break;
            }
            if let Some(f) = &filter {
                if !evaluator.evaluate_bool(f, row)? {
                    continue;
                }
            }
            // Every right-hand side reads the row as it was before the update
            let original = row.clone();
            for (column, expr) in &assignments {
                row.insert(column.clone(), evaluator.evaluate(expr, &original)?);
            }
            self.finalize_row(&rules, row)?;
            affected += 1;
        }

        if affected > 0 {
            check_unique(&rules.schema, rows.iter())?;
            self.storage.rewrite_rows(&table, rows)?;
        }
        tracing::debug!("Updated {} rows in '{}'", affected, table);
        Ok(affected)
    }

    pub(crate) fn delete(&self, ctx: &mut StatementContext, map: &ClauseMap) -> DbResult<usize> {
        let table = target_table(map, Clause::Table)?;
        ctx.set_active_table(&table);
        let schema = self.storage.get_schema(&table)?;
        let scope = SchemaContext::single(&schema);

        let filter = map
            .get(Clause::Where)
            .map(|t| self.compile(ctx, &scope, t, CompileMode::Strict))
            .transpose()?;
        let limit = map
            .get(Clause::Limit)
            .map(|t| self.constant_count(ctx, t, "LIMIT"))
            .transpose()?;
        let evaluator = self.evaluator();

        let _guard = LockGuard::acquire(&self.storage, LockTarget::Table(table.clone()), LockMode::Exclusive)?;
        let rows = self.storage.read_rows(&table)?;
        let mut kept = Vec::with_capacity(rows.len());
        let mut removed = 0;
        for row in rows {
            let matched = !limit.is_some_and(|l| removed >= l)
                && match &filter {
                    Some(f) => evaluator.evaluate_bool(f, &row)?,
                    None => true,
                };
            if matched {
                removed += 1;
            } else {
                kept.push(row);
            }
        }

        if removed > 0 {
            self.storage.rewrite_rows(&table, kept)?;
        }
        tracing::debug!("Deleted {} rows from '{}'", removed, table);
        Ok(removed)
    }
}
