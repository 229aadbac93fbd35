//! Join engine
//!
//! FROM is parsed into an ordered list of [`JoinDescriptor`]s. Execution
//! starts from the base rows and folds in one slot at a time. Intermediate
//! state is a list of row-index tuples, one entry per joined slot, `None`
//! marking a null-padded side; rows are only materialized to evaluate a
//! condition and once at the end.
//!
//! Loop order is secondary-outer, base-inner, so ties keep base row order.

use serde_json::Value;

use super::context::StatementContext;
use super::{Engine, ResultSet};
use crate::error::{DbError, DbResult};
use crate::sql::clauses::matching_paren;
use crate::sql::compiler::{CompileMode, CompiledExpression, SchemaContext, ScopeTable};
use crate::sql::lexer::{render, Token, TokenKind};
use crate::storage::{is_system_column, lock_tables, LockMode, Row, Storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Cross,
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinCondition {
    None,
    On(Vec<Token>),
    Using(Vec<String>),
    Natural,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    Table(String),
    /// Tokens of a parenthesized SELECT, parentheses stripped
    Derived(Vec<Token>),
}

/// One FROM slot
#[derive(Debug, Clone, PartialEq)]
pub struct JoinDescriptor {
    pub source: TableSource,
    /// Alias, or the table name when none was given
    pub alias: String,
    pub join_type: JoinType,
    pub condition: JoinCondition,
    pub is_base: bool,
}

impl JoinDescriptor {
    pub fn table_name(&self) -> &str {
        match &self.source {
            TableSource::Table(name) => name,
            TableSource::Derived(_) => &self.alias,
        }
    }
}

/// Words that start a join or end a table reference
const JOIN_WORDS: &[&str] = &[
    "JOIN",
    "INNER",
    "CROSS",
    "LEFT",
    "RIGHT",
    "FULL",
    "OUTER",
    "NATURAL",
    "STRAIGHT_JOIN",
    "ON",
    "USING",
];

/// A materialized FROM slot
#[derive(Debug, Clone)]
pub(crate) struct Relation {
    pub table: ScopeTable,
    pub rows: Vec<Row>,
}

/// Parse a FROM clause body.
pub fn parse_from(tokens: &[Token]) -> DbResult<Vec<JoinDescriptor>> {
    if tokens.is_empty() {
        return Err(DbError::syntax("FROM requires a table"));
    }

    let mut descriptors = Vec::new();
    let (source, alias, mut pos) = parse_source(tokens, 0)?;
    descriptors.push(JoinDescriptor {
        source,
        alias,
        join_type: JoinType::Cross,
        condition: JoinCondition::None,
        is_base: true,
    });

    while pos < tokens.len() {
        let (join_type, natural, next) = if tokens[pos].kind == TokenKind::Comma {
            (JoinType::Cross, false, pos + 1)
        } else {
            parse_join_keyword(tokens, pos)?
        };
        let (source, alias, next) = parse_source(tokens, next)?;
        pos = next;

        let condition = if natural {
            JoinCondition::Natural
        } else if tokens.get(pos).is_some_and(|t| t.is_keyword("ON")) {
            let end = condition_end(tokens, pos + 1);
            let body = tokens[pos + 1..end].to_vec();
            if body.is_empty() {
                return Err(DbError::syntax("ON requires a join condition"));
            }
            pos = end;
            JoinCondition::On(body)
        } else if tokens.get(pos).is_some_and(|t| t.is_keyword("USING")) {
            let (names, next) = parse_using(tokens, pos + 1)?;
            pos = next;
            JoinCondition::Using(names)
        } else {
            JoinCondition::None
        };

        if join_type == JoinType::Cross && condition != JoinCondition::None {
            return Err(DbError::syntax("CROSS JOIN does not take a join condition"));
        }
        if matches!(join_type, JoinType::Left | JoinType::Right | JoinType::Full)
            && condition == JoinCondition::None
        {
            return Err(DbError::syntax(format!(
                "{:?} JOIN requires ON, USING or NATURAL",
                join_type
            )));
        }

        descriptors.push(JoinDescriptor {
            source,
            alias,
            join_type,
            condition,
            is_base: false,
        });
    }

    Ok(descriptors)
}

fn parse_source(tokens: &[Token], start: usize) -> DbResult<(TableSource, String, usize)> {
    let first = tokens
        .get(start)
        .ok_or_else(|| DbError::syntax("Expected a table reference"))?;

    let (source, mut pos) = if first.kind == TokenKind::LParen {
        let close = matching_paren(tokens, start)
            .ok_or_else(|| DbError::syntax("Unclosed derived table"))?;
        let inner = &tokens[start + 1..close];
        if !inner.first().is_some_and(|t| t.is_keyword("SELECT")) {
            return Err(DbError::syntax("Parenthesized FROM item must be a SELECT"));
        }
        (TableSource::Derived(inner.to_vec()), close + 1)
    } else if first.is_identifier() && !is_join_word(first) {
        (TableSource::Table(first.text.clone()), start + 1)
    } else {
        return Err(DbError::syntax(format!(
            "Expected a table reference, found '{}'",
            first.text
        )));
    };

    let mut alias = None;
    if tokens.get(pos).is_some_and(|t| t.is_keyword("AS")) {
        pos += 1;
        let token = tokens
            .get(pos)
            .filter(|t| t.is_identifier())
            .ok_or_else(|| DbError::syntax("AS requires an alias"))?;
        alias = Some(token.text.clone());
        pos += 1;
    } else if let Some(token) = tokens.get(pos).filter(|t| t.is_identifier() && !is_join_word(t)) {
        alias = Some(token.text.clone());
        pos += 1;
    }

    let alias = match (&source, alias) {
        (_, Some(a)) => a,
        (TableSource::Table(name), None) => name.clone(),
        (TableSource::Derived(_), None) => {
            return Err(DbError::syntax("Every derived table must have an alias"))
        }
    };
    Ok((source, alias, pos))
}

fn is_join_word(token: &Token) -> bool {
    token.kind == TokenKind::Word && token.is_any_keyword(JOIN_WORDS)
}

/// `[NATURAL] [INNER | CROSS | LEFT [OUTER] | RIGHT [OUTER] | FULL [OUTER]] JOIN`
fn parse_join_keyword(tokens: &[Token], start: usize) -> DbResult<(JoinType, bool, usize)> {
    let mut pos = start;
    let natural = tokens.get(pos).is_some_and(|t| t.is_keyword("NATURAL"));
    if natural {
        pos += 1;
    }

    if tokens.get(pos).is_some_and(|t| t.is_keyword("STRAIGHT_JOIN")) && !natural {
        return Ok((JoinType::Inner, false, pos + 1));
    }

    let mut join_type = JoinType::Inner;
    if let Some(token) = tokens.get(pos) {
        let kind = match token.upper().as_str() {
            "INNER" => Some(JoinType::Inner),
            "CROSS" => Some(JoinType::Cross),
            "LEFT" => Some(JoinType::Left),
            "RIGHT" => Some(JoinType::Right),
            "FULL" => Some(JoinType::Full),
            _ => None,
        };
        if let Some(kind) = kind.filter(|_| token.kind == TokenKind::Word) {
            join_type = kind;
            pos += 1;
            if matches!(kind, JoinType::Left | JoinType::Right | JoinType::Full)
                && tokens.get(pos).is_some_and(|t| t.is_keyword("OUTER"))
            {
                pos += 1;
            }
        }
    }

    match tokens.get(pos) {
        Some(t) if t.is_keyword("JOIN") => Ok((join_type, natural, pos + 1)),
        Some(t) => Err(DbError::syntax(format!(
            "Expected JOIN in FROM clause, found '{}'",
            t.text
        ))),
        None => Err(DbError::syntax("Expected JOIN at end of FROM clause")),
    }
}

/// End of an ON condition: the next depth-zero comma or join keyword.
fn condition_end(tokens: &[Token], start: usize) -> usize {
    let mut depth = 0i64;
    for (i, token) in tokens.iter().enumerate().skip(start) {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth -= 1,
            TokenKind::Comma if depth == 0 => return i,
            TokenKind::Word if depth == 0 => {
                let starts_join = token.is_any_keyword(&[
                    "JOIN",
                    "INNER",
                    "CROSS",
                    "LEFT",
                    "RIGHT",
                    "FULL",
                    "NATURAL",
                    "STRAIGHT_JOIN",
                ]);
                // LEFT(..) and RIGHT(..) are string functions
                let is_call = tokens
                    .get(i + 1)
                    .is_some_and(|t| t.kind == TokenKind::LParen);
                if starts_join && !(is_call && token.is_any_keyword(&["LEFT", "RIGHT"])) {
                    return i;
                }
            }
            _ => {}
        }
    }
    tokens.len()
}

fn parse_using(tokens: &[Token], start: usize) -> DbResult<(Vec<String>, usize)> {
    if !tokens.get(start).is_some_and(|t| t.kind == TokenKind::LParen) {
        return Err(DbError::syntax("USING requires a parenthesized column list"));
    }
    let close = matching_paren(tokens, start)
        .ok_or_else(|| DbError::syntax("Unclosed USING column list"))?;
    let mut names = Vec::new();
    for part in crate::sql::clauses::split_top_level(&tokens[start + 1..close]) {
        match part {
            [t] if t.is_identifier() => names.push(t.text.clone()),
            _ => {
                return Err(DbError::syntax(format!(
                    "Invalid column in USING: {}",
                    render(part)
                )))
            }
        }
    }
    if names.is_empty() {
        return Err(DbError::syntax("USING requires at least one column"));
    }
    Ok((names, close + 1))
}

fn row_value(row: &Row, column: &str) -> Value {
    row.get(column)
        .or_else(|| {
            row.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(column))
                .map(|(_, v)| v)
        })
        .cloned()
        .unwrap_or(Value::Null)
}

/// Build the row for one tuple: correlation keys for every joined slot,
/// then native column names, first slot wins.
fn combine(scope: &SchemaContext, relations: &[Relation], tuple: &[Option<usize>]) -> Row {
    let mut row = Row::new();
    for (i, slot) in tuple.iter().enumerate() {
        let relation = &relations[i];
        for column in &relation.table.columns {
            let value = slot
                .map(|r| row_value(&relation.rows[r], column))
                .unwrap_or(Value::Null);
            row.insert(scope.key(i, column), value);
        }
    }
    for (i, slot) in tuple.iter().enumerate() {
        let relation = &relations[i];
        for column in &relation.table.columns {
            if !row.contains_key(column) {
                let value = slot
                    .map(|r| row_value(&relation.rows[r], column))
                    .unwrap_or(Value::Null);
                row.insert(column.clone(), value);
            }
        }
    }
    row
}

fn extended(tuple: &[Option<usize>], slot: Option<usize>) -> Vec<Option<usize>> {
    let mut next = Vec::with_capacity(tuple.len() + 1);
    next.extend_from_slice(tuple);
    next.push(slot);
    next
}

impl<S: Storage> Engine<S> {
    /// Materialize every FROM slot. Derived tables run first; base tables
    /// are then read together under shared locks released on return.
    pub(crate) fn load_sources(
        &self,
        ctx: &mut StatementContext,
        descriptors: &[JoinDescriptor],
    ) -> DbResult<Vec<Relation>> {
        for d in descriptors {
            ctx.register_alias(&d.alias, d.table_name())?;
        }
        if let [only] = descriptors {
            ctx.set_active_table(only.table_name());
        }

        let mut derived: Vec<Option<ResultSet>> = Vec::with_capacity(descriptors.len());
        for d in descriptors {
            derived.push(match &d.source {
                TableSource::Derived(tokens) => Some(self.run_nested(ctx, tokens)?),
                TableSource::Table(_) => None,
            });
        }

        let names: Vec<String> = descriptors
            .iter()
            .filter_map(|d| match &d.source {
                TableSource::Table(name) => Some(name.clone()),
                TableSource::Derived(_) => None,
            })
            .collect();
        let _guards = lock_tables(&self.storage, &names, LockMode::Shared)?;

        let mut relations = Vec::with_capacity(descriptors.len());
        for (d, result) in descriptors.iter().zip(derived) {
            let relation = match (&d.source, result) {
                (TableSource::Table(name), _) => {
                    let schema = self.storage.get_schema(name)?;
                    let rows = self.storage.read_rows(name)?;
                    Relation {
                        table: ScopeTable::from_schema(&schema, Some(d.alias.clone())),
                        rows,
                    }
                }
                (TableSource::Derived(_), Some(result)) => {
                    for (i, column) in result.columns.iter().enumerate() {
                        if result.columns[..i]
                            .iter()
                            .any(|c| c.eq_ignore_ascii_case(column))
                        {
                            return Err(DbError::SchemaConflict(format!(
                                "Duplicate column name '{}' in derived table '{}'",
                                column, d.alias
                            )));
                        }
                    }
                    Relation {
                        table: ScopeTable::new(
                            d.alias.clone(),
                            Some(d.alias.clone()),
                            result.columns.clone(),
                        ),
                        rows: result.to_rows(),
                    }
                }
                (TableSource::Derived(_), None) => {
                    return Err(DbError::semantic(format!(
                        "Derived table '{}' was not materialized",
                        d.alias
                    )))
                }
            };
            tracing::debug!(
                "Loaded {} rows from '{}'",
                relation.rows.len(),
                relation.table.alias
            );
            relations.push(relation);
        }
        Ok(relations)
    }

    /// Fold every slot into the base rows and return the combined rows.
    pub(crate) fn join_relations(
        &self,
        ctx: &StatementContext,
        scope: &SchemaContext,
        descriptors: &[JoinDescriptor],
        relations: &[Relation],
    ) -> DbResult<Vec<Row>> {
        let Some(base) = relations.first() else {
            return Ok(vec![Row::new()]);
        };
        if relations.len() == 1 {
            return Ok(base.rows.clone());
        }

        let evaluator = self.evaluator();
        let mut state: Vec<Vec<Option<usize>>> =
            (0..base.rows.len()).map(|i| vec![Some(i)]).collect();

        for (k, descriptor) in descriptors.iter().enumerate().skip(1) {
            let condition = self.join_condition(ctx, scope, descriptor, relations, k)?;
            let secondary = relations[k].rows.len();
            let matches = |tuple: &[Option<usize>], j: usize| -> DbResult<bool> {
                match &condition {
                    None => Ok(true),
                    Some(c) => {
                        let row = combine(scope, relations, &extended(tuple, Some(j)));
                        evaluator.evaluate_bool(c, &row)
                    }
                }
            };

            let mut next = Vec::new();
            match descriptor.join_type {
                JoinType::Cross | JoinType::Inner => {
                    for j in 0..secondary {
                        for tuple in &state {
                            if matches(tuple, j)? {
                                next.push(extended(tuple, Some(j)));
                            }
                        }
                    }
                }
                JoinType::Left | JoinType::Full => {
                    let mut base_matched = vec![false; state.len()];
                    let mut secondary_matched = vec![false; secondary];
                    for j in 0..secondary {
                        for (b, tuple) in state.iter().enumerate() {
                            if matches(tuple, j)? {
                                next.push(extended(tuple, Some(j)));
                                base_matched[b] = true;
                                secondary_matched[j] = true;
                            }
                        }
                    }
                    for (tuple, matched) in state.iter().zip(&base_matched) {
                        if !matched {
                            next.push(extended(tuple, None));
                        }
                    }
                    if descriptor.join_type == JoinType::Full {
                        for (j, matched) in secondary_matched.iter().enumerate() {
                            if !matched {
                                next.push(extended(&vec![None; k], Some(j)));
                            }
                        }
                    }
                }
                JoinType::Right => {
                    let mut secondary_matched = vec![false; secondary];
                    for tuple in &state {
                        for (j, matched) in secondary_matched.iter_mut().enumerate() {
                            if matches(tuple, j)? {
                                next.push(extended(tuple, Some(j)));
                                *matched = true;
                            }
                        }
                    }
                    for (j, matched) in secondary_matched.iter().enumerate() {
                        if !matched {
                            next.push(extended(&vec![None; k], Some(j)));
                        }
                    }
                }
            }

            tracing::debug!(
                "{:?} join with '{}' produced {} rows",
                descriptor.join_type,
                descriptor.alias,
                next.len()
            );
            state = next;
        }

        Ok(state
            .iter()
            .map(|tuple| combine(scope, relations, tuple))
            .collect())
    }

    fn join_condition(
        &self,
        ctx: &StatementContext,
        scope: &SchemaContext,
        descriptor: &JoinDescriptor,
        relations: &[Relation],
        k: usize,
    ) -> DbResult<Option<CompiledExpression>> {
        let columns: Vec<String> = match &descriptor.condition {
            JoinCondition::None => return Ok(None),
            JoinCondition::On(tokens) => {
                return self
                    .compile(ctx, scope, tokens, CompileMode::Permissive)
                    .map(Some)
            }
            JoinCondition::Using(names) => names.clone(),
            JoinCondition::Natural => relations[k]
                .table
                .columns
                .iter()
                .filter(|c| !is_system_column(c))
                .filter(|c| {
                    relations[..k]
                        .iter()
                        .any(|r| r.table.column(c).is_some())
                })
                .cloned()
                .collect(),
        };
        if columns.is_empty() {
            return Ok(None);
        }

        let mut tokens = Vec::new();
        for name in &columns {
            let right = relations[k].table.column(name).ok_or_else(|| {
                DbError::semantic(format!(
                    "Unknown column '{}' in USING for '{}'",
                    name, descriptor.alias
                ))
            })?;
            let (left_index, left) = relations[..k]
                .iter()
                .enumerate()
                .find_map(|(i, r)| r.table.column(name).map(|c| (i, c)))
                .ok_or_else(|| {
                    DbError::semantic(format!("Unknown column '{}' in USING", name))
                })?;
            if !tokens.is_empty() {
                tokens.push(Token::op("&&"));
            }
            tokens.push(Token::column(scope.key(left_index, left)));
            tokens.push(Token::op("=="));
            tokens.push(Token::column(scope.key(k, right)));
        }
        self.compile(ctx, scope, &tokens, CompileMode::Permissive)
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::lexer::tokenize;

    fn from(sql: &str) -> Vec<JoinDescriptor> {
        parse_from(&tokenize(sql)).unwrap()
    }

    #[test]
    fn test_aliases_and_comma_join() {
        let d = from("users u, orders AS o");
        assert_eq!(d.len(), 2);
        assert!(d[0].is_base);
        assert_eq!(d[0].alias, "u");
        assert_eq!(d[1].alias, "o");
        assert_eq!(d[1].join_type, JoinType::Cross);
        assert_eq!(d[1].source, TableSource::Table("orders".into()));
    }

    #[test]
    fn test_join_kinds() {
        let d = from("a LEFT OUTER JOIN b ON a.id = b.id RIGHT JOIN c USING (id) NATURAL JOIN d FULL JOIN e ON LEFT(e.x, 1) = 'q'");
        let kinds: Vec<JoinType> = d.iter().skip(1).map(|j| j.join_type).collect();
        assert_eq!(
            kinds,
            vec![JoinType::Left, JoinType::Right, JoinType::Inner, JoinType::Full]
        );
        assert_eq!(render_condition(&d[1]), "a.id = b.id");
        assert_eq!(d[2].condition, JoinCondition::Using(vec!["id".into()]));
        assert_eq!(d[3].condition, JoinCondition::Natural);
        assert_eq!(render_condition(&d[4]), "LEFT(e.x, 1) = 'q'");
    }

    fn render_condition(d: &JoinDescriptor) -> String {
        match &d.condition {
            JoinCondition::On(tokens) => render(tokens),
            other => format!("{:?}", other),
        }
    }

    #[test]
    fn test_derived_table_needs_alias() {
        let d = from("(SELECT id FROM t) AS x JOIN y ON x.id = y.id");
        assert!(matches!(d[0].source, TableSource::Derived(_)));
        assert_eq!(d[0].alias, "x");
        assert!(parse_from(&tokenize("(SELECT id FROM t)")).is_err());
    }

    #[test]
    fn test_outer_join_requires_condition() {
        let err = parse_from(&tokenize("a LEFT JOIN b")).unwrap_err();
        assert!(matches!(err, DbError::SyntaxError(_)));
        assert!(parse_from(&tokenize("a CROSS JOIN b ON a.x = b.x")).is_err());
        assert!(parse_from(&tokenize("a JOIN")).is_err());
    }
}
