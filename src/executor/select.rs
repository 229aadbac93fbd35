//! SELECT builder
//!
//! Stages run in a fixed order: FROM (join engine), WHERE, GROUP BY with
//! aggregates, projection, HAVING, DISTINCT, ORDER BY, then LIMIT/OFFSET.
//! Compound SELECTs run each operand with its own context and fold them
//! left to right through the set-operation combinator.

use std::cmp::Ordering;

use serde_json::Value;

use super::aggregation::{aggregate_groups, group_rows};
use super::context::StatementContext;
use super::join::parse_from;
use super::set_ops::{combine, rows_equal};
use super::{Engine, NestedSelect, ResultSet};
use crate::error::{DbError, DbResult};
use crate::sql::clauses::{split_top_level, Clause, ClauseMap};
use crate::sql::compiler::{
    AggregateBinder, CompileMode, CompiledExpression, ExpressionCompiler, SchemaContext,
    ScopeTable,
};
use crate::sql::evaluator::helpers::{sort_order, to_number};
use crate::sql::lexer::{render, Token, TokenKind};
use crate::storage::{is_system_column, Row, Storage};

/// Words that cannot be a bare column alias
const ALIAS_BLOCKERS: &[&str] = &[
    "END", "NULL", "TRUE", "FALSE", "UNKNOWN", "AND", "OR", "NOT", "IS", "IN", "LIKE",
    "BETWEEN", "ELSE", "THEN", "WHEN", "CASE", "DISTINCT", "REGEXP", "RLIKE", "ESCAPE", "DIV",
    "MOD", "XOR", "ANY", "SOME", "ALL", "EXISTS", "AS", "SELECT",
];

#[derive(Debug, Clone, PartialEq)]
enum SelectItem {
    /// `*` or `qualifier.*`
    Star(Option<String>),
    Expr {
        tokens: Vec<Token>,
        name: String,
        alias: Option<String>,
    },
}

enum Projection {
    /// (output name, row key) per expanded column
    Columns(Vec<(String, String)>),
    Expr {
        name: String,
        alias: Option<String>,
        compiled: CompiledExpression,
    },
}

enum OrderTarget {
    /// 0-based output column
    Position(usize),
    Expr(CompiledExpression),
}

struct OrderKey {
    target: OrderTarget,
    descending: bool,
}

/// A projected row plus the row its ORDER BY keys are read from
struct Projected {
    values: Vec<Value>,
    source: Row,
}

fn may_be_alias(token: &Token) -> bool {
    match token.kind {
        TokenKind::QuotedIdent => true,
        TokenKind::Word => !token.is_any_keyword(ALIAS_BLOCKERS),
        _ => false,
    }
}

fn ends_operand(token: &Token) -> bool {
    match token.kind {
        TokenKind::Word => !token.is_any_keyword(ALIAS_BLOCKERS),
        TokenKind::QuotedIdent
        | TokenKind::Number
        | TokenKind::String
        | TokenKind::RParen
        | TokenKind::Column => true,
        _ => false,
    }
}

fn parse_select_item(tokens: &[Token]) -> DbResult<SelectItem> {
    match tokens {
        [] => return Err(DbError::syntax("Empty item in SELECT list")),
        [star] if star.is_op("*") => return Ok(SelectItem::Star(None)),
        [q, dot, star] if q.is_identifier() && dot.kind == TokenKind::Dot && star.is_op("*") => {
            return Ok(SelectItem::Star(Some(q.text.clone())))
        }
        _ => {}
    }

    let n = tokens.len();
    let (expr, alias) = if n >= 3 && tokens[n - 2].is_keyword("AS") {
        let alias = &tokens[n - 1];
        if !(alias.is_identifier() || alias.kind == TokenKind::String) {
            return Err(DbError::syntax(format!("Invalid alias '{}'", alias.text)));
        }
        (&tokens[..n - 2], Some(alias.text.clone()))
    } else if n >= 2 && may_be_alias(&tokens[n - 1]) && ends_operand(&tokens[n - 2]) {
        (&tokens[..n - 1], Some(tokens[n - 1].text.clone()))
    } else {
        (tokens, None)
    };

    let name = match expr {
        [ident] if ident.is_identifier() => ident.text.clone(),
        [q, dot, ident] if q.is_identifier() && dot.kind == TokenKind::Dot && ident.is_identifier() => {
            ident.text.clone()
        }
        _ => render(expr),
    };
    Ok(SelectItem::Expr {
        tokens: expr.to_vec(),
        name,
        alias,
    })
}

fn strip_direction(tokens: &[Token]) -> (&[Token], bool) {
    match tokens.split_last() {
        Some((last, rest)) if last.is_keyword("DESC") => (rest, true),
        Some((last, rest)) if last.is_keyword("ASC") => (rest, false),
        _ => (tokens, false),
    }
}

/// A 1-based position written as a bare integer.
fn position(tokens: &[Token]) -> Option<usize> {
    match tokens {
        [t] if t.kind == TokenKind::Number => t.text.parse::<usize>().ok(),
        _ => None,
    }
}

fn fetch(row: &Row, key: &str) -> Value {
    row.get(key)
        .or_else(|| {
            row.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
        .cloned()
        .unwrap_or(Value::Null)
}

fn compare_keys(a: &[Value], b: &[Value], order: &[OrderKey]) -> Ordering {
    for ((x, y), key) in a.iter().zip(b).zip(order) {
        let ord = sort_order(x, y);
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl<S: Storage> Engine<S> {
    pub(crate) fn select(&self, ctx: &mut StatementContext, map: &ClauseMap) -> DbResult<ResultSet> {
        let mut result = self.simple_select(ctx, map)?;
        if map.compound.is_empty() {
            return Ok(result);
        }

        for part in &map.compound {
            let mut operand_ctx = StatementContext::nested(ctx.depth());
            let right = self.select(&mut operand_ctx, &part.select)?;
            result = combine(result, part.op, part.all, right)?;
        }
        self.finish_compound(ctx, map, result)
    }

    /// ORDER BY / LIMIT / OFFSET over a compound result, by column name or
    /// position.
    fn finish_compound(
        &self,
        ctx: &StatementContext,
        map: &ClauseMap,
        result: ResultSet,
    ) -> DbResult<ResultSet> {
        let scope = SchemaContext::from_tables(vec![ScopeTable::new(
            "",
            None,
            result.columns.clone(),
        )]);
        let order = match map.compound_clause(Clause::OrderBy) {
            Some(tokens) => self.order_keys(ctx, &scope, tokens, result.columns.len(), None)?,
            None => Vec::new(),
        };
        let (limit, offset) = self.limit_offset(
            ctx,
            map.compound_clause(Clause::Limit),
            map.compound_clause(Clause::Offset),
        )?;

        let sources = result.to_rows();
        let projected: Vec<Projected> = result
            .rows
            .into_iter()
            .zip(sources)
            .map(|(values, source)| Projected { values, source })
            .collect();
        let rows = self.order_and_limit(projected, &order, limit, offset)?;
        Ok(ResultSet::new(result.columns, rows))
    }

    fn simple_select(&self, ctx: &mut StatementContext, map: &ClauseMap) -> DbResult<ResultSet> {
        let (descriptors, relations) = match map.get(Clause::From) {
            Some(tokens) => {
                let descriptors = parse_from(tokens)?;
                let relations = self.load_sources(ctx, &descriptors)?;
                (descriptors, relations)
            }
            None => (Vec::new(), Vec::new()),
        };
        let scope =
            SchemaContext::from_tables(relations.iter().map(|r| r.table.clone()).collect());

        let select_tokens = map
            .get(Clause::Select)
            .ok_or_else(|| DbError::syntax("SELECT requires at least one column"))?;
        let items = split_top_level(select_tokens)
            .into_iter()
            .map(parse_select_item)
            .collect::<DbResult<Vec<_>>>()?;
        let aliases: Vec<String> = items
            .iter()
            .filter_map(|item| match item {
                SelectItem::Expr { alias, .. } => alias.clone(),
                SelectItem::Star(_) => None,
            })
            .collect();
        let alias_scope = scope.clone().with_extras(aliases);

        let filter = map
            .get(Clause::Where)
            .map(|tokens| self.compile(ctx, &scope, tokens, CompileMode::Strict))
            .transpose()?;

        let mut binder = AggregateBinder::new();
        let mut projections = Vec::with_capacity(items.len());
        for item in &items {
            projections.push(match item {
                SelectItem::Star(qualifier) => {
                    Projection::Columns(expand_star(&scope, qualifier.as_deref())?)
                }
                SelectItem::Expr {
                    tokens,
                    name,
                    alias,
                } => Projection::Expr {
                    name: name.clone(),
                    alias: alias.clone(),
                    compiled: self.compile_bound(
                        ctx,
                        &scope,
                        tokens,
                        CompileMode::Strict,
                        &mut binder,
                    )?,
                },
            });
        }
        let columns: Vec<String> = projections
            .iter()
            .flat_map(|p| match p {
                Projection::Columns(cols) => cols.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>(),
                Projection::Expr { name, alias, .. } => {
                    vec![alias.clone().unwrap_or_else(|| name.clone())]
                }
            })
            .collect();

        let having = map
            .get(Clause::Having)
            .map(|tokens| {
                self.compile_bound(ctx, &alias_scope, tokens, CompileMode::Permissive, &mut binder)
            })
            .transpose()?;
        let order = match map.get(Clause::OrderBy) {
            Some(tokens) => {
                self.order_keys(ctx, &alias_scope, tokens, columns.len(), Some(&mut binder))?
            }
            None => Vec::new(),
        };
        let group_keys = match map.get(Clause::GroupBy) {
            Some(tokens) => self.group_keys(ctx, &scope, tokens, &items)?,
            None => Vec::new(),
        };
        let (limit, offset) =
            self.limit_offset(ctx, map.get(Clause::Limit), map.get(Clause::Offset))?;

        let evaluator = self.evaluator();
        let joined = self.join_relations(ctx, &scope, &descriptors, &relations)?;
        let mut rows = Vec::with_capacity(joined.len());
        for row in joined {
            let keep = match &filter {
                Some(f) => evaluator.evaluate_bool(f, &row)?,
                None => true,
            };
            if keep {
                rows.push(row);
            }
        }
        tracing::debug!("WHERE kept {} rows", rows.len());

        let grouped = map.has(Clause::GroupBy) || !binder.is_empty();
        let rows = if grouped {
            let groups = if group_keys.is_empty() {
                vec![(0..rows.len()).collect()]
            } else {
                group_rows(&evaluator, &rows, &group_keys)?
            };
            let calls: Vec<_> = binder
                .calls()
                .iter()
                .map(|call| {
                    (
                        call.clone(),
                        call.argument.clone().map(CompiledExpression::from_bound),
                    )
                })
                .collect();
            aggregate_groups(&evaluator, &rows, &groups, &calls, self.config.avg_scale)?
        } else {
            rows
        };

        let mut projected = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(columns.len());
            let mut aliased = Vec::new();
            for projection in &projections {
                match projection {
                    Projection::Columns(cols) => {
                        values.extend(cols.iter().map(|(_, key)| fetch(&row, key)));
                    }
                    Projection::Expr {
                        alias, compiled, ..
                    } => {
                        let value = evaluator.evaluate(compiled, &row)?;
                        if let Some(alias) = alias {
                            aliased.push((alias.clone(), value.clone()));
                        }
                        values.push(value);
                    }
                }
            }
            let mut source = row;
            for (alias, value) in aliased {
                source.insert(alias, value);
            }
            if let Some(h) = &having {
                if !evaluator.evaluate_bool(h, &source)? {
                    continue;
                }
            }
            projected.push(Projected { values, source });
        }

        if map.distinct {
            let mut kept: Vec<Projected> = Vec::with_capacity(projected.len());
            for p in projected {
                if !kept.iter().any(|k| rows_equal(&k.values, &p.values)) {
                    kept.push(p);
                }
            }
            projected = kept;
        }

        let rows = self.order_and_limit(projected, &order, limit, offset)?;
        tracing::debug!("SELECT returned {} rows", rows.len());
        Ok(ResultSet::new(columns, rows))
    }

    fn compile_bound(
        &self,
        ctx: &StatementContext,
        scope: &SchemaContext,
        tokens: &[Token],
        mode: CompileMode,
        binder: &mut AggregateBinder,
    ) -> DbResult<CompiledExpression> {
        let runner = NestedSelect::new(self, ctx.depth());
        ExpressionCompiler::new(scope)
            .mode(mode)
            .with_subqueries(&runner)
            .with_aggregates(binder)
            .compile(tokens)
    }

    fn order_keys(
        &self,
        ctx: &StatementContext,
        scope: &SchemaContext,
        tokens: &[Token],
        column_count: usize,
        mut binder: Option<&mut AggregateBinder>,
    ) -> DbResult<Vec<OrderKey>> {
        let mut keys = Vec::new();
        for part in split_top_level(tokens) {
            let (expr, descending) = strip_direction(part);
            if expr.is_empty() {
                return Err(DbError::syntax("Empty item in ORDER BY"));
            }
            let target = match position(expr) {
                Some(p) if p >= 1 && p <= column_count => OrderTarget::Position(p - 1),
                Some(p) => {
                    return Err(DbError::semantic(format!(
                        "Unknown column '{}' in ORDER BY",
                        p
                    )))
                }
                None => OrderTarget::Expr(match binder.as_deref_mut() {
                    Some(b) => self.compile_bound(ctx, scope, expr, CompileMode::Strict, b)?,
                    None => self.compile(ctx, scope, expr, CompileMode::Strict)?,
                }),
            };
            keys.push(OrderKey { target, descending });
        }
        Ok(keys)
    }

    /// GROUP BY items: expressions, 1-based positions into the SELECT list,
    /// or SELECT aliases that do not name a column.
    fn group_keys(
        &self,
        ctx: &StatementContext,
        scope: &SchemaContext,
        tokens: &[Token],
        items: &[SelectItem],
    ) -> DbResult<Vec<CompiledExpression>> {
        let mut keys = Vec::new();
        for part in split_top_level(tokens) {
            let (part, _) = strip_direction(part);
            let expr: &[Token] = if let Some(p) = position(part) {
                match items.get(p.wrapping_sub(1)) {
                    Some(SelectItem::Expr { tokens, .. }) => tokens,
                    Some(SelectItem::Star(_)) | None => {
                        return Err(DbError::semantic(format!(
                            "Unknown column '{}' in GROUP BY",
                            p
                        )))
                    }
                }
            } else {
                match part {
                    [ident] if ident.is_identifier() && scope.resolve(None, &ident.text).is_none() => {
                        items
                            .iter()
                            .find_map(|item| match item {
                                SelectItem::Expr {
                                    tokens,
                                    alias: Some(alias),
                                    ..
                                } if alias.eq_ignore_ascii_case(&ident.text) => {
                                    Some(tokens.as_slice())
                                }
                                _ => None,
                            })
                            .unwrap_or(part)
                    }
                    _ => part,
                }
            };
            keys.push(self.compile(ctx, scope, expr, CompileMode::Strict)?);
        }
        if keys.is_empty() {
            return Err(DbError::syntax("GROUP BY requires at least one expression"));
        }
        Ok(keys)
    }

    /// `LIMIT n`, `LIMIT m, n` and `OFFSET m`, each a constant expression.
    fn limit_offset(
        &self,
        ctx: &StatementContext,
        limit: Option<&[Token]>,
        offset: Option<&[Token]>,
    ) -> DbResult<(Option<usize>, usize)> {
        let mut count = None;
        let mut skip = 0;
        if let Some(tokens) = limit {
            match split_top_level(tokens).as_slice() {
                [n] => count = Some(self.constant_count(ctx, n, "LIMIT")?),
                [m, n] => {
                    skip = self.constant_count(ctx, m, "LIMIT")?;
                    count = Some(self.constant_count(ctx, n, "LIMIT")?);
                }
                _ => return Err(DbError::syntax("LIMIT takes one or two values")),
            }
        }
        if let Some(tokens) = offset {
            skip = self.constant_count(ctx, tokens, "OFFSET")?;
        }
        Ok((count, skip))
    }

    pub(crate) fn constant_count(
        &self,
        ctx: &StatementContext,
        tokens: &[Token],
        clause: &str,
    ) -> DbResult<usize> {
        let scope = SchemaContext::empty();
        let compiled = self.compile(ctx, &scope, tokens, CompileMode::Strict)?;
        let value = self.evaluator().evaluate(&compiled, &Row::new())?;
        let n = to_number(&value).and_then(|n| {
            n.as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
        });
        match n {
            Some(n) => Ok(n as usize),
            None => Err(DbError::syntax(format!(
                "{} requires a non-negative integer, got {}",
                clause, value
            ))),
        }
    }

    fn order_and_limit(
        &self,
        mut projected: Vec<Projected>,
        order: &[OrderKey],
        limit: Option<usize>,
        offset: usize,
    ) -> DbResult<Vec<Vec<Value>>> {
        if !order.is_empty() {
            let evaluator = self.evaluator();
            let mut keyed = Vec::with_capacity(projected.len());
            for p in projected {
                let mut keys = Vec::with_capacity(order.len());
                for key in order {
                    keys.push(match &key.target {
                        OrderTarget::Position(i) => p.values.get(*i).cloned().unwrap_or(Value::Null),
                        OrderTarget::Expr(compiled) => evaluator.evaluate(compiled, &p.source)?,
                    });
                }
                keyed.push((keys, p));
            }
            // stable: ties keep their incoming order
            keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, order));
            projected = keyed.into_iter().map(|(_, p)| p).collect();
        }

        let rows = projected
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|p| p.values)
            .collect();
        Ok(rows)
    }
}

/// `*` or `q.*` as (output name, row key) pairs, system columns left out.
fn expand_star(scope: &SchemaContext, qualifier: Option<&str>) -> DbResult<Vec<(String, String)>> {
    let indices: Vec<usize> = match qualifier {
        None if scope.tables().is_empty() => {
            return Err(DbError::semantic("SELECT * requires a FROM clause"))
        }
        None => (0..scope.tables().len()).collect(),
        Some(q) => vec![scope
            .table_index(q)
            .ok_or_else(|| DbError::semantic(format!("Unknown table '{}'", q)))?],
    };
    Ok(indices
        .into_iter()
        .flat_map(|i| {
            scope.tables()[i]
                .columns
                .iter()
                .filter(|c| !is_system_column(c))
                .map(move |c| (c.clone(), scope.key(i, c)))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::lexer::tokenize;

    fn item(sql: &str) -> SelectItem {
        parse_select_item(&tokenize(sql)).unwrap()
    }

    fn alias_of(sql: &str) -> Option<String> {
        match item(sql) {
            SelectItem::Expr { alias, .. } => alias,
            SelectItem::Star(_) => None,
        }
    }

    #[test]
    fn test_select_item_aliases() {
        assert_eq!(alias_of("a AS x"), Some("x".into()));
        assert_eq!(alias_of("a x"), Some("x".into()));
        assert_eq!(alias_of("COUNT(*) total"), Some("total".into()));
        assert_eq!(alias_of("a AS 'label'"), Some("label".into()));
        assert_eq!(alias_of("t.a"), None);
        assert_eq!(alias_of("a IS NULL"), None);
        assert_eq!(alias_of("CASE WHEN a THEN 1 END"), None);
        assert_eq!(alias_of("a AND b"), None);
    }

    #[test]
    fn test_select_item_names() {
        match item("t.a") {
            SelectItem::Expr { name, .. } => assert_eq!(name, "a"),
            other => panic!("unexpected {:?}", other),
        }
        match item("COUNT(*)") {
            SelectItem::Expr { name, .. } => assert_eq!(name, "COUNT(*)"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(item("*"), SelectItem::Star(None));
        assert_eq!(item("u.*"), SelectItem::Star(Some("u".into())));
    }

    #[test]
    fn test_order_direction() {
        let tokens = tokenize("a DESC");
        let (expr, desc) = strip_direction(&tokens);
        assert_eq!(expr.len(), 1);
        assert!(desc);
        assert_eq!(position(&tokenize("2")), Some(2));
        assert_eq!(position(&tokenize("a")), None);
    }
}
