//! Query orchestrator
//!
//! [`Engine`] dispatches a parsed statement to its builder and owns the
//! shared pieces every statement uses: the token cache, the LIKE regex
//! cache, the configuration and the error log. Per-statement state lives
//! in a [`StatementContext`] created for each statement and dropped after.

mod aggregation;
mod context;
mod ddl;
mod dml;
mod join;
mod select;
mod set_ops;

pub use context::StatementContext;
pub use join::{JoinCondition, JoinDescriptor, JoinType, TableSource};
pub use set_ops::combine;

use serde::Serialize;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{DbError, DbResult, ErrorLog};
use crate::sql::clauses::{parse_clauses, parse_statement, ClauseMap, StatementKind};
use crate::sql::compiler::{
    CompileMode, CompiledExpression, ExprSource, ExpressionCompiler, SchemaContext,
    SubqueryRunner,
};
use crate::sql::evaluator::Evaluator;
use crate::sql::lexer::{Token, TokenKind, Tokenizer};
use crate::sql::like::LikeMatcher;
use crate::storage::{Row, Storage};

/// Nested SELECTs deeper than this are rejected
pub const MAX_SUBQUERY_DEPTH: usize = 32;

/// Positional rows under a column header
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows keyed by column name. A repeated column name keeps its last value.
    pub fn to_rows(&self) -> Vec<Row> {
        self.rows
            .iter()
            .map(|values| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(values.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// Every value of one column, matched case-insensitively.
    pub fn column(&self, name: &str) -> Option<Vec<Value>> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))?;
        Some(
            self.rows
                .iter()
                .map(|r| r.get(idx).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// What a statement produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QueryOutput {
    Rows(ResultSet),
    /// Rows written by INSERT, UPDATE or DELETE
    Affected(usize),
    /// DDL finished
    Done,
}

impl QueryOutput {
    pub fn into_rows(self) -> Option<ResultSet> {
        match self {
            QueryOutput::Rows(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn affected(&self) -> Option<usize> {
        match self {
            QueryOutput::Affected(n) => Some(*n),
            _ => None,
        }
    }
}

pub struct Engine<S: Storage> {
    storage: S,
    config: EngineConfig,
    tokenizer: Tokenizer,
    like: LikeMatcher,
    errors: ErrorLog,
}

impl<S: Storage> Engine<S> {
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, EngineConfig::default())
    }

    pub fn with_config(storage: S, config: EngineConfig) -> Self {
        Self {
            tokenizer: Tokenizer::new(config.token_cache_capacity),
            like: LikeMatcher::new(config.like_cache_capacity, config.max_regex_pattern_len),
            storage,
            config,
            errors: ErrorLog::new(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.errors
    }

    /// Every error reported so far, oldest first
    pub fn errors(&self) -> Vec<DbError> {
        self.errors.entries()
    }

    pub fn clear_errors(&self) {
        self.errors.clear();
    }

    pub fn parse_statement(&self, sql: &str) -> DbResult<ClauseMap> {
        let tokens = self.tokenizer.tokenize(sql);
        parse_statement(&tokens)
    }

    /// Run an already parsed statement with a fresh statement context.
    pub fn build_and_execute(&self, map: &ClauseMap) -> DbResult<QueryOutput> {
        let mut ctx = StatementContext::new(map.kind);
        tracing::debug!("Executing {} statement", map.kind.keyword());
        match map.kind {
            StatementKind::Select => self.select(&mut ctx, map).map(QueryOutput::Rows),
            StatementKind::Insert => self.insert(&mut ctx, map).map(QueryOutput::Affected),
            StatementKind::Update => self.update(&mut ctx, map).map(QueryOutput::Affected),
            StatementKind::Delete => self.delete(&mut ctx, map).map(QueryOutput::Affected),
            StatementKind::Create => self.create_table(&mut ctx, map).map(|_| QueryOutput::Done),
            StatementKind::Drop => self.drop_tables(&mut ctx, map).map(|_| QueryOutput::Done),
        }
    }

    /// Parse and run one statement. Failures are appended to the error log.
    pub fn execute(&self, sql: &str) -> DbResult<QueryOutput> {
        let result = self
            .parse_statement(sql)
            .and_then(|map| self.build_and_execute(&map));
        self.recorded(result)
    }

    /// Run `;`-separated statements in order, stopping at the first error.
    pub fn execute_batch(&self, script: &str) -> DbResult<Vec<QueryOutput>> {
        let tokens = self.tokenizer.tokenize(script);
        let mut outputs = Vec::new();
        for statement in tokens.split(|t| t.kind == TokenKind::Semicolon) {
            if statement.is_empty() {
                continue;
            }
            let result = parse_statement(statement).and_then(|map| self.build_and_execute(&map));
            outputs.push(self.recorded(result)?);
        }
        Ok(outputs)
    }

    /// Run a statement that must produce rows.
    pub fn query(&self, sql: &str) -> DbResult<ResultSet> {
        match self.execute(sql)? {
            QueryOutput::Rows(rs) => Ok(rs),
            _ => self.recorded(Err(DbError::semantic("Statement does not return rows"))),
        }
    }

    /// Compile an expression against a caller-supplied scope. Subqueries in
    /// the expression run against this engine's storage.
    pub fn compile_expression<'s>(
        &self,
        source: impl Into<ExprSource<'s>>,
        scope: &SchemaContext,
    ) -> DbResult<CompiledExpression> {
        let runner = NestedSelect::new(self, 0);
        let result = ExpressionCompiler::new(scope)
            .with_subqueries(&runner)
            .compile(source);
        self.recorded(result)
    }

    pub fn cached_statements(&self) -> usize {
        self.tokenizer.cached_len()
    }

    fn recorded<T>(&self, result: DbResult<T>) -> DbResult<T> {
        if let Err(err) = &result {
            self.errors.record(err.clone());
        }
        result
    }

    pub(crate) fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.like)
    }

    /// Compile with the statement's subquery runner attached.
    pub(crate) fn compile(
        &self,
        ctx: &StatementContext,
        scope: &SchemaContext,
        tokens: &[Token],
        mode: CompileMode,
    ) -> DbResult<CompiledExpression> {
        let runner = NestedSelect::new(self, ctx.depth());
        ExpressionCompiler::new(scope)
            .mode(mode)
            .with_subqueries(&runner)
            .compile(tokens)
    }

    /// Run a nested SELECT one level below `ctx`.
    pub(crate) fn run_nested(&self, ctx: &StatementContext, tokens: &[Token]) -> DbResult<ResultSet> {
        NestedSelect::new(self, ctx.depth()).run_subquery(tokens)
    }
}

/// Subquery runner handed to the expression compiler
pub(crate) struct NestedSelect<'e, S: Storage> {
    engine: &'e Engine<S>,
    depth: usize,
}

impl<'e, S: Storage> NestedSelect<'e, S> {
    pub(crate) fn new(engine: &'e Engine<S>, depth: usize) -> Self {
        Self { engine, depth }
    }
}

impl<S: Storage> SubqueryRunner for NestedSelect<'_, S> {
    fn run_subquery(&self, tokens: &[Token]) -> DbResult<ResultSet> {
        if self.depth >= MAX_SUBQUERY_DEPTH {
            return Err(DbError::semantic(format!(
                "Subqueries nested deeper than {} levels",
                MAX_SUBQUERY_DEPTH
            )));
        }
        let map = parse_clauses(tokens, StatementKind::Select)?;
        let mut ctx = StatementContext::nested(self.depth + 1);
        let result = self.engine.select(&mut ctx, &map)?;
        tracing::debug!("Subquery at depth {} returned {} rows", self.depth + 1, result.len());
        Ok(result)
    }
}
