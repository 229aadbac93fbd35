//! Expression compiler
//!
//! Lowers SQL predicate syntax (WHERE, HAVING, ON, DEFAULT, CHECK and
//! projection items) into the minimal operator set of [`Expr`]. Column
//! names are resolved against a [`SchemaContext`] while compiling, so the
//! evaluator only ever does keyed row lookups.
//!
//! Compilation is idempotent: a [`CompiledExpression`] passed back in is
//! returned as is, and its rendered text compiles to the same tree.

mod aggregates;
mod parser;
mod scope;

pub use aggregates::{
    is_hidden_column, AggregateBinder, AggregateCall, AggregateFunction, HIDDEN_AGGREGATE_PREFIX,
};
pub use scope::{allocate_prefix, SchemaContext, ScopeTable};

use std::fmt;

use self::parser::ExprParser;
use super::ast::Expr;
use super::evaluator::Evaluator;
use super::lexer::{tokenize, Token, TokenKind};
use crate::error::{DbError, DbResult};
use crate::executor::ResultSet;

const ASSIGNMENT_OPERATORS: &[&str] = &[
    ":=", "+=", "-=", "*=", "/=", "%=", "|=", "&=", "^=", "<<=", ">>=",
];

const TEMPLATE_TAGS: &[&str] = &["<?", "?>", "<%", "%>"];

/// How unknown identifiers are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompileMode {
    /// Unknown identifiers are an error
    #[default]
    Strict,
    /// Unknown identifiers are kept as raw row keys
    ExistenceCheck,
    /// Join and HAVING conditions: unknown identifiers are kept and the
    /// expression only evaluates when every key it reads is present
    Permissive,
}

/// Runs a nested SELECT found inside an expression.
pub trait SubqueryRunner {
    fn run_subquery(&self, tokens: &[Token]) -> DbResult<ResultSet>;
}

/// A validated expression in minimal form
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    expr: Expr,
    columns: Vec<String>,
    probe: bool,
}

impl CompiledExpression {
    fn new(expr: Expr, probe: bool) -> Self {
        let columns = expr.columns();
        Self {
            expr,
            columns,
            probe,
        }
    }

    /// Wrap a tree the compiler already produced, such as a bound
    /// aggregate argument.
    pub(crate) fn from_bound(expr: Expr) -> Self {
        Self::new(expr, false)
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Row keys this expression reads
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whether evaluation first checks that every read key is present.
    pub fn has_presence_probe(&self) -> bool {
        self.probe
    }

    pub fn text(&self) -> String {
        self.expr.render()
    }

    /// The expression is a bare row lookup.
    pub fn as_column(&self) -> Option<&str> {
        match &self.expr {
            Expr::Column(key) => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Anything the compiler accepts
#[derive(Debug, Clone, Copy)]
pub enum ExprSource<'a> {
    Text(&'a str),
    Tokens(&'a [Token]),
    Compiled(&'a CompiledExpression),
}

impl<'a> From<&'a str> for ExprSource<'a> {
    fn from(value: &'a str) -> Self {
        ExprSource::Text(value)
    }
}

impl<'a> From<&'a String> for ExprSource<'a> {
    fn from(value: &'a String) -> Self {
        ExprSource::Text(value)
    }
}

impl<'a> From<&'a [Token]> for ExprSource<'a> {
    fn from(value: &'a [Token]) -> Self {
        ExprSource::Tokens(value)
    }
}

impl<'a> From<&'a Vec<Token>> for ExprSource<'a> {
    fn from(value: &'a Vec<Token>) -> Self {
        ExprSource::Tokens(value)
    }
}

impl<'a> From<&'a CompiledExpression> for ExprSource<'a> {
    fn from(value: &'a CompiledExpression) -> Self {
        ExprSource::Compiled(value)
    }
}

pub struct ExpressionCompiler<'a> {
    scope: &'a SchemaContext,
    mode: CompileMode,
    aggregates: Option<&'a mut AggregateBinder>,
    subqueries: Option<&'a dyn SubqueryRunner>,
}

impl<'a> ExpressionCompiler<'a> {
    pub fn new(scope: &'a SchemaContext) -> Self {
        Self {
            scope,
            mode: CompileMode::Strict,
            aggregates: None,
            subqueries: None,
        }
    }

    pub fn mode(mut self, mode: CompileMode) -> Self {
        self.mode = mode;
        self
    }

    /// Allow aggregate calls, binding them to hidden columns.
    pub fn with_aggregates(mut self, binder: &'a mut AggregateBinder) -> Self {
        self.aggregates = Some(binder);
        self
    }

    pub fn with_subqueries(mut self, runner: &'a dyn SubqueryRunner) -> Self {
        self.subqueries = Some(runner);
        self
    }

    pub fn compile<'s>(&mut self, source: impl Into<ExprSource<'s>>) -> DbResult<CompiledExpression> {
        match source.into() {
            ExprSource::Compiled(compiled) => Ok(compiled.clone()),
            ExprSource::Text(text) => {
                let tokens = tokenize(text);
                self.compile_tokens(&tokens)
            }
            ExprSource::Tokens(tokens) => self.compile_tokens(tokens),
        }
    }

    fn compile_tokens(&mut self, tokens: &[Token]) -> DbResult<CompiledExpression> {
        check_forbidden(tokens)?;
        if tokens.is_empty() {
            return Err(DbError::syntax("Empty expression"));
        }

        let mut parser = ExprParser::new(
            tokens,
            self.scope,
            self.mode,
            self.aggregates.as_deref_mut(),
            self.subqueries,
        );
        let expr = parser.parse()?;
        let compiled = CompiledExpression::new(expr, self.mode == CompileMode::Permissive);
        tracing::trace!("Compiled expression: {}", compiled);
        Ok(compiled)
    }
}

/// Reject tokens that never belong in an expression.
fn check_forbidden(tokens: &[Token]) -> DbResult<()> {
    for token in tokens {
        match token.kind {
            TokenKind::Operator if ASSIGNMENT_OPERATORS.contains(&token.text.as_str()) => {
                return Err(DbError::syntax(format!(
                    "Assignment operator '{}' is not allowed in expressions",
                    token.text
                )));
            }
            TokenKind::Operator if TEMPLATE_TAGS.contains(&token.text.as_str()) => {
                return Err(DbError::syntax(format!(
                    "Template tag '{}' is not allowed in expressions",
                    token.text
                )));
            }
            TokenKind::Other if token.text == "[" || token.text == "]" => {
                return Err(DbError::syntax(format!(
                    "Unexpected '{}' in expression",
                    token.text
                )));
            }
            TokenKind::Semicolon => {
                return Err(DbError::syntax("Unexpected ';' in expression"));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Compile a table-free expression and dry-run it.
pub fn check_constant(tokens: &[Token]) -> DbResult<()> {
    let scope = SchemaContext::empty();
    let compiled = ExpressionCompiler::new(&scope).compile(tokens)?;
    Evaluator::default().check(&compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ColumnDescriptor, ColumnType, TableSchema};

    fn scope() -> SchemaContext {
        SchemaContext::single(&TableSchema::new(
            "t",
            vec![
                ColumnDescriptor::new("a", ColumnType::Integer),
                ColumnDescriptor::new("b", ColumnType::Text),
            ],
        ))
    }

    fn compile(sql: &str) -> DbResult<CompiledExpression> {
        let scope = scope();
        ExpressionCompiler::new(&scope).compile(sql)
    }

    #[test]
    fn test_equality_rewrites() {
        assert_eq!(compile("a = 1").unwrap().text(), "(${a} == 1)");
        assert_eq!(compile("a IS NULL").unwrap().text(), "(${a} == NULL)");
        assert_eq!(compile("a IS NOT NULL").unwrap().text(), "(${a} != NULL)");
        assert_eq!(compile("a <> 2").unwrap().text(), "(${a} != 2)");
    }

    #[test]
    fn test_between_rewrites() {
        assert_eq!(
            compile("a BETWEEN 1 AND 3").unwrap().text(),
            "((${a} >= 1) && (${a} <= 3))"
        );
        assert_eq!(
            compile("a NOT BETWEEN 1 AND 3").unwrap().text(),
            "((${a} < 1) || (${a} > 3))"
        );
    }

    #[test]
    fn test_in_and_quantified() {
        assert_eq!(
            compile("a IN (1, 2)").unwrap().text(),
            "((${a} == 1) || (${a} == 2))"
        );
        assert_eq!(
            compile("a NOT IN (1, 2)").unwrap().text(),
            "((${a} != 1) && (${a} != 2))"
        );
        assert_eq!(
            compile("a > ALL (1, 2)").unwrap().text(),
            "((${a} > 1) && (${a} > 2))"
        );
        assert_eq!(
            compile("a < SOME (5)").unwrap().text(),
            "(${a} < 5)"
        );
    }

    #[test]
    fn test_like_call() {
        assert_eq!(
            compile("b LIKE 'x%'").unwrap().text(),
            "LIKE(${b}, 'x%', '\\\\')"
        );
        assert_eq!(
            compile("b NOT LIKE 'x!%' ESCAPE '!'").unwrap().text(),
            "!(LIKE(${b}, 'x!%', '!'))"
        );
        assert!(compile("b LIKE 'abc\\\\'").is_err());
        assert!(compile("b LIKE 'x' ESCAPE 'ab'").is_err());
    }

    #[test]
    fn test_case_forms() {
        assert_eq!(
            compile("CASE WHEN a > 1 THEN 'big' END").unwrap().text(),
            "((${a} > 1) ? 'big' : NULL)"
        );
        assert_eq!(
            compile("CASE a WHEN 1 THEN 'one' WHEN 2 THEN 'two' ELSE 'many' END")
                .unwrap()
                .text(),
            "((${a} == 1) ? 'one' : ((${a} == 2) ? 'two' : 'many'))"
        );
        assert!(compile("CASE WHEN a > 1 THEN 2").is_err());
    }

    #[test]
    fn test_special_calls() {
        assert_eq!(
            compile("CAST(b AS INTEGER)").unwrap().text(),
            "CAST(${b}, 'INTEGER')"
        );
        assert_eq!(
            compile("SUBSTRING(b FROM 2 FOR 3)").unwrap().text(),
            "SUBSTRING(${b}, 2, 3)"
        );
        assert_eq!(
            compile("TRIM(LEADING 'x' FROM b)").unwrap().text(),
            "TRIM(${b}, 'x', 'LEADING')"
        );
        assert_eq!(
            compile("POSITION('a' IN b)").unwrap().text(),
            "POSITION('a', ${b})"
        );
        assert_eq!(
            compile("EXTRACT(YEAR FROM b)").unwrap().text(),
            "EXTRACT('YEAR', ${b})"
        );
        assert_eq!(
            compile("CONVERT(b, SIGNED)").unwrap().text(),
            "CAST(${b}, 'SIGNED')"
        );
    }

    #[test]
    fn test_unknown_identifier() {
        let err = compile("zz > 1").unwrap_err();
        assert!(matches!(err, DbError::SemanticError(_)));

        let scope = scope();
        let compiled = ExpressionCompiler::new(&scope)
            .mode(CompileMode::ExistenceCheck)
            .compile("zz > 1")
            .unwrap();
        assert_eq!(compiled.text(), "(${zz} > 1)");
    }

    #[test]
    fn test_forbidden_tokens() {
        assert!(matches!(compile("a := 1"), Err(DbError::SyntaxError(_))));
        assert!(matches!(compile("a += 1"), Err(DbError::SyntaxError(_))));
        assert!(matches!(compile("a[0] = 1"), Err(DbError::SyntaxError(_))));
        assert!(matches!(compile("<? a ?>"), Err(DbError::SyntaxError(_))));
    }

    #[test]
    fn test_compiling_compiled_is_noop() {
        let scope = scope();
        let mut compiler = ExpressionCompiler::new(&scope);
        let once = compiler.compile("a BETWEEN 1 AND 3 OR b LIKE 'q_'").unwrap();
        let twice = compiler.compile(&once).unwrap();
        assert_eq!(once, twice);
        let text = once.text();
        let reparsed = compiler.compile(&text).unwrap();
        assert_eq!(once, reparsed);
    }

    #[test]
    fn test_aggregate_requires_binder() {
        assert!(compile("COUNT(*) > 1").is_err());

        let scope = scope();
        let mut binder = AggregateBinder::new();
        let compiled = ExpressionCompiler::new(&scope)
            .with_aggregates(&mut binder)
            .compile("SUM(a) > 2 AND COUNT(*) > 0 AND SUM(a) < 10")
            .unwrap();
        assert_eq!(binder.len(), 2);
        assert_eq!(
            compiled.text(),
            "(((${#agg0} > 2) && (${#agg1} > 0)) && (${#agg0} < 10))"
        );
    }

    #[test]
    fn test_permissive_sets_probe() {
        let scope = scope();
        let compiled = ExpressionCompiler::new(&scope)
            .mode(CompileMode::Permissive)
            .compile("a = 1")
            .unwrap();
        assert!(compiled.has_presence_probe());
        assert_eq!(compiled.columns(), &["a".to_string()]);
    }

    #[test]
    fn test_check_constant() {
        let tokens = tokenize("UPPER('x')");
        assert!(check_constant(&tokens).is_ok());
        let tokens = tokenize("NO_SUCH_FN(1)");
        assert!(check_constant(&tokens).is_err());
    }
}
