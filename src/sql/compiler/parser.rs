//! SQL expression parser with lowering rewrites
//!
//! Recursive descent over raw tokens. Each SQL-only construct is rewritten
//! into the minimal operator set as soon as it is recognized.

use serde_json::Value;

use super::aggregates::{AggregateBinder, AggregateFunction};
use super::scope::SchemaContext;
use super::{CompileMode, SubqueryRunner};
use crate::error::{DbError, DbResult};
use crate::executor::ResultSet;
use crate::sql::ast::{BinaryOperator, Expr, UnaryOperator};
use crate::sql::clauses::matching_paren;
use crate::sql::evaluator::builtins;
use crate::sql::lexer::{render, Token, TokenKind};
use crate::sql::like;

/// Words that can never start an operand
const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET", "UNION",
    "INTERSECT", "EXCEPT", "AND", "OR", "NOT", "IN", "IS", "LIKE", "BETWEEN", "THEN", "WHEN",
    "ELSE", "END", "AS", "ON", "JOIN", "BY", "ASC", "DESC", "VALUES", "SET", "INTO", "DISTINCT",
    "ESCAPE", "USING",
];

pub(super) struct ExprParser<'t, 'c> {
    tokens: &'t [Token],
    pos: usize,
    scope: &'c SchemaContext,
    mode: CompileMode,
    aggregates: Option<&'c mut AggregateBinder>,
    subqueries: Option<&'c dyn SubqueryRunner>,
    in_aggregate: bool,
}

impl<'t, 'c> ExprParser<'t, 'c> {
    pub(super) fn new(
        tokens: &'t [Token],
        scope: &'c SchemaContext,
        mode: CompileMode,
        aggregates: Option<&'c mut AggregateBinder>,
        subqueries: Option<&'c dyn SubqueryRunner>,
    ) -> Self {
        Self {
            tokens,
            pos: 0,
            scope,
            mode,
            aggregates,
            subqueries,
            in_aggregate: false,
        }
    }

    /// Parse the whole token slice as one expression.
    pub(super) fn parse(&mut self) -> DbResult<Expr> {
        let expr = self.parse_ternary()?;
        if let Some(token) = self.current() {
            return Err(DbError::syntax(format!(
                "Unexpected '{}' in expression {}",
                token.to_sql(),
                render(self.tokens)
            )));
        }
        Ok(expr)
    }

    // ========================================================================
    // Cursor helpers
    // ========================================================================

    fn current(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek(&self, offset: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.current().is_some_and(|t| t.is_keyword(keyword))
    }

    fn at_kind(&self, kind: TokenKind) -> bool {
        self.current().is_some_and(|t| t.kind == kind)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.current().is_some_and(|t| t.is_op(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kind(&mut self, kind: TokenKind) -> bool {
        if self.at_kind(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> DbResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", keyword)))
        }
    }

    fn expect_kind(&mut self, kind: TokenKind, what: &str) -> DbResult<()> {
        if self.eat_kind(kind) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{}'", what)))
        }
    }

    fn unexpected(&self, context: &str) -> DbError {
        match self.current() {
            Some(token) => DbError::syntax(format!(
                "Unexpected '{}' in expression, {}",
                token.to_sql(),
                context
            )),
            None => DbError::syntax(format!("Unexpected end of expression, {}", context)),
        }
    }

    // ========================================================================
    // Precedence chain
    // ========================================================================

    /// `cond ? a : b`, right-associative
    fn parse_ternary(&mut self) -> DbResult<Expr> {
        let condition = self.parse_or()?;
        if self.eat_op("?") {
            let then = self.parse_ternary()?;
            if !self.eat_op(":") {
                return Err(self.unexpected("expected ':' in conditional"));
            }
            let otherwise = self.parse_ternary()?;
            return Ok(Expr::ternary(condition, then, otherwise));
        }
        Ok(condition)
    }

    fn parse_or(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") || self.eat_op("||") {
            let right = self.parse_and()?;
            left = Expr::binary(left, BinaryOperator::Or, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("AND") || self.eat_op("&&") {
            let right = self.parse_not()?;
            left = Expr::binary(left, BinaryOperator::And, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> DbResult<Expr> {
        if self.eat_keyword("NOT") || self.eat_op("!") {
            let inner = self.parse_not()?;
            return Ok(Expr::not(inner));
        }
        self.parse_predicate()
    }

    /// Comparisons and the SQL predicate forms that lower into them.
    fn parse_predicate(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_additive()?;

        loop {
            if let Some(op) = self.comparison_operator() {
                self.pos += 1;
                left = self.parse_comparison_rhs(left, op)?;
                continue;
            }

            if self.eat_keyword("IS") {
                let op = if self.eat_keyword("NOT") {
                    BinaryOperator::NotEqual
                } else {
                    BinaryOperator::Equal
                };
                let right = self.parse_additive()?;
                left = Expr::binary(left, op, right);
                continue;
            }

            let negated = self.at_keyword("NOT")
                && self.peek(1).is_some_and(|t| {
                    t.is_any_keyword(&["BETWEEN", "IN", "LIKE", "REGEXP", "RLIKE"])
                });
            if negated {
                self.pos += 1;
            }

            if self.eat_keyword("BETWEEN") {
                left = self.parse_between(left, negated)?;
            } else if self.eat_keyword("IN") {
                left = self.parse_in(left, negated)?;
            } else if self.eat_keyword("LIKE") {
                left = self.parse_like(left, negated)?;
            } else if self.eat_keyword("REGEXP") || self.eat_keyword("RLIKE") {
                let pattern = self.parse_additive()?;
                let call = Expr::Call("REGEXP".to_string(), vec![left, pattern]);
                left = if negated { Expr::not(call) } else { call };
            } else {
                break;
            }
        }

        Ok(left)
    }

    fn comparison_operator(&self) -> Option<BinaryOperator> {
        let token = self.current()?;
        if token.kind != TokenKind::Operator {
            return None;
        }
        match token.text.as_str() {
            "=" | "==" | "<=>" => Some(BinaryOperator::Equal),
            "!=" | "<>" => Some(BinaryOperator::NotEqual),
            "<" => Some(BinaryOperator::LessThan),
            "<=" => Some(BinaryOperator::LessThanOrEqual),
            ">" => Some(BinaryOperator::GreaterThan),
            ">=" => Some(BinaryOperator::GreaterThanOrEqual),
            _ => None,
        }
    }

    /// Right side of a comparison, including `op ANY|SOME|ALL (...)`.
    fn parse_comparison_rhs(&mut self, left: Expr, op: BinaryOperator) -> DbResult<Expr> {
        let quantifier = self
            .current()
            .filter(|t| t.is_any_keyword(&["ANY", "SOME", "ALL"]))
            .filter(|_| self.peek(1).is_some_and(|t| t.kind == TokenKind::LParen))
            .map(Token::upper);

        match quantifier {
            Some(q) => {
                self.pos += 1;
                let values = self.parse_value_list()?;
                let comparisons = values
                    .into_iter()
                    .map(|v| Expr::binary(left.clone(), op, v))
                    .collect();
                Ok(if q == "ALL" {
                    Expr::fold(comparisons, BinaryOperator::And, Expr::Literal(Value::Bool(true)))
                } else {
                    Expr::fold(comparisons, BinaryOperator::Or, Expr::Literal(Value::Bool(false)))
                })
            }
            None => {
                let right = self.parse_additive()?;
                Ok(Expr::binary(left, op, right))
            }
        }
    }

    fn parse_between(&mut self, subject: Expr, negated: bool) -> DbResult<Expr> {
        let low = self.parse_additive()?;
        self.expect_keyword("AND")?;
        let high = self.parse_additive()?;
        Ok(if negated {
            Expr::binary(
                Expr::binary(subject.clone(), BinaryOperator::LessThan, low),
                BinaryOperator::Or,
                Expr::binary(subject, BinaryOperator::GreaterThan, high),
            )
        } else {
            Expr::binary(
                Expr::binary(subject.clone(), BinaryOperator::GreaterThanOrEqual, low),
                BinaryOperator::And,
                Expr::binary(subject, BinaryOperator::LessThanOrEqual, high),
            )
        })
    }

    fn parse_in(&mut self, subject: Expr, negated: bool) -> DbResult<Expr> {
        let values = self.parse_value_list()?;
        Ok(if negated {
            let parts = values
                .into_iter()
                .map(|v| Expr::binary(subject.clone(), BinaryOperator::NotEqual, v))
                .collect();
            Expr::fold(parts, BinaryOperator::And, Expr::Literal(Value::Bool(true)))
        } else {
            let parts = values
                .into_iter()
                .map(|v| Expr::binary(subject.clone(), BinaryOperator::Equal, v))
                .collect();
            Expr::fold(parts, BinaryOperator::Or, Expr::Literal(Value::Bool(false)))
        })
    }

    fn parse_like(&mut self, subject: Expr, negated: bool) -> DbResult<Expr> {
        let pattern = self.parse_additive()?;
        let escape = if self.eat_keyword("ESCAPE") {
            match self.advance() {
                Some(t) if t.kind == TokenKind::String => like::escape_char(&t.text)?,
                _ => return Err(DbError::syntax("ESCAPE requires a string literal")),
            }
        } else {
            like::DEFAULT_ESCAPE
        };
        let call = like_call(subject, pattern, escape)?;
        Ok(if negated { Expr::not(call) } else { call })
    }

    /// `( expr, ... )` or `( SELECT ... )`, producing the listed values.
    fn parse_value_list(&mut self) -> DbResult<Vec<Expr>> {
        if !self.at_kind(TokenKind::LParen) {
            return Err(self.unexpected("expected '('"));
        }
        if self.peek(1).is_some_and(|t| t.is_keyword("SELECT")) {
            let result = self.run_subquery()?;
            if result.columns.len() != 1 {
                return Err(DbError::semantic(format!(
                    "Subquery must return exactly one column, got {}",
                    result.columns.len()
                )));
            }
            return Ok(result
                .rows
                .into_iter()
                .filter_map(|row| row.into_iter().next())
                .map(Expr::Literal)
                .collect());
        }

        self.pos += 1;
        if self.at_kind(TokenKind::RParen) {
            return Err(DbError::syntax("Value list cannot be empty"));
        }
        let values = self.parse_arguments()?;
        Ok(values)
    }

    /// Comma-separated expressions up to and including `)`.
    fn parse_arguments(&mut self) -> DbResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat_kind(TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_ternary()?);
            if self.eat_kind(TokenKind::Comma) {
                continue;
            }
            self.expect_kind(TokenKind::RParen, ")")?;
            return Ok(args);
        }
    }

    fn parse_additive(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_op("+") {
                BinaryOperator::Add
            } else if self.eat_op("-") {
                BinaryOperator::Subtract
            } else {
                break;
            };
            let right = self.parse_multiplicative()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinaryOperator::Multiply
            } else if self.eat_op("/") {
                BinaryOperator::Divide
            } else if self.eat_op("%") || self.eat_keyword("MOD") {
                BinaryOperator::Modulus
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> DbResult<Expr> {
        if self.eat_op("-") {
            let inner = self.parse_unary()?;
            return Ok(match inner {
                Expr::Literal(Value::Number(n)) => Expr::Literal(negate_number(&n)),
                other => Expr::Unary(UnaryOperator::Negate, Box::new(other)),
            });
        }
        if self.eat_op("+") {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    // ========================================================================
    // Operands
    // ========================================================================

    fn parse_primary(&mut self) -> DbResult<Expr> {
        let Some(token) = self.current() else {
            return Err(self.unexpected("expected an operand"));
        };

        match token.kind {
            TokenKind::Number => {
                self.pos += 1;
                parse_number(&token.text).map(Expr::Literal)
            }
            TokenKind::String => {
                self.pos += 1;
                Ok(Expr::Literal(Value::String(token.text.clone())))
            }
            TokenKind::Column => {
                self.pos += 1;
                self.row_key(&token.text)
            }
            TokenKind::LParen => {
                if self.peek(1).is_some_and(|t| t.is_keyword("SELECT")) {
                    return self.parse_scalar_subquery();
                }
                self.pos += 1;
                let inner = self.parse_ternary()?;
                self.expect_kind(TokenKind::RParen, ")")?;
                Ok(inner)
            }
            TokenKind::QuotedIdent => self.parse_identifier(),
            TokenKind::Word => self.parse_word(),
            _ => Err(self.unexpected("expected an operand")),
        }
    }

    fn parse_word(&mut self) -> DbResult<Expr> {
        let Some(token) = self.current() else {
            return Err(self.unexpected("expected an operand"));
        };
        let upper = token.upper();
        let is_call = self.peek(1).is_some_and(|t| t.kind == TokenKind::LParen);

        match upper.as_str() {
            "NULL" | "UNKNOWN" => {
                self.pos += 1;
                return Ok(Expr::null());
            }
            "TRUE" => {
                self.pos += 1;
                return Ok(Expr::Literal(Value::Bool(true)));
            }
            "FALSE" => {
                self.pos += 1;
                return Ok(Expr::Literal(Value::Bool(false)));
            }
            "CASE" => return self.parse_case(),
            "EXISTS" if is_call => return self.parse_exists(),
            "CURRENT_TIMESTAMP" | "LOCALTIME" | "LOCALTIMESTAMP" | "CURRENT_DATE"
            | "CURRENT_TIME"
                if !is_call =>
            {
                self.pos += 1;
                return Ok(Expr::Call(canonical_function(&upper).to_string(), Vec::new()));
            }
            _ => {}
        }

        if is_call {
            return self.parse_call(&upper);
        }
        if RESERVED.contains(&upper.as_str()) {
            return Err(self.unexpected("expected an operand"));
        }
        self.parse_identifier()
    }

    /// `name`, `table.name`, quoted forms included.
    fn parse_identifier(&mut self) -> DbResult<Expr> {
        let Some(first) = self.advance() else {
            return Err(self.unexpected("expected an identifier"));
        };
        let (qualifier, name) = if self.at_kind(TokenKind::Dot)
            && self.peek(1).is_some_and(|t| t.is_identifier())
        {
            self.pos += 1;
            let column = self.advance().map(|t| t.text.clone()).unwrap_or_default();
            (Some(first.text.clone()), column)
        } else {
            (None, first.text.clone())
        };

        if let Some(key) = self.scope.resolve(qualifier.as_deref(), &name) {
            return Ok(Expr::Column(key));
        }

        let display = match &qualifier {
            Some(q) => format!("{}.{}", q, name),
            None => name,
        };
        match self.mode {
            CompileMode::Strict => Err(DbError::semantic(format!(
                "Unknown column '{}'",
                display
            ))),
            CompileMode::ExistenceCheck | CompileMode::Permissive => Ok(Expr::Column(display)),
        }
    }

    /// A `${key}` reference. Only keys of the current scope are accepted;
    /// hidden `#` keys never are, whatever the mode.
    fn row_key(&self, key: &str) -> DbResult<Expr> {
        if self.scope.has_key(key) {
            return Ok(Expr::Column(key.to_string()));
        }
        match self.mode {
            CompileMode::ExistenceCheck | CompileMode::Permissive if !key.starts_with('#') => {
                Ok(Expr::Column(key.to_string()))
            }
            _ => Err(DbError::semantic(format!("Unknown column '{}'", key))),
        }
    }

    /// `CASE [operand] WHEN .. THEN .. [ELSE ..] END` as a ternary chain.
    fn parse_case(&mut self) -> DbResult<Expr> {
        self.pos += 1; // CASE
        let operand = if self.at_keyword("WHEN") {
            None
        } else {
            Some(self.parse_ternary()?)
        };

        let mut arms = Vec::new();
        while self.eat_keyword("WHEN") {
            let condition = self.parse_ternary()?;
            self.expect_keyword("THEN")?;
            let result = self.parse_ternary()?;
            arms.push((condition, result));
        }
        if arms.is_empty() {
            return Err(DbError::syntax("CASE requires at least one WHEN branch"));
        }

        let otherwise = if self.eat_keyword("ELSE") {
            self.parse_ternary()?
        } else {
            Expr::null()
        };
        if !self.eat_keyword("END") {
            return Err(DbError::syntax("CASE without matching END"));
        }

        Ok(arms
            .into_iter()
            .rev()
            .fold(otherwise, |acc, (condition, result)| {
                let condition = match &operand {
                    Some(op) => Expr::binary(op.clone(), BinaryOperator::Equal, condition),
                    None => condition,
                };
                Expr::ternary(condition, result, acc)
            }))
    }

    // ========================================================================
    // Subqueries
    // ========================================================================

    /// Run the parenthesized SELECT at the cursor and step past it.
    fn run_subquery(&mut self) -> DbResult<ResultSet> {
        let close = matching_paren(self.tokens, self.pos)
            .ok_or_else(|| DbError::syntax("Unclosed subquery"))?;
        let inner = &self.tokens[self.pos + 1..close];
        let runner = self.subqueries.ok_or_else(|| {
            DbError::semantic("Subqueries are not supported in this context")
        })?;
        tracing::debug!("Running subquery: {}", render(inner));
        let result = runner.run_subquery(inner)?;
        self.pos = close + 1;
        Ok(result)
    }

    fn parse_scalar_subquery(&mut self) -> DbResult<Expr> {
        let result = self.run_subquery()?;
        if result.columns.len() != 1 {
            return Err(DbError::semantic(format!(
                "Scalar subquery must return exactly one column, got {}",
                result.columns.len()
            )));
        }
        match result.rows.len() {
            0 => Ok(Expr::null()),
            1 => Ok(Expr::Literal(
                result.rows.into_iter().next().and_then(|r| r.into_iter().next()).unwrap_or(Value::Null),
            )),
            n => Err(DbError::eval(format!(
                "Scalar subquery returned {} rows",
                n
            ))),
        }
    }

    fn parse_exists(&mut self) -> DbResult<Expr> {
        self.pos += 1; // EXISTS
        if !self.peek(1).is_some_and(|t| t.is_keyword("SELECT")) {
            return Err(DbError::syntax("EXISTS requires a subquery"));
        }
        let result = self.run_subquery()?;
        Ok(Expr::Literal(Value::Bool(!result.rows.is_empty())))
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn parse_call(&mut self, upper: &str) -> DbResult<Expr> {
        if let Some(function) = AggregateFunction::from_name(upper) {
            return self.parse_aggregate(function);
        }

        let name = canonical_function(upper);
        self.pos += 2; // name (

        match name {
            "CAST" => self.parse_cast(),
            "CONVERT" => self.parse_convert(),
            "TRANSLATE" => self.parse_translate(),
            "SUBSTRING" => self.parse_substring(),
            "TRIM" => self.parse_trim(),
            "POSITION" => self.parse_position(),
            "EXTRACT" => self.parse_extract(),
            "IF" => {
                let args = self.parse_arguments()?;
                let [cond, then, otherwise]: [Expr; 3] = args
                    .try_into()
                    .map_err(|_| DbError::semantic("IF expects 3 arguments"))?;
                Ok(Expr::ternary(cond, then, otherwise))
            }
            "LIKE" => {
                let args = self.parse_arguments()?;
                let mut args = args.into_iter();
                match (args.next(), args.next(), args.next(), args.next()) {
                    (Some(subject), Some(pattern), escape, None) => {
                        let escape = match escape {
                            None => like::DEFAULT_ESCAPE,
                            Some(Expr::Literal(Value::String(s))) => like::escape_char(&s)?,
                            Some(_) => {
                                return Err(DbError::syntax("LIKE escape must be a string literal"))
                            }
                        };
                        like_call(subject, pattern, escape)
                    }
                    _ => Err(DbError::semantic("LIKE expects 2 or 3 arguments")),
                }
            }
            _ => {
                if !builtins::is_builtin(name) {
                    return Err(DbError::semantic(format!("Unknown function {}", upper)));
                }
                let args = self.parse_arguments()?;
                builtins::check_arity(name, args.len())?;
                Ok(Expr::Call(name.to_string(), args))
            }
        }
    }

    fn parse_aggregate(&mut self, function: AggregateFunction) -> DbResult<Expr> {
        if self.in_aggregate {
            return Err(DbError::semantic(format!(
                "Aggregate {} cannot be nested inside another aggregate",
                function.name()
            )));
        }
        if self.aggregates.is_none() {
            return Err(DbError::semantic(format!(
                "Aggregate function {} is not allowed here",
                function.name()
            )));
        }
        self.pos += 2; // name (

        let distinct = self.eat_keyword("DISTINCT");
        if !distinct {
            self.eat_keyword("ALL");
        }

        let argument = if function == AggregateFunction::Count
            && !distinct
            && self.current().is_some_and(|t| t.is_op("*"))
        {
            self.pos += 1;
            None
        } else {
            self.in_aggregate = true;
            let arg = self.parse_ternary();
            self.in_aggregate = false;
            Some(arg?)
        };
        self.expect_kind(TokenKind::RParen, ")")?;

        let key = match self.aggregates.as_deref_mut() {
            Some(binder) => binder.bind(function, argument, distinct),
            None => return Err(DbError::semantic("Aggregate binder unavailable")),
        };
        Ok(Expr::Column(key))
    }

    /// `CAST(expr AS type)` or the rendered `CAST(expr, 'type')`
    fn parse_cast(&mut self) -> DbResult<Expr> {
        let value = self.parse_ternary()?;
        let type_name = if self.eat_keyword("AS") {
            self.parse_type_name()?
        } else if self.eat_kind(TokenKind::Comma) {
            self.parse_type_argument()?
        } else {
            return Err(self.unexpected("expected AS in CAST"));
        };
        self.expect_kind(TokenKind::RParen, ")")?;
        Ok(Expr::Call(
            "CAST".to_string(),
            vec![value, Expr::Literal(Value::String(type_name))],
        ))
    }

    /// `CONVERT(expr, type)` casts; `CONVERT(expr USING charset)` keeps text.
    fn parse_convert(&mut self) -> DbResult<Expr> {
        let value = self.parse_ternary()?;
        if self.eat_keyword("USING") {
            self.parse_type_name()?;
            self.expect_kind(TokenKind::RParen, ")")?;
            return Ok(Expr::Call("CONVERT".to_string(), vec![value]));
        }
        if self.eat_kind(TokenKind::Comma) {
            let type_name = self.parse_type_argument()?;
            self.expect_kind(TokenKind::RParen, ")")?;
            return Ok(Expr::Call(
                "CAST".to_string(),
                vec![value, Expr::Literal(Value::String(type_name))],
            ));
        }
        self.expect_kind(TokenKind::RParen, ")")?;
        Ok(Expr::Call("CONVERT".to_string(), vec![value]))
    }

    /// `TRANSLATE(expr USING charset)` or `TRANSLATE(s, from, to)`
    fn parse_translate(&mut self) -> DbResult<Expr> {
        let value = self.parse_ternary()?;
        if self.eat_keyword("USING") {
            self.parse_type_name()?;
            self.expect_kind(TokenKind::RParen, ")")?;
            return Ok(Expr::Call("CONVERT".to_string(), vec![value]));
        }
        let mut args = vec![value];
        while self.eat_kind(TokenKind::Comma) {
            args.push(self.parse_ternary()?);
        }
        self.expect_kind(TokenKind::RParen, ")")?;
        if args.len() != 3 {
            return Err(DbError::semantic("TRANSLATE expects 3 arguments"));
        }
        Ok(Expr::Call("TRANSLATE".to_string(), args))
    }

    /// Type words after AS / USING, with any length suffix dropped.
    fn parse_type_name(&mut self) -> DbResult<String> {
        let mut words = Vec::new();
        while let Some(t) = self.current().filter(|t| t.kind == TokenKind::Word) {
            words.push(t.upper());
            self.pos += 1;
        }
        if words.is_empty() {
            return Err(self.unexpected("expected a type name"));
        }
        if self.at_kind(TokenKind::LParen) {
            let close = matching_paren(self.tokens, self.pos)
                .ok_or_else(|| DbError::syntax("Unclosed type length"))?;
            self.pos = close + 1;
        }
        Ok(words.join(" "))
    }

    fn parse_type_argument(&mut self) -> DbResult<String> {
        match self.current() {
            Some(t) if t.kind == TokenKind::String => {
                self.pos += 1;
                Ok(t.text.to_ascii_uppercase())
            }
            _ => self.parse_type_name(),
        }
    }

    /// `SUBSTRING(s FROM a [FOR b])` or `SUBSTRING(s, a [, b])`
    fn parse_substring(&mut self) -> DbResult<Expr> {
        let mut args = vec![self.parse_ternary()?];
        if self.eat_keyword("FROM") {
            args.push(self.parse_ternary()?);
            if self.eat_keyword("FOR") {
                args.push(self.parse_ternary()?);
            }
        } else {
            while self.eat_kind(TokenKind::Comma) {
                args.push(self.parse_ternary()?);
            }
        }
        self.expect_kind(TokenKind::RParen, ")")?;
        if !(2..=3).contains(&args.len()) {
            return Err(DbError::semantic("SUBSTRING expects 2 or 3 arguments"));
        }
        Ok(Expr::Call("SUBSTRING".to_string(), args))
    }

    /// `TRIM([LEADING|TRAILING|BOTH] [chars] FROM s)`, `TRIM(s)` or the
    /// rendered `TRIM(s, chars, 'MODE')`
    fn parse_trim(&mut self) -> DbResult<Expr> {
        let mode = ["LEADING", "TRAILING", "BOTH"]
            .into_iter()
            .find(|m| self.at_keyword(m));

        if let Some(mode) = mode {
            self.pos += 1;
            let chars = if self.eat_keyword("FROM") {
                Expr::Literal(Value::String(" ".to_string()))
            } else {
                let chars = self.parse_additive()?;
                self.expect_keyword("FROM")?;
                chars
            };
            let subject = self.parse_ternary()?;
            self.expect_kind(TokenKind::RParen, ")")?;
            return Ok(trim_call(subject, chars, mode));
        }

        let first = self.parse_ternary()?;
        if self.eat_keyword("FROM") {
            let subject = self.parse_ternary()?;
            self.expect_kind(TokenKind::RParen, ")")?;
            return Ok(trim_call(subject, first, "BOTH"));
        }

        let mut args = vec![first];
        while self.eat_kind(TokenKind::Comma) {
            args.push(self.parse_ternary()?);
        }
        self.expect_kind(TokenKind::RParen, ")")?;
        match args.len() {
            1 | 3 => Ok(Expr::Call("TRIM".to_string(), args)),
            2 => {
                let mut it = args.into_iter();
                let subject = it.next().unwrap_or(Expr::null());
                let chars = it.next().unwrap_or(Expr::null());
                Ok(trim_call(subject, chars, "BOTH"))
            }
            _ => Err(DbError::semantic("TRIM expects 1 to 3 arguments")),
        }
    }

    /// `POSITION(needle IN haystack)` or `POSITION(needle, haystack)`
    fn parse_position(&mut self) -> DbResult<Expr> {
        let needle = self.parse_additive()?;
        if !(self.eat_keyword("IN") || self.eat_kind(TokenKind::Comma)) {
            return Err(self.unexpected("expected IN in POSITION"));
        }
        let haystack = self.parse_ternary()?;
        self.expect_kind(TokenKind::RParen, ")")?;
        Ok(Expr::Call("POSITION".to_string(), vec![needle, haystack]))
    }

    /// `EXTRACT(unit FROM value)` or `EXTRACT('UNIT', value)`
    fn parse_extract(&mut self) -> DbResult<Expr> {
        let unit = match self.advance() {
            Some(t) if t.kind == TokenKind::Word => {
                let unit = t.upper();
                self.expect_keyword("FROM")?;
                unit
            }
            Some(t) if t.kind == TokenKind::String => {
                self.expect_kind(TokenKind::Comma, ",")?;
                t.text.to_ascii_uppercase()
            }
            _ => return Err(DbError::syntax("EXTRACT requires a unit")),
        };
        if !builtins::is_extract_unit(&unit) {
            return Err(DbError::semantic(format!("Unknown EXTRACT unit {}", unit)));
        }
        let value = self.parse_ternary()?;
        self.expect_kind(TokenKind::RParen, ")")?;
        Ok(Expr::Call(
            "EXTRACT".to_string(),
            vec![Expr::Literal(Value::String(unit)), value],
        ))
    }
}

fn trim_call(subject: Expr, chars: Expr, mode: &str) -> Expr {
    Expr::Call(
        "TRIM".to_string(),
        vec![subject, chars, Expr::Literal(Value::String(mode.to_string()))],
    )
}

/// LIKE predicate call. Literal patterns are validated here.
fn like_call(subject: Expr, pattern: Expr, escape: char) -> DbResult<Expr> {
    if let Expr::Literal(Value::String(p)) = &pattern {
        like::translate(p, escape)?;
    }
    Ok(Expr::Call(
        "LIKE".to_string(),
        vec![subject, pattern, Expr::Literal(Value::String(escape.to_string()))],
    ))
}

/// Fold synonyms onto one function name.
fn canonical_function(upper: &str) -> &str {
    match upper {
        "SUBSTR" | "MID" => "SUBSTRING",
        "UCASE" => "UPPER",
        "LCASE" => "LOWER",
        "CEILING" => "CEIL",
        "POW" => "POWER",
        "CHAR_LENGTH" | "CHARACTER_LENGTH" => "LENGTH",
        "CURRENT_TIMESTAMP" | "LOCALTIME" | "LOCALTIMESTAMP" => "NOW",
        "CURRENT_DATE" => "CURDATE",
        "CURRENT_TIME" => "CURTIME",
        other => other,
    }
}

fn parse_number(text: &str) -> DbResult<Value> {
    let is_float = text.contains(['.', 'e', 'E']);
    if !is_float {
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::from(i));
        }
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| DbError::syntax(format!("Invalid number '{}'", text)))
}

fn negate_number(n: &serde_json::Number) -> Value {
    if let Some(i) = n.as_i64().and_then(|i| i.checked_neg()) {
        return Value::from(i);
    }
    n.as_f64()
        .and_then(|f| serde_json::Number::from_f64(-f))
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::compiler::ScopeTable;
    use crate::sql::lexer::tokenize;

    fn parse_with(sql: &str, scope: &SchemaContext) -> DbResult<Expr> {
        let tokens = tokenize(sql);
        ExprParser::new(&tokens, scope, CompileMode::Strict, None, None).parse()
    }

    fn scope() -> SchemaContext {
        SchemaContext::from_tables(vec![ScopeTable::new(
            "t",
            None,
            vec!["a".to_string(), "b".to_string()],
        )])
    }

    #[test]
    fn test_precedence() {
        let e = parse_with("a + 2 * 3 > 4 AND NOT b = 1 OR a < 0", &scope()).unwrap();
        assert_eq!(
            e.render(),
            "((((${a} + (2 * 3)) > 4) && !((${b} == 1))) || (${a} < 0))"
        );
    }

    #[test]
    fn test_negative_literals_fold() {
        let e = parse_with("-5", &scope()).unwrap();
        assert_eq!(e, Expr::Literal(Value::from(-5)));
        let e = parse_with("-a", &scope()).unwrap();
        assert_eq!(e.render(), "-(${a})");
    }

    #[test]
    fn test_qualified_identifier() {
        let e = parse_with("t.a", &scope()).unwrap();
        assert_eq!(e, Expr::Column("a".to_string()));
        assert!(parse_with("u.a", &scope()).is_err());
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        assert!(parse_with("a b", &scope()).is_err());
        assert!(parse_with("(a", &scope()).is_err());
    }

    #[test]
    fn test_unknown_function() {
        let err = parse_with("FROBNICATE(a)", &scope()).unwrap_err();
        assert!(matches!(err, DbError::SemanticError(_)));
    }

    #[test]
    fn test_if_becomes_ternary() {
        let e = parse_with("IF(a > 1, 'x', 'y')", &scope()).unwrap();
        assert_eq!(e.render(), "((${a} > 1) ? 'x' : 'y')");
    }

    #[test]
    fn test_subquery_without_runner() {
        let err = parse_with("a IN (SELECT 1)", &scope()).unwrap_err();
        assert!(matches!(err, DbError::SemanticError(_)));
    }

    #[test]
    fn test_trim_forms() {
        assert_eq!(parse_with("TRIM(b)", &scope()).unwrap().render(), "TRIM(${b})");
        assert_eq!(
            parse_with("TRIM('x' FROM b)", &scope()).unwrap().render(),
            "TRIM(${b}, 'x', 'BOTH')"
        );
        assert_eq!(
            parse_with("TRIM(TRAILING FROM b)", &scope()).unwrap().render(),
            "TRIM(${b}, ' ', 'TRAILING')"
        );
    }
}
