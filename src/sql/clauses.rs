//! Clause parser
//!
//! Splits a token sequence into named clause bodies in a single
//! left-to-right scan. A clause keyword only opens a new clause at
//! parenthesis depth zero and each keyword is consumed once; a repeat is
//! left in the running clause body for the compiler to reject.

use super::column_defs::parse_column_block;
use super::lexer::{Token, TokenKind};
use crate::error::{DbError, DbResult};
use crate::storage::ColumnDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
}

impl StatementKind {
    pub fn from_token(token: &Token) -> DbResult<Self> {
        if token.kind != TokenKind::Word {
            return Err(DbError::syntax(format!(
                "Statement cannot start with '{}'",
                token.text
            )));
        }
        match token.upper().as_str() {
            "SELECT" => Ok(StatementKind::Select),
            "INSERT" => Ok(StatementKind::Insert),
            "UPDATE" => Ok(StatementKind::Update),
            "DELETE" => Ok(StatementKind::Delete),
            "CREATE" => Ok(StatementKind::Create),
            "DROP" => Ok(StatementKind::Drop),
            other => Err(DbError::syntax(format!("Unknown statement type: {}", other))),
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            StatementKind::Select => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Create => "CREATE",
            StatementKind::Drop => "DROP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Clause {
    Select,
    From,
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
    Offset,
    Into,
    Columns,
    Values,
    Table,
    Set,
}

impl Clause {
    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "SELECT" => Some(Clause::Select),
            "FROM" => Some(Clause::From),
            "WHERE" => Some(Clause::Where),
            "GROUP" => Some(Clause::GroupBy),
            "HAVING" => Some(Clause::Having),
            "ORDER" => Some(Clause::OrderBy),
            "LIMIT" => Some(Clause::Limit),
            "OFFSET" => Some(Clause::Offset),
            "VALUES" => Some(Clause::Values),
            "SET" => Some(Clause::Set),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    Union,
    Intersect,
    Except,
}

impl SetOperator {
    fn from_token(token: &Token) -> Option<Self> {
        if token.kind != TokenKind::Word {
            return None;
        }
        match token.upper().as_str() {
            "UNION" => Some(SetOperator::Union),
            "INTERSECT" => Some(SetOperator::Intersect),
            "EXCEPT" | "MINUS" => Some(SetOperator::Except),
            _ => None,
        }
    }
}

/// One right-hand operand of a compound SELECT.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundPart {
    pub op: SetOperator,
    pub all: bool,
    pub select: ClauseMap,
}

/// Clause name to clause body for one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ClauseMap {
    pub kind: StatementKind,
    clauses: Vec<(Clause, Vec<Token>)>,
    /// SELECT DISTINCT
    pub distinct: bool,
    /// UNION / INTERSECT / EXCEPT operands, applied left to right
    pub compound: Vec<CompoundPart>,
    /// ORDER BY / LIMIT / OFFSET that close a compound SELECT
    compound_tail: Vec<(Clause, Vec<Token>)>,
    /// INSERT ... SELECT source
    pub sub_statement: Option<Box<ClauseMap>>,
    /// CREATE TABLE column block
    pub columns: Vec<ColumnDescriptor>,
    /// Table-level CHECK expressions
    pub table_checks: Vec<String>,
    /// IF EXISTS / IF NOT EXISTS
    pub if_exists: bool,
}

impl ClauseMap {
    fn new(kind: StatementKind) -> Self {
        Self {
            kind,
            clauses: Vec::new(),
            distinct: false,
            compound: Vec::new(),
            compound_tail: Vec::new(),
            sub_statement: None,
            columns: Vec::new(),
            table_checks: Vec::new(),
            if_exists: false,
        }
    }

    pub fn get(&self, clause: Clause) -> Option<&[Token]> {
        self.clauses
            .iter()
            .find(|(c, _)| *c == clause)
            .map(|(_, t)| t.as_slice())
    }

    pub fn has(&self, clause: Clause) -> bool {
        self.get(clause).is_some()
    }

    pub fn clause_names(&self) -> Vec<Clause> {
        self.clauses.iter().map(|(c, _)| *c).collect()
    }

    /// ORDER BY / LIMIT / OFFSET governing a compound result.
    pub fn compound_clause(&self, clause: Clause) -> Option<&[Token]> {
        self.compound_tail
            .iter()
            .find(|(c, _)| *c == clause)
            .map(|(_, t)| t.as_slice())
    }

    fn insert(&mut self, clause: Clause, tokens: Vec<Token>) {
        self.clauses.push((clause, tokens));
    }

    fn take(&mut self, clause: Clause) -> Option<Vec<Token>> {
        let idx = self.clauses.iter().position(|(c, _)| *c == clause)?;
        Some(self.clauses.remove(idx).1)
    }
}

/// Parse a full statement, picking the kind from its leading keyword.
pub fn parse_statement(tokens: &[Token]) -> DbResult<ClauseMap> {
    let tokens = strip_semicolons(tokens);
    let first = tokens
        .first()
        .ok_or_else(|| DbError::syntax("Empty statement"))?;
    let kind = StatementKind::from_token(first)?;
    parse_clauses(tokens, kind)
}

/// Parse a statement already known to be of `kind`.
pub fn parse_clauses(tokens: &[Token], kind: StatementKind) -> DbResult<ClauseMap> {
    let tokens = strip_semicolons(tokens);
    match tokens.first() {
        Some(t) if t.is_keyword(kind.keyword()) => {}
        Some(t) => {
            return Err(DbError::syntax(format!(
                "Expected {} but statement starts with '{}'",
                kind.keyword(),
                t.text
            )))
        }
        None => return Err(DbError::syntax("Empty statement")),
    }
    check_balance(tokens)?;

    match kind {
        StatementKind::Select => parse_select(tokens),
        StatementKind::Insert => parse_insert(tokens),
        StatementKind::Update => parse_update(tokens),
        StatementKind::Delete => parse_delete(tokens),
        StatementKind::Create => parse_create(tokens),
        StatementKind::Drop => parse_drop(tokens),
    }
}

fn strip_semicolons(tokens: &[Token]) -> &[Token] {
    let mut end = tokens.len();
    while end > 0 && tokens[end - 1].kind == TokenKind::Semicolon {
        end -= 1;
    }
    &tokens[..end]
}

/// Fails when parenthesis nesting goes negative or does not end at zero.
pub fn check_balance(tokens: &[Token]) -> DbResult<()> {
    let mut depth: i64 = 0;
    for token in tokens {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;
                if depth < 0 {
                    return Err(DbError::syntax("Unbalanced parentheses: unexpected ')'"));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(DbError::syntax(format!(
            "Unbalanced parentheses: {} unclosed '('",
            depth
        )));
    }
    Ok(())
}

/// Split on commas at parenthesis depth zero.
pub fn split_top_level(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0i64;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth -= 1,
            TokenKind::Comma if depth == 0 => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < tokens.len() || !parts.is_empty() {
        parts.push(&tokens[start..]);
    }
    parts
}

/// Index of the `)` matching the `(` at `open`.
pub fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0i64;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Generic depth-zero scan: opens a clause at each permitted keyword,
/// consuming each keyword once. Returns the index where a compound
/// operator stopped the scan, if any.
fn scan_clauses(
    tokens: &[Token],
    map: &mut ClauseMap,
    first: Clause,
    permitted: &[Clause],
    stop_at_set_ops: bool,
) -> usize {
    let mut remaining: Vec<Clause> = permitted.to_vec();
    let mut current = first;
    let mut body: Vec<Token> = Vec::new();
    let mut depth = 0i64;
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth -= 1,
            _ => {}
        }

        if depth == 0 && token.kind == TokenKind::Word {
            if stop_at_set_ops && SetOperator::from_token(token).is_some() {
                map.insert(current, std::mem::take(&mut body));
                return i;
            }

            if let Some(clause) = Clause::from_keyword(&token.upper()) {
                if let Some(pos) = remaining.iter().position(|c| *c == clause) {
                    let needs_by = matches!(clause, Clause::GroupBy | Clause::OrderBy);
                    let has_by = tokens.get(i + 1).is_some_and(|t| t.is_keyword("BY"));
                    if !needs_by || has_by {
                        remaining.remove(pos);
                        map.insert(current, std::mem::take(&mut body));
                        current = clause;
                        i += if needs_by { 2 } else { 1 };
                        continue;
                    }
                }
            }
        }

        body.push(token.clone());
        i += 1;
    }

    map.insert(current, body);
    tokens.len()
}

fn parse_select(tokens: &[Token]) -> DbResult<ClauseMap> {
    let mut map = ClauseMap::new(StatementKind::Select);
    let mut start = 1;
    if tokens.get(1).is_some_and(|t| t.is_keyword("DISTINCT")) {
        map.distinct = true;
        start = 2;
    } else if tokens.get(1).is_some_and(|t| t.is_keyword("ALL")) {
        start = 2;
    }

    let permitted = [
        Clause::From,
        Clause::Where,
        Clause::GroupBy,
        Clause::Having,
        Clause::OrderBy,
        Clause::Limit,
        Clause::Offset,
    ];
    let stop = scan_clauses(&tokens[start..], &mut map, Clause::Select, &permitted, true);
    let mut rest = &tokens[start + stop..];
    let mut last_bare = false;

    while let Some(op_token) = rest.first() {
        let Some(op) = SetOperator::from_token(op_token) else {
            break;
        };
        let mut idx = 1;
        let mut all = false;
        if rest.get(1).is_some_and(|t| t.is_keyword("ALL")) {
            all = true;
            idx = 2;
        } else if rest.get(1).is_some_and(|t| t.is_keyword("DISTINCT")) {
            idx = 2;
        }
        let operand_tokens = &rest[idx..];

        // Operand is either `SELECT ...` or `( SELECT ... )`
        last_bare = !operand_tokens
            .first()
            .is_some_and(|t| t.kind == TokenKind::LParen);
        let (operand, consumed) = if !last_bare {
            let close = matching_paren(operand_tokens, 0)
                .ok_or_else(|| DbError::syntax("Unclosed parenthesis in compound SELECT"))?;
            (parse_select_operand(&operand_tokens[1..close])?, close + 1)
        } else {
            let end = operand_end(operand_tokens);
            (parse_select_operand(&operand_tokens[..end])?, end)
        };

        map.compound.push(CompoundPart {
            op,
            all,
            select: operand,
        });
        rest = &operand_tokens[consumed..];
    }

    // Trailing ORDER BY / LIMIT after a parenthesized last operand
    if !rest.is_empty() {
        let mut tail = ClauseMap::new(StatementKind::Select);
        scan_clauses(
            rest,
            &mut tail,
            Clause::Select,
            &[Clause::OrderBy, Clause::Limit, Clause::Offset],
            false,
        );
        if tail.get(Clause::Select).is_some_and(|t| !t.is_empty()) {
            return Err(DbError::syntax(format!(
                "Unexpected tokens after compound SELECT: {}",
                super::lexer::render(rest)
            )));
        }
        for clause in [Clause::OrderBy, Clause::Limit, Clause::Offset] {
            if let Some(body) = tail.take(clause) {
                map.compound_tail.push((clause, body));
            }
        }
    }

    // The last operand's ORDER BY / LIMIT / OFFSET applies to the whole compound
    if let Some(last) = map.compound.last_mut().filter(|_| last_bare) {
        for clause in [Clause::OrderBy, Clause::Limit, Clause::Offset] {
            if let Some(body) = last.select.take(clause) {
                map.compound_tail.push((clause, body));
            }
        }
    }

    if map.get(Clause::Select).map_or(true, |t| t.is_empty()) {
        return Err(DbError::syntax("SELECT requires at least one column"));
    }

    Ok(map)
}

/// End of a bare compound operand: the next depth-zero set operator.
fn operand_end(tokens: &[Token]) -> usize {
    let mut depth = 0i64;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth -= 1,
            _ => {}
        }
        if depth == 0 && i > 0 && SetOperator::from_token(token).is_some() {
            return i;
        }
    }
    tokens.len()
}

fn parse_select_operand(tokens: &[Token]) -> DbResult<ClauseMap> {
    match tokens.first() {
        Some(t) if t.is_keyword("SELECT") => parse_select(tokens),
        _ => Err(DbError::syntax(
            "Set operator must be followed by a SELECT statement",
        )),
    }
}

fn parse_insert(tokens: &[Token]) -> DbResult<ClauseMap> {
    let mut map = ClauseMap::new(StatementKind::Insert);
    let mut i = 1;
    if tokens.get(i).is_some_and(|t| t.is_keyword("INTO")) {
        i += 1;
    }

    let table = tokens
        .get(i)
        .filter(|t| t.is_identifier())
        .ok_or_else(|| DbError::syntax("INSERT requires a table name"))?;
    map.insert(Clause::Into, vec![table.clone()]);
    i += 1;

    if tokens.get(i).is_some_and(|t| t.kind == TokenKind::LParen) {
        let close = matching_paren(tokens, i)
            .ok_or_else(|| DbError::syntax("Unclosed column list in INSERT"))?;
        if tokens.get(i + 1).is_some_and(|t| t.is_keyword("SELECT")) {
            map.sub_statement = Some(Box::new(parse_clauses(
                &tokens[i + 1..close],
                StatementKind::Select,
            )?));
            i = close + 1;
            if i < tokens.len() {
                return Err(DbError::syntax("Unexpected tokens after INSERT sub-select"));
            }
            return Ok(map);
        }
        map.insert(Clause::Columns, tokens[i + 1..close].to_vec());
        i = close + 1;
    }

    match tokens.get(i) {
        Some(t) if t.is_keyword("VALUES") || t.is_keyword("VALUE") => {
            let body = tokens[i + 1..].to_vec();
            if body.is_empty() {
                return Err(DbError::syntax("VALUES requires at least one row"));
            }
            map.insert(Clause::Values, body);
        }
        Some(t) if t.is_keyword("SELECT") => {
            map.sub_statement = Some(Box::new(parse_clauses(
                &tokens[i..],
                StatementKind::Select,
            )?));
        }
        Some(t) if t.kind == TokenKind::LParen
            && tokens.get(i + 1).is_some_and(|t| t.is_keyword("SELECT")) =>
        {
            let close = matching_paren(tokens, i)
                .ok_or_else(|| DbError::syntax("Unclosed INSERT sub-select"))?;
            map.sub_statement = Some(Box::new(parse_clauses(
                &tokens[i + 1..close],
                StatementKind::Select,
            )?));
        }
        Some(t) => {
            return Err(DbError::syntax(format!(
                "Expected VALUES or SELECT in INSERT, found '{}'",
                t.text
            )))
        }
        None => return Err(DbError::syntax("INSERT requires VALUES or SELECT")),
    }

    Ok(map)
}

fn parse_update(tokens: &[Token]) -> DbResult<ClauseMap> {
    let mut map = ClauseMap::new(StatementKind::Update);
    let table = tokens
        .get(1)
        .filter(|t| t.is_identifier())
        .ok_or_else(|| DbError::syntax("UPDATE requires a table name"))?;
    map.insert(Clause::Table, vec![table.clone()]);

    if !tokens.get(2).is_some_and(|t| t.is_keyword("SET")) {
        return Err(DbError::syntax("UPDATE requires a SET clause"));
    }
    scan_clauses(
        &tokens[3..],
        &mut map,
        Clause::Set,
        &[Clause::Where, Clause::Limit],
        false,
    );
    if map.get(Clause::Set).map_or(true, |t| t.is_empty()) {
        return Err(DbError::syntax("SET requires at least one assignment"));
    }
    Ok(map)
}

fn parse_delete(tokens: &[Token]) -> DbResult<ClauseMap> {
    let mut map = ClauseMap::new(StatementKind::Delete);
    let mut i = 1;
    if tokens.get(i).is_some_and(|t| t.is_keyword("FROM")) {
        i += 1;
    }
    let table = tokens
        .get(i)
        .filter(|t| t.is_identifier())
        .ok_or_else(|| DbError::syntax("DELETE requires a table name"))?;

    let mut body = ClauseMap::new(StatementKind::Delete);
    scan_clauses(
        &tokens[i + 1..],
        &mut body,
        Clause::Table,
        &[Clause::Where, Clause::Limit],
        false,
    );
    if body.get(Clause::Table).is_some_and(|t| !t.is_empty()) {
        return Err(DbError::syntax(format!(
            "Unexpected tokens after table name in DELETE: {}",
            super::lexer::render(body.get(Clause::Table).unwrap_or_default())
        )));
    }
    map.insert(Clause::Table, vec![table.clone()]);
    for clause in [Clause::Where, Clause::Limit] {
        if let Some(b) = body.take(clause) {
            map.insert(clause, b);
        }
    }
    Ok(map)
}

fn parse_create(tokens: &[Token]) -> DbResult<ClauseMap> {
    let mut map = ClauseMap::new(StatementKind::Create);
    if !tokens.get(1).is_some_and(|t| t.is_keyword("TABLE")) {
        return Err(DbError::syntax("Only CREATE TABLE is supported"));
    }
    let mut i = 2;
    if tokens.get(i).is_some_and(|t| t.is_keyword("IF"))
        && tokens.get(i + 1).is_some_and(|t| t.is_keyword("NOT"))
        && tokens.get(i + 2).is_some_and(|t| t.is_keyword("EXISTS"))
    {
        map.if_exists = true;
        i += 3;
    }

    let table = tokens
        .get(i)
        .filter(|t| t.is_identifier())
        .ok_or_else(|| DbError::syntax("CREATE TABLE requires a table name"))?;
    map.insert(Clause::Table, vec![table.clone()]);
    i += 1;

    if !tokens.get(i).is_some_and(|t| t.kind == TokenKind::LParen) {
        return Err(DbError::syntax("CREATE TABLE requires a column list"));
    }
    let close = matching_paren(tokens, i)
        .ok_or_else(|| DbError::syntax("Unclosed column list in CREATE TABLE"))?;
    if close + 1 != tokens.len() {
        return Err(DbError::syntax("Unexpected tokens after CREATE TABLE column list"));
    }

    let block = parse_column_block(&tokens[i + 1..close])?;
    map.columns = block.columns;
    map.table_checks = block.checks;
    Ok(map)
}

fn parse_drop(tokens: &[Token]) -> DbResult<ClauseMap> {
    let mut map = ClauseMap::new(StatementKind::Drop);
    if !tokens.get(1).is_some_and(|t| t.is_keyword("TABLE")) {
        return Err(DbError::syntax("Only DROP TABLE is supported"));
    }
    let mut i = 2;
    if tokens.get(i).is_some_and(|t| t.is_keyword("IF"))
        && tokens.get(i + 1).is_some_and(|t| t.is_keyword("EXISTS"))
    {
        map.if_exists = true;
        i += 2;
    }
    let names = &tokens[i..];
    if names.is_empty() {
        return Err(DbError::syntax("DROP TABLE requires a table name"));
    }
    for part in split_top_level(names) {
        if part.len() != 1 || !part[0].is_identifier() {
            return Err(DbError::syntax(format!(
                "Invalid table name in DROP TABLE: {}",
                super::lexer::render(part)
            )));
        }
    }
    map.insert(Clause::Table, names.to_vec());
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::lexer::{render, tokenize};

    fn parse(sql: &str) -> ClauseMap {
        parse_statement(&tokenize(sql)).unwrap()
    }

    fn body(map: &ClauseMap, clause: Clause) -> String {
        render(map.get(clause).unwrap())
    }

    #[test]
    fn test_select_clauses() {
        let map = parse("SELECT a, b FROM t WHERE a > 1 GROUP BY b HAVING COUNT(*) > 1 ORDER BY a DESC LIMIT 5");
        assert_eq!(map.kind, StatementKind::Select);
        assert_eq!(body(&map, Clause::Select), "a, b");
        assert_eq!(body(&map, Clause::From), "t");
        assert_eq!(body(&map, Clause::Where), "a > 1");
        assert_eq!(body(&map, Clause::GroupBy), "b");
        assert_eq!(body(&map, Clause::Having), "COUNT(*) > 1");
        assert_eq!(body(&map, Clause::OrderBy), "a DESC");
        assert_eq!(body(&map, Clause::Limit), "5");
    }

    #[test]
    fn test_keywords_inside_parens_do_not_split() {
        let map = parse("SELECT EXTRACT(YEAR FROM d) FROM t WHERE x IN (SELECT y FROM u WHERE z = 1)");
        assert_eq!(body(&map, Clause::Select), "EXTRACT(YEAR FROM d)");
        assert_eq!(body(&map, Clause::Where), "x IN (SELECT y FROM u WHERE z = 1)");
    }

    #[test]
    fn test_clause_keyword_consumed_once() {
        let map = parse("SELECT a FROM t WHERE a = 1 WHERE b = 2");
        assert_eq!(body(&map, Clause::Where), "a = 1 WHERE b = 2");
    }

    #[test]
    fn test_distinct_flag() {
        let map = parse("SELECT DISTINCT a FROM t");
        assert!(map.distinct);
        assert_eq!(body(&map, Clause::Select), "a");
    }

    #[test]
    fn test_union_chain() {
        let map = parse("SELECT a FROM t UNION ALL SELECT b FROM u EXCEPT SELECT c FROM v ORDER BY 1 LIMIT 2");
        assert_eq!(map.compound.len(), 2);
        assert_eq!(map.compound[0].op, SetOperator::Union);
        assert!(map.compound[0].all);
        assert_eq!(map.compound[1].op, SetOperator::Except);
        assert!(!map.compound[1].all);
        assert!(map.compound[1].select.get(Clause::OrderBy).is_none());
        assert_eq!(render(map.compound_clause(Clause::OrderBy).unwrap()), "1");
        assert_eq!(render(map.compound_clause(Clause::Limit).unwrap()), "2");
    }

    #[test]
    fn test_parenthesized_union_operand() {
        let map = parse("SELECT a FROM t UNION (SELECT b FROM u)");
        assert_eq!(map.compound.len(), 1);
        assert_eq!(render(map.compound[0].select.get(Clause::From).unwrap()), "u");
    }

    #[test]
    fn test_invalid_leading_keyword() {
        let err = parse_statement(&tokenize("EXPLAIN SELECT 1")).unwrap_err();
        assert!(matches!(err, DbError::SyntaxError(_)));
    }

    #[test]
    fn test_unbalanced_parens() {
        assert!(parse_statement(&tokenize("SELECT (a FROM t")).is_err());
        assert!(parse_statement(&tokenize("SELECT a) FROM t")).is_err());
    }

    #[test]
    fn test_kind_mismatch() {
        assert!(parse_clauses(&tokenize("SELECT 1"), StatementKind::Delete).is_err());
    }

    #[test]
    fn test_insert_values() {
        let map = parse("INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y');");
        assert_eq!(body(&map, Clause::Into), "t");
        assert_eq!(body(&map, Clause::Columns), "a, b");
        assert_eq!(body(&map, Clause::Values), "(1, 'x'), (2, 'y')");
    }

    #[test]
    fn test_insert_parenthesized_select() {
        let map = parse("INSERT INTO t (SELECT a FROM u)");
        let sub = map.sub_statement.as_ref().unwrap();
        assert_eq!(sub.kind, StatementKind::Select);
        assert_eq!(render(sub.get(Clause::From).unwrap()), "u");
        assert!(map.get(Clause::Columns).is_none());
    }

    #[test]
    fn test_insert_columns_then_select() {
        let map = parse("INSERT INTO t (a) SELECT b FROM u");
        assert_eq!(body(&map, Clause::Columns), "a");
        assert!(map.sub_statement.is_some());
    }

    #[test]
    fn test_update_and_delete() {
        let map = parse("UPDATE t SET a = a + 1, b = 'z' WHERE id = 3");
        assert_eq!(body(&map, Clause::Table), "t");
        assert_eq!(body(&map, Clause::Set), "a = a + 1, b = 'z'");
        assert_eq!(body(&map, Clause::Where), "id = 3");

        let map = parse("DELETE FROM t WHERE id > 2 LIMIT 1");
        assert_eq!(body(&map, Clause::Table), "t");
        assert_eq!(body(&map, Clause::Where), "id > 2");
        assert_eq!(body(&map, Clause::Limit), "1");
    }

    #[test]
    fn test_drop() {
        let map = parse("DROP TABLE IF EXISTS a, b");
        assert!(map.if_exists);
        assert_eq!(body(&map, Clause::Table), "a, b");
    }

    #[test]
    fn test_split_top_level() {
        let tokens = tokenize("a, f(b, c), d");
        let parts = split_top_level(&tokens);
        assert_eq!(parts.len(), 3);
        assert_eq!(render(parts[1]), "f(b, c)");
    }
}
