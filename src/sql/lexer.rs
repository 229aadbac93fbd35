//! SQL tokenizer
//!
//! Turns statement text into a flat token sequence. Comments and whitespace
//! are dropped, quoted strings are captured whole with escapes resolved, and
//! operators are matched longest-first. Tokenizing never fails: characters
//! with no meaning become single-character tokens and later stages decide.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Bare identifier or keyword
    Word,
    /// Back-quoted identifier
    QuotedIdent,
    Number,
    /// String literal, `text` holds the unescaped content
    String,
    Operator,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    /// Any character without a lexical role
    Other,
    /// Resolved row key, only produced by the expression compiler
    Column,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

/// Multi-character operators, longest first.
const OPERATORS: &[&str] = &[
    "<=>", "<<=", ">>=", "<>", "<=", ">=", "!=", "==", "&&", "||", ":=", "+=", "-=", "*=", "/=",
    "%=", "|=", "&=", "^=", "<?", "?>", "<%", "%>", "<<", ">>", "::",
];

const SINGLE_OPERATORS: &str = "=<>!+-*/%&|^~?:";

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn word(text: impl Into<String>) -> Self {
        Self::new(TokenKind::Word, text)
    }

    pub fn op(text: impl Into<String>) -> Self {
        Self::new(TokenKind::Operator, text)
    }

    pub fn number(text: impl Into<String>) -> Self {
        Self::new(TokenKind::Number, text)
    }

    pub fn string(text: impl Into<String>) -> Self {
        Self::new(TokenKind::String, text)
    }

    pub fn column(key: impl Into<String>) -> Self {
        Self::new(TokenKind::Column, key)
    }

    pub fn lparen() -> Self {
        Self::new(TokenKind::LParen, "(")
    }

    pub fn rparen() -> Self {
        Self::new(TokenKind::RParen, ")")
    }

    pub fn comma() -> Self {
        Self::new(TokenKind::Comma, ",")
    }

    /// Case-insensitive keyword check on bare words.
    #[inline]
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_any_keyword(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.is_keyword(k))
    }

    #[inline]
    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.text == op
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::QuotedIdent)
    }

    pub fn upper(&self) -> String {
        self.text.to_ascii_uppercase()
    }

    /// Source form of this token.
    pub fn to_sql(&self) -> String {
        match self.kind {
            TokenKind::String => format!(
                "'{}'",
                self.text.replace('\\', "\\\\").replace('\'', "''")
            ),
            TokenKind::QuotedIdent => format!("`{}`", self.text),
            TokenKind::Column => format!("${{{}}}", self.text),
            _ => self.text.clone(),
        }
    }
}

/// Render a token slice back to readable text.
pub fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev: Option<&Token> = None;
    for token in tokens {
        if let Some(p) = prev {
            let glue = matches!(token.kind, TokenKind::RParen | TokenKind::Comma | TokenKind::Dot)
                || matches!(p.kind, TokenKind::LParen | TokenKind::Dot)
                || (token.kind == TokenKind::LParen && p.kind == TokenKind::Word);
            if !glue {
                out.push(' ');
            }
        }
        out.push_str(&token.to_sql());
        prev = Some(token);
    }
    out
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
}

impl Scanner {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.current() {
            self.pos += 1;
            if ch == '\n' {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while self.current().is_some() {
            if self.current() == Some('*') && self.peek() == Some('/') {
                self.pos += 2;
                return;
            }
            self.pos += 1;
        }
    }

    fn read_string(&mut self, quote: char) -> Token {
        self.pos += 1;
        let mut s = String::new();
        while let Some(ch) = self.current() {
            if ch == quote {
                if self.peek() == Some(quote) {
                    s.push(quote);
                    self.pos += 2;
                    continue;
                }
                self.pos += 1;
                return Token::string(s);
            }
            if ch == '\\' {
                self.pos += 1;
                if let Some(escaped) = self.current() {
                    match escaped {
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        'r' => s.push('\r'),
                        '0' => s.push('\0'),
                        '\\' | '\'' | '"' => s.push(escaped),
                        // Keep LIKE wildcards escaped for the pattern translator
                        other => {
                            s.push('\\');
                            s.push(other);
                        }
                    }
                    self.pos += 1;
                }
                continue;
            }
            s.push(ch);
            self.pos += 1;
        }
        // Unterminated: take the remainder as the literal
        Token::string(s)
    }

    fn read_quoted_ident(&mut self) -> Token {
        self.pos += 1;
        let mut s = String::new();
        while let Some(ch) = self.current() {
            self.pos += 1;
            if ch == '`' {
                if self.current() == Some('`') {
                    s.push('`');
                    self.pos += 1;
                    continue;
                }
                break;
            }
            s.push(ch);
        }
        Token::new(TokenKind::QuotedIdent, s)
    }

    /// `${key}` row reference emitted by rendered compiled expressions
    fn read_column_ref(&mut self) -> Token {
        self.pos += 2;
        let start = self.pos;
        while self.current().is_some_and(|c| c != '}') {
            self.pos += 1;
        }
        let key: String = self.chars[start..self.pos].iter().collect();
        if self.current().is_some() {
            self.pos += 1;
        }
        Token::column(key)
    }

    fn read_number(&mut self) -> Token {
        let start = self.pos;
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                self.pos += 1;
            } else if ch == '.' && !seen_dot && !seen_exp {
                seen_dot = true;
                self.pos += 1;
            } else if (ch == 'e' || ch == 'E') && !seen_exp {
                let next = self.peek();
                let signed = matches!(next, Some('+') | Some('-'))
                    && self
                        .chars
                        .get(self.pos + 2)
                        .is_some_and(|c| c.is_ascii_digit());
                if next.is_some_and(|c| c.is_ascii_digit()) || signed {
                    seen_exp = true;
                    self.pos += if signed { 2 } else { 1 };
                } else {
                    break;
                }
            } else {
                break;
            }
        }
        Token::number(self.chars[start..self.pos].iter().collect::<String>())
    }

    fn read_word(&mut self) -> Token {
        let start = self.pos;
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                self.pos += 1;
            } else {
                break;
            }
        }
        Token::word(self.chars[start..self.pos].iter().collect::<String>())
    }

    fn read_operator(&mut self) -> Option<Token> {
        for op in OPERATORS {
            if self.starts_with(op) {
                self.pos += op.chars().count();
                return Some(Token::op(*op));
            }
        }
        let ch = self.current()?;
        if SINGLE_OPERATORS.contains(ch) {
            self.pos += 1;
            return Some(Token::op(ch.to_string()));
        }
        None
    }

    fn run(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.pos += 1;
                continue;
            }
            if (ch == '-' && self.peek() == Some('-')) || ch == '#' {
                self.skip_line_comment();
                continue;
            }
            if ch == '/' && self.peek() == Some('*') {
                self.skip_block_comment();
                continue;
            }

            let token = match ch {
                '\'' | '"' => self.read_string(ch),
                '`' => self.read_quoted_ident(),
                '$' if self.peek() == Some('{') => self.read_column_ref(),
                c if c.is_ascii_digit() => self.read_number(),
                '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.read_number(),
                c if c.is_alphabetic() || c == '_' => self.read_word(),
                '(' => self.single(TokenKind::LParen),
                ')' => self.single(TokenKind::RParen),
                ',' => self.single(TokenKind::Comma),
                '.' => self.single(TokenKind::Dot),
                ';' => self.single(TokenKind::Semicolon),
                _ => match self.read_operator() {
                    Some(op) => op,
                    None => self.single(TokenKind::Other),
                },
            };
            tokens.push(token);
        }
        tokens
    }

    fn single(&mut self, kind: TokenKind) -> Token {
        let ch = self.chars[self.pos];
        self.pos += 1;
        Token::new(kind, ch.to_string())
    }
}

/// Tokenize without touching any cache.
pub fn tokenize(sql: &str) -> Vec<Token> {
    Scanner::new(sql.trim()).run()
}

/// Tokenizer with a bounded memo of recent statements keyed by content hash.
pub struct Tokenizer {
    cache: Mutex<LruCache<u64, (String, Arc<Vec<Token>>)>>,
}

impl Tokenizer {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn tokenize(&self, sql: &str) -> Arc<Vec<Token>> {
        let text = sql.trim();
        let hash = seahash::hash(text.as_bytes());

        if let Some((source, tokens)) = self.cache.lock().get(&hash) {
            if source == text {
                tracing::trace!("Token cache hit for {:016x}", hash);
                return Arc::clone(tokens);
            }
        }

        let tokens = Arc::new(Scanner::new(text).run());
        self.cache
            .lock()
            .put(hash, (text.to_string(), Arc::clone(&tokens)));
        tokens
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(256)
    }
}
