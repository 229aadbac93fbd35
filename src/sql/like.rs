//! LIKE pattern matching
//!
//! A LIKE pattern becomes a fully anchored, case-insensitive regex:
//! `%` matches any run of characters, `_` exactly one, and the escape
//! character makes the next character literal. Translated patterns are kept
//! in a bounded cache keyed by (pattern, escape); REGEXP patterns get a
//! cache of their own.

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::error::{DbError, DbResult};

pub const DEFAULT_ESCAPE: char = '\\';

/// Compiled regex size cap (1MB)
const MAX_REGEX_SIZE: usize = 1 << 20;

/// Matcher used where no engine-owned cache is at hand.
static SHARED: Lazy<LikeMatcher> = Lazy::new(|| LikeMatcher::new(128, 1024));

/// Translate a LIKE pattern into regex source.
pub fn translate(pattern: &str, escape: char) -> DbResult<String> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?is)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == escape {
            match chars.next() {
                Some(literal) => out.push_str(&regex::escape(&literal.to_string())),
                None => {
                    return Err(DbError::syntax(format!(
                        "LIKE pattern '{}' ends with escape character '{}'",
                        pattern, escape
                    )))
                }
            }
            continue;
        }
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Ok(out)
}

/// Validate an ESCAPE clause argument.
pub fn escape_char(text: &str) -> DbResult<char> {
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(DbError::syntax(format!(
            "ESCAPE must be a single character, got '{}'",
            text
        ))),
    }
}

pub struct LikeMatcher {
    cache: Mutex<LruCache<(String, char), Arc<Regex>>>,
    /// REGEXP patterns, compiled as written
    raw: Mutex<LruCache<String, Arc<Regex>>>,
    max_pattern_len: usize,
}

impl LikeMatcher {
    pub fn new(capacity: usize, max_pattern_len: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            raw: Mutex::new(LruCache::new(capacity)),
            max_pattern_len,
        }
    }

    pub fn shared() -> &'static LikeMatcher {
        &SHARED
    }

    /// Compiled regex for `pattern`, translating on a cache miss.
    pub fn regex(&self, pattern: &str, escape: char) -> DbResult<Arc<Regex>> {
        let key = (pattern.to_string(), escape);
        if let Some(re) = self.cache.lock().get(&key) {
            return Ok(Arc::clone(re));
        }

        let source = translate(pattern, escape)?;
        if source.len() > self.max_pattern_len {
            return Err(DbError::eval(format!(
                "LIKE pattern too long: {} bytes (max {})",
                source.len(),
                self.max_pattern_len
            )));
        }
        let re = regex::RegexBuilder::new(&source)
            .size_limit(MAX_REGEX_SIZE)
            .build()
            .map_err(|e| DbError::syntax(format!("Invalid LIKE pattern '{}': {}", pattern, e)))?;

        tracing::trace!("Compiled LIKE pattern {:?} -> {}", pattern, source);
        let re = Arc::new(re);
        self.cache.lock().put(key, Arc::clone(&re));
        Ok(re)
    }

    /// Case-insensitive regex for a REGEXP pattern, cached like LIKE patterns.
    pub fn regexp(&self, pattern: &str) -> DbResult<Arc<Regex>> {
        if let Some(re) = self.raw.lock().get(pattern) {
            return Ok(Arc::clone(re));
        }
        if pattern.len() > self.max_pattern_len {
            return Err(DbError::eval(format!(
                "REGEXP pattern too long: {} bytes (max {})",
                pattern.len(),
                self.max_pattern_len
            )));
        }
        let re = regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .size_limit(MAX_REGEX_SIZE)
            .build()
            .map_err(|e| DbError::eval(format!("Invalid regex pattern: {}", e)))?;

        let re = Arc::new(re);
        self.raw.lock().put(pattern.to_string(), Arc::clone(&re));
        Ok(re)
    }

    pub fn is_match(&self, subject: &str, pattern: &str, escape: char) -> DbResult<bool> {
        Ok(self.regex(pattern, escape)?.is_match(subject))
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn cached_regexps(&self) -> usize {
        self.raw.lock().len()
    }
}

impl Default for LikeMatcher {
    fn default() -> Self {
        Self::new(128, 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        let m = LikeMatcher::default();
        assert!(m.is_match("axxxbyc", "a%b_c", '\\').unwrap());
        assert!(!m.is_match("axxxbc", "a%b_c", '\\').unwrap());
        assert!(m.is_match("ABC", "abc", '\\').unwrap());
        assert!(m.is_match("line\nbreak", "line%", '\\').unwrap());
    }

    #[test]
    fn test_regexp_is_cached() {
        let m = LikeMatcher::default();
        let first = m.regexp("^a.c$").unwrap();
        let second = m.regexp("^a.c$").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.is_match("ABC"));
        assert_eq!(m.cached_regexps(), 1);
        assert!(matches!(m.regexp("(unclosed"), Err(DbError::EvaluationError(_))));
        assert_eq!(m.cached_regexps(), 1);
    }

    #[test]
    fn test_escape() {
        let m = LikeMatcher::default();
        assert!(m.is_match("a%b", r"a\%b", '\\').unwrap());
        assert!(!m.is_match("axb", r"a\%b", '\\').unwrap());
        assert!(m.is_match("50%", "50!%", '!').unwrap());
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let m = LikeMatcher::default();
        assert!(m.is_match("a.b", "a.b", '\\').unwrap());
        assert!(!m.is_match("axb", "a.b", '\\').unwrap());
        assert!(m.is_match("(x)", "(x)", '\\').unwrap());
    }

    #[test]
    fn test_trailing_escape_is_error() {
        assert!(translate("abc\\", '\\').is_err());
    }

    #[test]
    fn test_escape_char_validation() {
        assert_eq!(escape_char("!").unwrap(), '!');
        assert!(escape_char("ab").is_err());
        assert!(escape_char("").is_err());
    }

    #[test]
    fn test_cache_reuse() {
        let m = LikeMatcher::new(2, 1024);
        let a = m.regex("a%", '\\').unwrap();
        let b = m.regex("a%", '\\').unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        m.regex("b%", '\\').unwrap();
        m.regex("c%", '\\').unwrap();
        assert_eq!(m.cached_len(), 2);
    }
}
