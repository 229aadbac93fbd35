use parking_lot::Mutex;
use thiserror::Error;

/// The four failure families every engine error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed tokens, unbalanced parentheses, unsupported constructs
    Syntax,
    /// Unknown table/column/function, column-count mismatch
    Semantic,
    /// Runtime fault while evaluating an expression
    Evaluation,
    /// Identifier or primary-key collisions
    SchemaConflict,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Syntax error: {0}")]
    SyntaxError(String),

    #[error("Semantic error: {0}")]
    SemanticError(String),

    #[error("Evaluation error: {0}")]
    EvaluationError(String),

    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Table '{0}' already exists")]
    TableAlreadyExists(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Could not acquire lock on {0}")]
    LockUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for engine operations
pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DbError::SyntaxError(_) => ErrorCategory::Syntax,
            DbError::SemanticError(_) | DbError::TableNotFound(_) => ErrorCategory::Semantic,
            DbError::EvaluationError(_)
            | DbError::ConstraintViolation(_)
            | DbError::LockUnavailable(_)
            | DbError::Storage(_) => ErrorCategory::Evaluation,
            DbError::SchemaConflict(_) | DbError::TableAlreadyExists(_) => {
                ErrorCategory::SchemaConflict
            }
        }
    }

    pub(crate) fn syntax(msg: impl Into<String>) -> Self {
        DbError::SyntaxError(msg.into())
    }

    pub(crate) fn semantic(msg: impl Into<String>) -> Self {
        DbError::SemanticError(msg.into())
    }

    pub(crate) fn eval(msg: impl Into<String>) -> Self {
        DbError::EvaluationError(msg.into())
    }
}

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Ordered log of every error an engine instance has reported.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<Vec<DbError>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, err: DbError) {
        tracing::warn!("{}", err);
        self.entries.lock().push(err);
    }

    pub fn entries(&self) -> Vec<DbError> {
        self.entries.lock().clone()
    }

    pub fn last(&self) -> Option<DbError> {
        self.entries.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DbError::SyntaxError("unbalanced parentheses".to_string());
        assert_eq!(err.to_string(), "Syntax error: unbalanced parentheses");

        let err = DbError::TableNotFound("users".to_string());
        assert_eq!(err.to_string(), "Table 'users' not found");

        let err = DbError::SchemaConflict("duplicate primary key 1".to_string());
        assert_eq!(err.to_string(), "Schema conflict: duplicate primary key 1");
    }

    #[test]
    fn test_categories() {
        assert_eq!(DbError::syntax("x").category(), ErrorCategory::Syntax);
        assert_eq!(
            DbError::TableNotFound("t".into()).category(),
            ErrorCategory::Semantic
        );
        assert_eq!(DbError::eval("x").category(), ErrorCategory::Evaluation);
        assert_eq!(
            DbError::TableAlreadyExists("t".into()).category(),
            ErrorCategory::SchemaConflict
        );
    }

    #[test]
    fn test_error_log_keeps_order() {
        let log = ErrorLog::new();
        assert!(log.is_empty());
        log.record(DbError::syntax("first"));
        log.record(DbError::semantic("second"));
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0], DbError::syntax("first"));
        assert_eq!(log.last(), Some(DbError::semantic("second")));
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_serializes_as_message() {
        let err = DbError::eval("division by zero");
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Evaluation error: division by zero\"");
    }
}
