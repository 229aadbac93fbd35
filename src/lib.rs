pub mod config;
pub mod error;
pub mod executor;
pub mod sql;
pub mod storage;

pub use config::EngineConfig;
pub use error::{DbError, DbResult, ErrorCategory, ErrorLog};
pub use executor::{Engine, QueryOutput, ResultSet};
pub use sql::{ClauseMap, CompiledExpression, SchemaContext, StatementKind};
pub use storage::{ColumnDescriptor, ColumnType, MemoryStorage, Row, Storage, TableSchema};
