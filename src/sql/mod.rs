//! SQL front end: tokenizer, clause parser, expression compiler and the
//! safe evaluator the executors run compiled expressions with.

pub mod ast;
pub mod clauses;
pub mod column_defs;
pub mod compiler;
pub mod evaluator;
pub mod lexer;
pub mod like;

pub use clauses::{parse_clauses, parse_statement, Clause, ClauseMap, SetOperator, StatementKind};
pub use compiler::{CompileMode, CompiledExpression, ExprSource, ExpressionCompiler, SchemaContext};
pub use evaluator::Evaluator;
pub use lexer::{tokenize, Token, TokenKind, Tokenizer};
