//! Built-in mapper contracts.

pub mod statement;

pub use statement::{SqlStatementMapper, StatementMapper};
