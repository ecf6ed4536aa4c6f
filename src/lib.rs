//! sqlroute library
//!
//! One mapper API dispatched across several SQL backends (SQLite, PostgreSQL,
//! MySQL). Each call picks its backend from a static route override, the key
//! selected for the unit of work, or the primary backend, and runs in a managed
//! session on that backend.

pub mod config;
pub mod db;
pub mod error;
pub mod mapper;
pub mod models;
pub mod routing;

pub use config::Config;
pub use error::{DbError, DbResult};
pub use mapper::{SqlStatementMapper, StatementMapper};
pub use routing::{CallRouter, RoutingContext, RoutingKey, RoutingTemplate};
