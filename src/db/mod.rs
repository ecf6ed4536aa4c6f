//! Database layer.
//!
//! This module provides the sqlx-backed side of routing:
//! - Vendor-specific connection pools and backend factories
//! - Sessions over pooled transactions
//! - External transactions shared by the calls of one unit of work
//! - Row to JSON conversion and parameter binding
//! - Database dispatch macros for reducing code duplication

pub mod database_id;
pub mod factory;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod session;
pub mod transaction_registry;
pub mod types;

pub use database_id::{DatabaseIdProvider, VendorDatabaseIdProvider};
pub use factory::{BackendFactories, BackendFactory, NamedBackend, SqlxBackendFactory};
pub use pool::DbPool;
pub use session::{DbSession, DbTransaction, PoolSessionFactory};
pub use transaction_registry::{TransactionManager, TransactionMetadata};
pub use types::JsonRow;
