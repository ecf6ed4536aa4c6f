//! Data models for sqlroute.
//!
//! This module re-exports all model types used throughout the crate.

pub mod backend;
pub mod statement;

// Re-export commonly used types
pub use backend::{BackendSummary, DatabaseType};
pub use statement::{QueryParam, Statement};
