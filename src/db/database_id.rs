//! Vendor ids that let one statement carry per-database SQL variants.

use crate::models::DatabaseType;
use std::collections::HashMap;

/// Names the database flavour of a backend.
pub trait DatabaseIdProvider: Send + Sync {
    fn database_id(&self, db_type: DatabaseType) -> String;
}

/// Provider returning the vendor name, optionally replaced by an alias.
#[derive(Debug, Clone, Default)]
pub struct VendorDatabaseIdProvider {
    aliases: HashMap<DatabaseType, String>,
}

impl VendorDatabaseIdProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `alias` instead of the vendor name for `db_type`.
    pub fn with_alias(mut self, db_type: DatabaseType, alias: impl Into<String>) -> Self {
        self.aliases.insert(db_type, alias.into());
        self
    }

    pub fn vendor_name(db_type: DatabaseType) -> &'static str {
        match db_type {
            DatabaseType::PostgreSQL => "postgresql",
            DatabaseType::MySQL => "mysql",
            DatabaseType::SQLite => "sqlite",
        }
    }
}

impl DatabaseIdProvider for VendorDatabaseIdProvider {
    fn database_id(&self, db_type: DatabaseType) -> String {
        self.aliases
            .get(&db_type)
            .cloned()
            .unwrap_or_else(|| Self::vendor_name(db_type).to_string())
    }
}
