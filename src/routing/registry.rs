//! The immutable set of configured backends.

use crate::error::{DbError, DbResult};
use crate::models::{BackendSummary, DatabaseType};
use crate::routing::key::{RoutingContext, RoutingKey};
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration metadata recorded for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendMetadata {
    /// Key of the factory that built the backend.
    pub implementation: String,
    pub database_type: Option<DatabaseType>,
    /// Vendor id used to pick statement variants.
    pub database_id: String,
    pub server_version: Option<String>,
}

impl BackendMetadata {
    pub fn new(implementation: impl Into<String>, database_id: impl Into<String>) -> Self {
        Self {
            implementation: implementation.into(),
            database_type: None,
            database_id: database_id.into(),
            server_version: None,
        }
    }

    pub fn with_database_type(mut self, database_type: DatabaseType) -> Self {
        self.database_type = Some(database_type);
        self
    }

    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = Some(version.into());
        self
    }
}

/// One physical backend: its session factory and metadata.
pub struct BackendDescriptor<F> {
    factory: Arc<F>,
    metadata: BackendMetadata,
}

impl<F> BackendDescriptor<F> {
    pub fn new(factory: F, metadata: BackendMetadata) -> Self {
        Self {
            factory: Arc::new(factory),
            metadata,
        }
    }

    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    pub fn metadata(&self) -> &BackendMetadata {
        &self.metadata
    }
}

impl<F> std::fmt::Debug for BackendDescriptor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Ordered mapping from routing key to backend with one designated primary.
///
/// Never empty, and the primary is always one of the keys. Nothing can be added or
/// removed after [`BackendRegistry::build`], so the registry is shared behind an
/// `Arc` without locking.
pub struct BackendRegistry<F> {
    entries: Vec<(RoutingKey, BackendDescriptor<F>)>,
    index: HashMap<RoutingKey, usize>,
    primary: RoutingKey,
}

impl<F> BackendRegistry<F> {
    /// Build a registry from `entries` in configuration order.
    pub fn build(
        entries: impl IntoIterator<Item = (RoutingKey, BackendDescriptor<F>)>,
        primary: impl Into<RoutingKey>,
    ) -> DbResult<Self> {
        let primary = primary.into();
        let entries: Vec<_> = entries.into_iter().collect();

        if entries.is_empty() {
            return Err(DbError::configuration(
                "At least one backend must be configured",
            ));
        }

        let mut index = HashMap::with_capacity(entries.len());
        for (i, (key, _)) in entries.iter().enumerate() {
            if index.insert(key.clone(), i).is_some() {
                return Err(DbError::configuration(format!(
                    "Duplicate backend key '{}'",
                    key
                )));
            }
        }

        if !index.contains_key(&primary) {
            return Err(DbError::configuration(format!(
                "Primary backend '{}' is not among the configured backends: {}",
                primary,
                join_keys(entries.iter().map(|(k, _)| k))
            )));
        }

        Ok(Self {
            entries,
            index,
            primary,
        })
    }

    pub fn get(&self, key: &str) -> DbResult<&BackendDescriptor<F>> {
        self.index
            .get(key)
            .map(|&i| &self.entries[i].1)
            .ok_or_else(|| {
                DbError::routing(
                    key,
                    format!(
                        "No backend registered. Available: {}",
                        join_keys(self.keys())
                    ),
                )
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn primary_key(&self) -> &RoutingKey {
        &self.primary
    }

    pub fn primary(&self) -> &BackendDescriptor<F> {
        // The primary is checked in `build`.
        &self.entries[self.index[&self.primary]].1
    }

    /// Keys in configuration order.
    pub fn keys(&self) -> impl Iterator<Item = &RoutingKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RoutingKey, &BackendDescriptor<F>)> {
        self.entries.iter().map(|(k, d)| (k, d))
    }

    /// Fresh context selecting `key`, which must be registered.
    pub fn context_for(&self, key: &str) -> DbResult<RoutingContext> {
        let mut ctx = RoutingContext::new();
        self.select(&mut ctx, key)?;
        Ok(ctx)
    }

    /// Select `key` on an existing context after checking it is registered.
    pub fn select(&self, ctx: &mut RoutingContext, key: &str) -> DbResult<()> {
        let (key, _) = self
            .index
            .get_key_value(key)
            .ok_or_else(|| {
                DbError::routing(
                    key,
                    format!(
                        "Cannot select unknown backend. Available: {}",
                        join_keys(self.keys())
                    ),
                )
            })?;
        ctx.select(key.clone());
        Ok(())
    }

    /// Secret-free summary of every backend, in configuration order.
    pub fn summaries(&self) -> Vec<BackendSummary> {
        self.iter()
            .map(|(key, descriptor)| {
                let meta = descriptor.metadata();
                BackendSummary {
                    key: key.to_string(),
                    implementation: meta.implementation.clone(),
                    database_id: meta.database_id.clone(),
                    primary: *key == self.primary,
                    server_version: meta.server_version.clone(),
                }
            })
            .collect()
    }
}

impl<F> std::fmt::Debug for BackendRegistry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("keys", &self.keys().collect::<Vec<_>>())
            .field("primary", &self.primary)
            .finish()
    }
}

fn join_keys<'a>(keys: impl Iterator<Item = &'a RoutingKey>) -> String {
    keys.map(RoutingKey::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn descriptor(id: &str) -> BackendDescriptor<()> {
        BackendDescriptor::new((), BackendMetadata::new("sqlite", id))
    }

    fn registry() -> BackendRegistry<()> {
        BackendRegistry::build(
            [
                (RoutingKey::from("a"), descriptor("sqlite")),
                (RoutingKey::from("b"), descriptor("postgresql")),
            ],
            "a",
        )
        .unwrap()
    }

    #[test]
    fn test_build_keeps_configuration_order() {
        let registry = registry();
        let keys: Vec<_> = registry.keys().map(RoutingKey::as_str).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(registry.size(), 2);
        assert_eq!(registry.primary_key().as_str(), "a");
        assert_eq!(registry.primary().metadata().database_id, "sqlite");
    }

    #[test]
    fn test_build_rejects_empty() {
        let err = BackendRegistry::<()>::build(Vec::new(), "a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_build_rejects_missing_primary() {
        let err = BackendRegistry::build([(RoutingKey::from("a"), descriptor("sqlite"))], "z")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("'z'"));
    }

    #[test]
    fn test_build_rejects_duplicate_keys() {
        let err = BackendRegistry::build(
            [
                (RoutingKey::from("a"), descriptor("sqlite")),
                (RoutingKey::from("a"), descriptor("mysql")),
            ],
            "a",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate backend key 'a'"));
    }

    #[test]
    fn test_get_unknown_key_is_routing_error() {
        let registry = registry();
        assert!(registry.get("b").is_ok());
        assert!(registry.contains("b"));

        let err = registry.get("c").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Routing);
    }

    #[test]
    fn test_context_for_validates_key() {
        let registry = registry();
        let ctx = registry.context_for("b").unwrap();
        assert_eq!(ctx.selected().map(RoutingKey::as_str), Some("b"));

        let err = registry.context_for("nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Routing);
    }

    #[test]
    fn test_summaries_mark_primary() {
        let summaries = registry().summaries();
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].primary);
        assert!(!summaries[1].primary);
        assert_eq!(summaries[1].database_id, "postgresql");
    }
}
