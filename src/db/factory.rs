//! Backend factories: turn configuration entries into pooled backends.

use crate::config::BackendConfig;
use crate::db::database_id::DatabaseIdProvider;
use crate::db::pool::{DbPool, create_pool};
use crate::db::session::PoolSessionFactory;
use crate::db::transaction_registry::TransactionManager;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use crate::routing::{BackendDescriptor, BackendMetadata, BackendRegistry, RoutingKey};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// A pool built from one configuration entry.
#[derive(Debug)]
pub struct NamedBackend {
    pub name: String,
    pub implementation: String,
    pub db_type: DatabaseType,
    pub pool: DbPool,
    pub server_version: Option<String>,
}

/// Builds backends for one implementation key.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    fn implementation_key(&self) -> &str;

    async fn create(&self, config: &BackendConfig) -> DbResult<NamedBackend>;
}

/// Factory backed by one of the sqlx drivers.
#[derive(Debug, Clone, Copy)]
pub struct SqlxBackendFactory {
    key: &'static str,
    db_type: DatabaseType,
}

impl SqlxBackendFactory {
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            key: db_type.implementation_key(),
            db_type,
        }
    }

    pub fn mysql() -> Self {
        Self::new(DatabaseType::MySQL)
    }

    pub fn postgres() -> Self {
        Self::new(DatabaseType::PostgreSQL)
    }

    pub fn sqlite() -> Self {
        Self::new(DatabaseType::SQLite)
    }
}

#[async_trait]
impl BackendFactory for SqlxBackendFactory {
    fn implementation_key(&self) -> &str {
        self.key
    }

    async fn create(&self, config: &BackendConfig) -> DbResult<NamedBackend> {
        if config.implementation != self.key {
            return Err(DbError::configuration(format!(
                "Illegal backend implementation key '{}', expected key is '{}'",
                config.implementation, self.key
            )));
        }

        let pool = create_pool(config, self.db_type).await?;
        let server_version = pool.server_version().await;
        Ok(NamedBackend {
            name: config.name.clone(),
            implementation: self.key.to_string(),
            db_type: self.db_type,
            pool,
            server_version,
        })
    }
}

/// The set of factories available for building backends.
#[derive(Clone, Default)]
pub struct BackendFactories {
    factories: Vec<Arc<dyn BackendFactory>>,
}

impl std::fmt::Debug for BackendFactories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFactories")
            .field("keys", &self.available_keys())
            .finish()
    }
}

impl BackendFactories {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in `mysql`, `postgres` and `sqlite` factories.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(SqlxBackendFactory::mysql())
            .register(SqlxBackendFactory::postgres())
            .register(SqlxBackendFactory::sqlite())
    }

    /// Add a factory, replacing any registered under the same key.
    pub fn register(mut self, factory: impl BackendFactory + 'static) -> Self {
        let key = factory.implementation_key().to_string();
        self.factories.retain(|f| f.implementation_key() != key);
        self.factories.push(Arc::new(factory));
        self
    }

    pub fn available_keys(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.implementation_key()).collect()
    }

    pub fn find(&self, implementation: &str) -> DbResult<&Arc<dyn BackendFactory>> {
        self.factories
            .iter()
            .find(|f| f.implementation_key() == implementation)
            .ok_or_else(|| {
                DbError::configuration(format!(
                    "No backend factory for implementation '{}'. Available: {}",
                    implementation,
                    self.available_keys().join(", ")
                ))
            })
    }

    pub async fn create(&self, config: &BackendConfig) -> DbResult<NamedBackend> {
        self.find(&config.implementation)?.create(config).await
    }

    /// Build every configured backend and assemble the registry.
    ///
    /// The whole list is checked before any pool is opened. If a pool fails to open,
    /// the ones already opened are closed again.
    pub async fn connect_all(
        &self,
        configs: &[BackendConfig],
        primary: &str,
        transactions: Option<Arc<TransactionManager>>,
        ids: &dyn DatabaseIdProvider,
    ) -> DbResult<BackendRegistry<PoolSessionFactory>> {
        self.validate(configs, primary)?;

        let mut backends: Vec<NamedBackend> = Vec::with_capacity(configs.len());
        for config in configs {
            match self.create(config).await {
                Ok(backend) => {
                    info!(
                        routing_key = %backend.name,
                        implementation = %backend.implementation,
                        server_version = ?backend.server_version,
                        "Backend connected"
                    );
                    backends.push(backend);
                }
                Err(e) => {
                    warn!(routing_key = %config.name, error = %e, "Backend failed to connect");
                    for backend in &backends {
                        backend.pool.close().await;
                    }
                    return Err(e);
                }
            }
        }

        let entries = backends.into_iter().map(|backend| {
            let key = RoutingKey::from(backend.name);
            let mut metadata =
                BackendMetadata::new(backend.implementation, ids.database_id(backend.db_type))
                    .with_database_type(backend.db_type);
            if let Some(version) = backend.server_version {
                metadata = metadata.with_server_version(version);
            }
            let factory = PoolSessionFactory::new(key.clone(), backend.pool, transactions.clone());
            (key, BackendDescriptor::new(factory, metadata))
        });

        BackendRegistry::build(entries, primary)
    }

    fn validate(&self, configs: &[BackendConfig], primary: &str) -> DbResult<()> {
        if configs.is_empty() {
            return Err(DbError::configuration(
                "At least one backend must be configured",
            ));
        }

        let mut seen = HashSet::new();
        for config in configs {
            if !seen.insert(config.name.as_str()) {
                return Err(DbError::configuration(format!(
                    "Duplicate backend key '{}'",
                    config.name
                )));
            }
            self.find(&config.implementation)?;
        }

        if !seen.contains(primary) {
            return Err(DbError::configuration(format!(
                "Primary backend '{}' is not among the configured backends",
                primary
            )));
        }
        Ok(())
    }
}

impl BackendRegistry<PoolSessionFactory> {
    /// Close every backend pool.
    pub async fn close_all(&self) {
        for (key, descriptor) in self.iter() {
            info!(routing_key = %key, "Closing backend");
            descriptor.factory().pool().close().await;
        }
    }
}
