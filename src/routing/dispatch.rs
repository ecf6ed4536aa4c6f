//! Dispatch tables and the call router that fronts them.
//!
//! A mapper contract is an `#[async_trait]` trait whose methods all take
//! `&RoutingContext` as their first argument. [`routed_mapper!`](crate::routed_mapper)
//! implements the contract for `CallRouter<dyn Contract>`, so callers hold one object
//! that picks a backend on every call:
//!
//! ```ignore
//! #[async_trait]
//! pub trait Users: Send + Sync {
//!     async fn find_by_id(&self, ctx: &RoutingContext, id: i64) -> DbResult<Option<User>>;
//! }
//!
//! sqlroute::routed_mapper!(Users {
//!     async fn find_by_id(&self, ctx: &RoutingContext, id: i64) -> DbResult<Option<User>>;
//! });
//! ```

use crate::error::{DbError, DbResult};
use crate::routing::interceptor::{SessionFactory, SessionInterceptor, SessionTemplate};
use crate::routing::key::{RoutingContext, RoutingKey};
use crate::routing::registry::BackendRegistry;
use crate::routing::resolver::KeyResolver;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Marker for trait objects usable as routed mapper contracts.
pub trait MapperContract: Send + Sync + 'static {
    /// Contract name used for override lookups and diagnostics.
    const NAME: &'static str;
}

/// Concrete mapper instance per backend for one contract.
pub struct DispatchTable<M: ?Sized> {
    contract: &'static str,
    mappers: HashMap<RoutingKey, Arc<M>>,
}

impl<M: ?Sized + MapperContract> DispatchTable<M> {
    /// Assemble a table whose key set must equal `registry_keys`.
    pub fn from_entries<'a>(
        entries: impl IntoIterator<Item = (RoutingKey, Arc<M>)>,
        registry_keys: impl IntoIterator<Item = &'a RoutingKey>,
    ) -> DbResult<Self> {
        let mappers: HashMap<RoutingKey, Arc<M>> = entries.into_iter().collect();

        let mut expected = 0;
        for key in registry_keys {
            if !mappers.contains_key(key) {
                return Err(DbError::configuration(format!(
                    "Mapper {} has no instance for backend '{}'",
                    M::NAME,
                    key
                )));
            }
            expected += 1;
        }
        if mappers.len() != expected {
            return Err(DbError::configuration(format!(
                "Mapper {} has instances for unregistered backends",
                M::NAME
            )));
        }

        Ok(Self {
            contract: M::NAME,
            mappers,
        })
    }
}

impl<M: ?Sized> DispatchTable<M> {
    pub fn contract(&self) -> &'static str {
        self.contract
    }

    pub fn get(&self, key: &RoutingKey) -> DbResult<&M> {
        self.mappers.get(key).map(Arc::as_ref).ok_or_else(|| {
            DbError::routing(
                key.as_str(),
                format!("No {} instance for this backend", self.contract),
            )
        })
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RoutingKey> {
        self.mappers.keys()
    }
}

/// Builds one concrete mapper per registered backend.
pub struct DispatchTableBuilder<F> {
    registry: Arc<BackendRegistry<F>>,
    interceptor: Arc<SessionInterceptor>,
}

impl<F: SessionFactory> DispatchTableBuilder<F> {
    pub fn new(registry: Arc<BackendRegistry<F>>, interceptor: Arc<SessionInterceptor>) -> Self {
        Self {
            registry,
            interceptor,
        }
    }

    /// Call `bind` once per backend with a template for that backend.
    pub fn build<M>(
        &self,
        mut bind: impl FnMut(SessionTemplate<F>) -> Arc<M>,
    ) -> DbResult<DispatchTable<M>>
    where
        M: ?Sized + MapperContract,
    {
        let entries: Vec<(RoutingKey, Arc<M>)> = self
            .registry
            .iter()
            .map(|(key, descriptor)| {
                let template = SessionTemplate::new(
                    key.clone(),
                    descriptor.metadata().database_id.clone(),
                    Arc::clone(descriptor.factory()),
                    Arc::clone(&self.interceptor),
                );
                (key.clone(), bind(template))
            })
            .collect();

        debug!(
            contract = M::NAME,
            backends = entries.len(),
            "Built dispatch table"
        );
        DispatchTable::from_entries(entries, self.registry.keys())
    }
}

/// The object callers use in place of a concrete mapper.
pub struct CallRouter<M: ?Sized> {
    table: Arc<DispatchTable<M>>,
    resolver: Arc<KeyResolver>,
}

impl<M: ?Sized> Clone for CallRouter<M> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<M: ?Sized + MapperContract> CallRouter<M> {
    pub fn new(table: DispatchTable<M>, resolver: Arc<KeyResolver>) -> Self {
        Self {
            table: Arc::new(table),
            resolver,
        }
    }

    /// Concrete mapper that should serve `method` for this call.
    ///
    /// A key missing from the table is an error; there is no fallback to the primary.
    pub fn route(&self, method: &str, ctx: &RoutingContext) -> DbResult<&M> {
        let key = self.resolver.resolve(M::NAME, method, ctx)?;
        let mapper = self.table.get(key)?;
        debug!(
            contract = M::NAME,
            method = method,
            routing_key = %key,
            unit_of_work = %ctx.unit_of_work(),
            "Routing call"
        );
        Ok(mapper)
    }

    pub fn table(&self) -> &DispatchTable<M> {
        &self.table
    }
}

/// Implement a mapper contract for `CallRouter<dyn Contract>`.
///
/// Repeat the contract's method signatures; each generated method resolves a backend
/// and forwards the call with its arguments unchanged. The first argument after
/// `&self` must be the `&RoutingContext`.
#[macro_export]
macro_rules! routed_mapper {
    ($contract:ident {
        $(
            async fn $method:ident(&self, $ctx:ident : $ctx_ty:ty $(, $arg:ident : $arg_ty:ty)* $(,)?) -> $ret:ty;
        )*
    }) => {
        impl $crate::routing::MapperContract for dyn $contract {
            const NAME: &'static str = stringify!($contract);
        }

        #[$crate::routing::async_trait]
        impl $contract for $crate::routing::CallRouter<dyn $contract> {
            $(
                async fn $method(&self, $ctx: $ctx_ty $(, $arg: $arg_ty)*) -> $ret {
                    self.route(stringify!($method), $ctx)?
                        .$method($ctx $(, $arg)*)
                        .await
                }
            )*
        }
    };
}
