//! Entry point that ties the registry, resolver and interceptor together.

use crate::error::DbResult;
use crate::routing::dispatch::{CallRouter, DispatchTableBuilder, MapperContract};
use crate::routing::interceptor::{SessionFactory, SessionInterceptor, SessionTemplate};
use crate::routing::key::RoutingContext;
use crate::routing::registry::{BackendDescriptor, BackendRegistry};
use crate::routing::resolver::{KeyResolver, RouterOverrides};
use std::sync::Arc;

/// Hands out call routers for mapper contracts.
///
/// Every session opened through a router is a fresh per-call session (or the unit of
/// work's external transaction). There is no executor-mode setting: batching or
/// statement reuse across calls is not offered.
pub struct RoutingTemplate<F> {
    registry: Arc<BackendRegistry<F>>,
    resolver: Arc<KeyResolver>,
    interceptor: Arc<SessionInterceptor>,
}

impl<F> Clone for RoutingTemplate<F> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            resolver: Arc::clone(&self.resolver),
            interceptor: Arc::clone(&self.interceptor),
        }
    }
}

impl<F: SessionFactory> RoutingTemplate<F> {
    pub fn new(
        registry: BackendRegistry<F>,
        overrides: RouterOverrides,
        interceptor: SessionInterceptor,
    ) -> Self {
        let resolver = KeyResolver::new(&registry, overrides);
        Self {
            registry: Arc::new(registry),
            resolver: Arc::new(resolver),
            interceptor: Arc::new(interceptor),
        }
    }

    /// Router for contract `M`, with one instance per backend produced by `bind`.
    pub fn mapper<M>(
        &self,
        bind: impl FnMut(SessionTemplate<F>) -> Arc<M>,
    ) -> DbResult<CallRouter<M>>
    where
        M: ?Sized + MapperContract,
    {
        let table = DispatchTableBuilder::new(Arc::clone(&self.registry), Arc::clone(&self.interceptor))
            .build(bind)?;
        Ok(CallRouter::new(table, Arc::clone(&self.resolver)))
    }

    /// Backend a call without overrides would use for `ctx`.
    ///
    /// A single-backend registry always yields that backend. Otherwise the context
    /// selection wins, falling back to the primary.
    pub fn local_descriptor(&self, ctx: &RoutingContext) -> DbResult<&BackendDescriptor<F>> {
        if self.registry.size() == 1 {
            return Ok(self.registry.primary());
        }
        match ctx.selected() {
            Some(key) => self.registry.get(key.as_str()),
            None => Ok(self.registry.primary()),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry<F>> {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<KeyResolver> {
        &self.resolver
    }

    pub fn interceptor(&self) -> &Arc<SessionInterceptor> {
        &self.interceptor
    }
}
