//! Per-call selection of a routing key.

use crate::config::RouteSpec;
use crate::error::{DbError, DbResult};
use crate::routing::key::{RoutingContext, RoutingKey};
use crate::routing::registry::BackendRegistry;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Static (contract, method) -> key table, fixed at setup.
#[derive(Debug, Clone, Default)]
pub struct RouterOverrides {
    routes: HashMap<String, HashMap<String, RoutingKey>>,
}

impl RouterOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `contract.method` to `key`. A later route for the same method wins.
    pub fn with_route(
        mut self,
        contract: impl Into<String>,
        method: impl Into<String>,
        key: impl Into<RoutingKey>,
    ) -> Self {
        self.routes
            .entry(contract.into())
            .or_default()
            .insert(method.into(), key.into());
        self
    }

    pub fn from_specs(specs: &[RouteSpec]) -> Self {
        specs.iter().fold(Self::new(), |overrides, spec| {
            overrides.with_route(spec.contract.as_str(), spec.method.as_str(), spec.key.as_str())
        })
    }

    pub fn get(&self, contract: &str, method: &str) -> Option<&RoutingKey> {
        self.routes.get(contract)?.get(method)
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &str, &RoutingKey)> {
        self.routes.iter().flat_map(|(contract, methods)| {
            methods
                .iter()
                .map(move |(method, key)| (contract.as_str(), method.as_str(), key))
        })
    }
}

/// Chooses the backend for each call.
///
/// Priority: an override for (contract, method), then the key selected on the
/// context, then the registry primary. The chosen key must be registered.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    primary: RoutingKey,
    known: HashSet<RoutingKey>,
    overrides: RouterOverrides,
}

impl KeyResolver {
    pub fn new<F>(registry: &BackendRegistry<F>, overrides: RouterOverrides) -> Self {
        let known: HashSet<RoutingKey> = registry.keys().cloned().collect();

        for (contract, method, key) in overrides.iter() {
            if !known.contains(key) {
                warn!(
                    contract = contract,
                    method = method,
                    routing_key = %key,
                    "Route points at an unknown backend; calls to it will fail"
                );
            }
        }

        Self {
            primary: registry.primary_key().clone(),
            known,
            overrides,
        }
    }

    pub fn overrides(&self) -> &RouterOverrides {
        &self.overrides
    }

    pub fn resolve<'a>(
        &'a self,
        contract: &str,
        method: &str,
        ctx: &'a RoutingContext,
    ) -> DbResult<&'a RoutingKey> {
        let key = self
            .overrides
            .get(contract, method)
            .or_else(|| ctx.selected())
            .unwrap_or(&self.primary);

        if !self.known.contains(key) {
            return Err(DbError::routing(
                key.as_str(),
                format!("No backend registered for {}.{}", contract, method),
            ));
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::routing::registry::{BackendDescriptor, BackendMetadata};

    fn registry() -> BackendRegistry<()> {
        let entry = |k: &str| {
            (
                RoutingKey::from(k),
                BackendDescriptor::new((), BackendMetadata::new("sqlite", "sqlite")),
            )
        };
        BackendRegistry::build([entry("a"), entry("b")], "a").unwrap()
    }

    #[test]
    fn test_empty_context_resolves_to_primary() {
        let resolver = KeyResolver::new(&registry(), RouterOverrides::new());
        let ctx = RoutingContext::new();
        assert_eq!(resolver.resolve("Users", "find_by_id", &ctx).unwrap().as_str(), "a");
    }

    #[test]
    fn test_context_selection_beats_primary() {
        let resolver = KeyResolver::new(&registry(), RouterOverrides::new());
        let ctx = RoutingContext::with_key("b");
        assert_eq!(resolver.resolve("Users", "find_by_id", &ctx).unwrap().as_str(), "b");
    }

    #[test]
    fn test_override_beats_context() {
        let overrides = RouterOverrides::new().with_route("Users", "find_by_id", "b");
        let resolver = KeyResolver::new(&registry(), overrides);
        let ctx = RoutingContext::with_key("a");

        assert_eq!(resolver.resolve("Users", "find_by_id", &ctx).unwrap().as_str(), "b");
        // Other methods of the same contract are not affected.
        assert_eq!(resolver.resolve("Users", "delete", &ctx).unwrap().as_str(), "a");
    }

    #[test]
    fn test_unknown_override_key_fails_at_resolution() {
        let overrides = RouterOverrides::new().with_route("Users", "find_by_id", "zzz");
        let resolver = KeyResolver::new(&registry(), overrides);

        let err = resolver
            .resolve("Users", "find_by_id", &RoutingContext::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Routing);
    }

    #[test]
    fn test_unknown_context_key_fails() {
        let resolver = KeyResolver::new(&registry(), RouterOverrides::new());
        let ctx = RoutingContext::with_key("c");
        assert!(resolver.resolve("Users", "find_by_id", &ctx).is_err());
    }

    #[test]
    fn test_overrides_from_specs() {
        let specs = vec![
            RouteSpec::parse("Users.find_by_id=b").unwrap(),
            RouteSpec::parse("Orders.list=a").unwrap(),
        ];
        let overrides = RouterOverrides::from_specs(&specs);
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides.get("Orders", "list").map(RoutingKey::as_str), Some("a"));
        assert!(overrides.get("Orders", "find_by_id").is_none());
    }
}
