//! Routing keys and the per-unit-of-work routing context.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Identifier of one logical backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey(Arc<str>);

impl RoutingKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoutingKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for RoutingKey {
    fn from(key: String) -> Self {
        Self(Arc::from(key))
    }
}

impl Borrow<str> for RoutingKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identity of one unit of work (request, job, transaction scope).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitOfWork(String);

impl UnitOfWork {
    fn generate() -> Self {
        Self(format!("uow_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routing state for one unit of work.
///
/// Create one per unit of work and pass it by reference through every routed call.
/// A context is never shared between concurrently running units of work; reusing a
/// worker for a new unit of work means creating a new context (or calling
/// [`RoutingContext::reset`]).
#[derive(Debug, Clone)]
pub struct RoutingContext {
    unit_of_work: UnitOfWork,
    selected: Option<RoutingKey>,
}

impl RoutingContext {
    /// Fresh context with no selection and a new unit-of-work id.
    pub fn new() -> Self {
        Self {
            unit_of_work: UnitOfWork::generate(),
            selected: None,
        }
    }

    /// Fresh context with `key` selected.
    ///
    /// The key is not checked here; prefer
    /// [`BackendRegistry::context_for`](crate::routing::BackendRegistry::context_for)
    /// when the key comes from outside the program.
    pub fn with_key(key: impl Into<RoutingKey>) -> Self {
        Self {
            unit_of_work: UnitOfWork::generate(),
            selected: Some(key.into()),
        }
    }

    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.unit_of_work
    }

    pub fn selected(&self) -> Option<&RoutingKey> {
        self.selected.as_ref()
    }

    /// Overwrite the selection for the remainder of this unit of work.
    pub fn select(&mut self, key: impl Into<RoutingKey>) {
        self.selected = Some(key.into());
    }

    /// Drop the selection; later calls fall back to overrides or the primary.
    pub fn clear(&mut self) {
        self.selected = None;
    }

    /// Start a new unit of work on this context: new id, no selection.
    pub fn reset(&mut self) {
        self.unit_of_work = UnitOfWork::generate();
        self.selected = None;
    }
}

impl Default for RoutingContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_routing_key_equality_by_value() {
        assert_eq!(RoutingKey::from("a"), RoutingKey::from("a".to_string()));
        assert_ne!(RoutingKey::from("a"), RoutingKey::from("b"));
    }

    #[test]
    fn test_routing_key_map_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(RoutingKey::from("orders"), 1);
        assert_eq!(map.get("orders"), Some(&1));
    }

    #[test]
    fn test_context_select_and_clear() {
        let mut ctx = RoutingContext::new();
        assert!(ctx.selected().is_none());

        ctx.select("b");
        assert_eq!(ctx.selected().map(RoutingKey::as_str), Some("b"));

        ctx.clear();
        assert!(ctx.selected().is_none());
    }

    #[test]
    fn test_context_reset_starts_new_unit_of_work() {
        let mut ctx = RoutingContext::with_key("a");
        let before = ctx.unit_of_work().clone();

        ctx.reset();
        assert_ne!(ctx.unit_of_work(), &before);
        assert!(ctx.selected().is_none());
    }

    #[test]
    fn test_unit_of_work_id_format() {
        let ctx = RoutingContext::new();
        assert!(ctx.unit_of_work().as_str().starts_with("uow_"));
        assert_eq!(ctx.unit_of_work().as_str().len(), 4 + 32);
    }
}
