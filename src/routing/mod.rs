//! Per-call backend routing.
//!
//! [`RoutingTemplate`] owns the [`BackendRegistry`], the [`KeyResolver`] and the
//! shared [`SessionInterceptor`]. Asking it for a mapper contract yields a
//! [`CallRouter`] that resolves a [`RoutingKey`] on every call and forwards to the
//! backend's concrete mapper, whose execution goes through the interceptor.

pub mod dispatch;
pub mod interceptor;
pub mod key;
pub mod registry;
pub mod resolver;
pub mod template;
pub mod translator;

pub use async_trait::async_trait;
pub use dispatch::{CallRouter, DispatchTable, DispatchTableBuilder, MapperContract};
pub use interceptor::{
    Outcome, Session, SessionFactory, SessionGuard, SessionInterceptor, SessionPhase,
    SessionTemplate,
};
pub use key::{RoutingContext, RoutingKey, UnitOfWork};
pub use registry::{BackendDescriptor, BackendMetadata, BackendRegistry};
pub use resolver::{KeyResolver, RouterOverrides};
pub use template::RoutingTemplate;
pub use translator::{ErrorTranslator, SqlStateTranslator};
