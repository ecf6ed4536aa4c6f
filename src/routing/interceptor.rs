//! Session interception around one forwarded mapper call.
//!
//! Every call a concrete mapper makes through its [`SessionTemplate`] runs through
//! [`SessionInterceptor::intercept`], which drives the session through
//! `Acquiring -> Executing -> {Committing | Failed} -> Released`:
//!
//! - the session is acquired from the backend's [`SessionFactory`], which hands back
//!   the externally managed transaction of the unit of work when there is one;
//! - sessions that are not externally managed are always committed on success, even
//!   when nothing was written, and rolled back on failure;
//! - failures are unwrapped to their original cause and, when a translator is
//!   configured and the cause is a persistence error, translated *after* the session
//!   has been released. A failed acquisition is offered to the translator the same
//!   way, with nothing to release;
//! - the session is released exactly once on every path. [`SessionGuard`] falls back
//!   to releasing on drop when the call future is cancelled or panics.

use crate::error::{DbError, DbResult};
use crate::routing::key::{RoutingContext, RoutingKey};
use crate::routing::translator::ErrorTranslator;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, warn};

/// A live handle to one backend's execution engine.
#[async_trait]
pub trait Session: Send + Sized {
    /// True when the session belongs to an externally managed transaction.
    fn is_transactional(&self) -> bool;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Return the session to its backend.
    async fn close(self);
}

/// Produces sessions for one backend.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Session;

    /// Open a session for the unit of work in `ctx`, joining its external
    /// transaction on this backend if one is active.
    async fn open_session(&self, ctx: &RoutingContext) -> DbResult<Self::Session>;
}

/// Lifecycle phase of an intercepted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Acquiring,
    Executing,
    Committing,
    Failed,
    Released,
}

/// Result of one intercepted call.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// The unwrapped error raised by the backend.
    BackendError(DbError),
    /// The substitute returned by the error translator.
    Translated(DbError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> DbResult<T> {
        match self {
            Self::Success(value) => Ok(value),
            Self::BackendError(err) | Self::Translated(err) => Err(err),
        }
    }
}

/// Scoped owner of an acquired session.
///
/// Use [`SessionGuard::release`] on every normal path. Dropping an unreleased guard
/// drops the session, which returns its connection and rolls back anything left open.
pub struct SessionGuard<S: Session> {
    session: Option<S>,
    key: RoutingKey,
    phase: SessionPhase,
}

impl<S: Session> SessionGuard<S> {
    fn new(session: S, key: RoutingKey) -> Self {
        Self {
            session: Some(session),
            key,
            phase: SessionPhase::Acquiring,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn enter(&mut self, phase: SessionPhase) {
        debug!(routing_key = %self.key, from = ?self.phase, to = ?phase, "Session phase");
        self.phase = phase;
    }

    fn session_mut(&mut self) -> DbResult<&mut S> {
        self.session
            .as_mut()
            .ok_or_else(|| DbError::internal("Session used after release"))
    }

    fn is_transactional(&self) -> bool {
        self.session.as_ref().is_some_and(S::is_transactional)
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.enter(SessionPhase::Committing);
        self.session_mut()?.commit().await
    }

    async fn rollback_local(&mut self) {
        if self.is_transactional() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.rollback().await {
                warn!(routing_key = %self.key, error = %e, "Rollback after failure failed");
            }
        }
    }

    /// Close the session. Consumes the guard, so it cannot run twice.
    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.enter(SessionPhase::Released);
    }
}

impl<S: Session> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!(
                routing_key = %self.key,
                phase = ?self.phase,
                "Session released via Drop - call was cancelled or panicked"
            );
            drop(session);
        }
    }
}

/// Shared wrapper around every forwarded call.
#[derive(Clone, Default)]
pub struct SessionInterceptor {
    translator: Option<Arc<dyn ErrorTranslator>>,
}

impl std::fmt::Debug for SessionInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInterceptor")
            .field("has_translator", &self.translator.is_some())
            .finish()
    }
}

impl SessionInterceptor {
    /// Interceptor without error translation.
    pub fn new() -> Self {
        Self { translator: None }
    }

    pub fn with_translator(translator: Arc<dyn ErrorTranslator>) -> Self {
        Self {
            translator: Some(translator),
        }
    }

    pub fn has_translator(&self) -> bool {
        self.translator.is_some()
    }

    /// Run `call` on a session of `factory`'s backend.
    pub async fn intercept<F, T, C>(
        &self,
        factory: &F,
        key: &RoutingKey,
        ctx: &RoutingContext,
        call: C,
    ) -> Outcome<T>
    where
        F: SessionFactory + ?Sized,
        C: for<'s> FnOnce(&'s mut F::Session) -> BoxFuture<'s, DbResult<T>> + Send,
        T: Send,
    {
        let session = match factory.open_session(ctx).await {
            Ok(session) => session,
            Err(e) => {
                debug!(routing_key = %key, error = %e, "Session acquisition failed");
                // Nothing was acquired, so there is nothing to release.
                return self.translate(key, e.into_cause());
            }
        };

        let mut guard = SessionGuard::new(session, key.clone());
        guard.enter(SessionPhase::Executing);

        let result = match guard.session_mut() {
            Ok(session) => call(session).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => {
                if !guard.is_transactional() {
                    // Some backends refuse to close a session that never saw a
                    // commit or rollback, so commit even when nothing changed.
                    if let Err(e) = guard.commit().await {
                        return self.fail(guard, e).await;
                    }
                }
                guard.release().await;
                Outcome::Success(value)
            }
            Err(e) => self.fail(guard, e).await,
        }
    }

    async fn fail<S: Session, T>(&self, mut guard: SessionGuard<S>, err: DbError) -> Outcome<T> {
        guard.enter(SessionPhase::Failed);
        let cause = err.into_cause();
        let key = guard.key.clone();

        guard.rollback_local().await;
        // Released before translating: a translator that blocks must not pin the
        // connection.
        guard.release().await;

        self.translate(&key, cause)
    }

    /// Offer an unwrapped persistence error to the translator, if any.
    fn translate<T>(&self, key: &RoutingKey, cause: DbError) -> Outcome<T> {
        match &self.translator {
            Some(translator) if cause.is_persistence() => match translator.translate(&cause) {
                Some(translated) => {
                    debug!(routing_key = %key, original = %cause, translated = %translated, "Translated backend error");
                    Outcome::Translated(translated)
                }
                None => Outcome::BackendError(cause),
            },
            _ => Outcome::BackendError(cause),
        }
    }
}

/// Per-backend handle given to concrete mappers.
///
/// All execution done through a template funnels through the shared interceptor.
pub struct SessionTemplate<F: SessionFactory> {
    key: RoutingKey,
    database_id: String,
    factory: Arc<F>,
    interceptor: Arc<SessionInterceptor>,
}

impl<F: SessionFactory> Clone for SessionTemplate<F> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            database_id: self.database_id.clone(),
            factory: Arc::clone(&self.factory),
            interceptor: Arc::clone(&self.interceptor),
        }
    }
}

impl<F: SessionFactory> std::fmt::Debug for SessionTemplate<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTemplate")
            .field("key", &self.key)
            .field("database_id", &self.database_id)
            .finish_non_exhaustive()
    }
}

impl<F: SessionFactory> SessionTemplate<F> {
    pub fn new(
        key: RoutingKey,
        database_id: impl Into<String>,
        factory: Arc<F>,
        interceptor: Arc<SessionInterceptor>,
    ) -> Self {
        Self {
            key,
            database_id: database_id.into(),
            factory,
            interceptor,
        }
    }

    pub fn key(&self) -> &RoutingKey {
        &self.key
    }

    /// Vendor id of the backend, for picking statement variants.
    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// Run `call` on a managed session of this backend.
    pub async fn execute<T, C>(&self, ctx: &RoutingContext, call: C) -> DbResult<T>
    where
        C: for<'s> FnOnce(&'s mut F::Session) -> BoxFuture<'s, DbResult<T>> + Send,
        T: Send,
    {
        self.interceptor
            .intercept(self.factory.as_ref(), &self.key, ctx, call)
            .await
            .into_result()
    }
}
