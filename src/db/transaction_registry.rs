//! External transactions spanning several routed calls.
//!
//! A unit of work can begin a transaction on a backend before making routed calls.
//! Every session the backend opens for that unit of work then joins the transaction
//! instead of beginning its own, and the interceptor leaves commit and rollback to
//! whoever began it. Each transaction sits behind an async mutex, so calls of one
//! unit of work never interleave on the same connection.

use crate::db::pool::DbPool;
use crate::db::session::DbTransaction;
use crate::error::{DbError, DbResult};
use crate::routing::{RoutingContext, RoutingKey, UnitOfWork};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, warn};

/// Default transaction timeout in seconds.
pub const DEFAULT_TRANSACTION_TIMEOUT_SECS: u32 = 60;

/// Maximum transaction timeout in seconds.
pub const MAX_TRANSACTION_TIMEOUT_SECS: u32 = 300;

/// Cleanup interval for expired transactions.
const CLEANUP_INTERVAL_SECS: u64 = 5;

type Slot = Arc<Mutex<Option<DbTransaction>>>;
type Scope = (UnitOfWork, RoutingKey);

struct ActiveTransaction {
    transaction: Slot,
    created_at: Instant,
    timeout_secs: u32,
}

impl ActiveTransaction {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed().as_secs() > self.timeout_secs as u64
    }
}

/// Metadata about an active transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionMetadata {
    pub unit_of_work: String,
    pub routing_key: String,
    /// When the transaction started (absolute time)
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub timeout_secs: u32,
}

pub struct TransactionManager {
    transactions: RwLock<HashMap<Scope, ActiveTransaction>>,
    /// System start time for converting Instant to DateTime
    system_start_instant: Instant,
    system_start_datetime: DateTime<Utc>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager").finish_non_exhaustive()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            transactions: RwLock::new(HashMap::new()),
            system_start_instant: Instant::now(),
            system_start_datetime: Utc::now(),
        }
    }

    /// Start a background task that rolls back expired transactions.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                self.cleanup_expired().await;
            }
        });
    }

    /// Begin a transaction on `pool` for the unit of work of `ctx`.
    pub async fn begin(
        &self,
        ctx: &RoutingContext,
        key: &RoutingKey,
        pool: &DbPool,
        timeout_secs: Option<u32>,
    ) -> DbResult<()> {
        let timeout_secs = timeout_secs
            .map(|t| t.min(MAX_TRANSACTION_TIMEOUT_SECS))
            .unwrap_or(DEFAULT_TRANSACTION_TIMEOUT_SECS);
        let scope = (ctx.unit_of_work().clone(), key.clone());

        if self.transactions.read().await.contains_key(&scope) {
            return Err(already_active(&scope));
        }

        let tx = pool.begin().await?;

        let duplicate = {
            let mut txs = self.transactions.write().await;
            if txs.contains_key(&scope) {
                Some(tx)
            } else {
                txs.insert(
                    scope.clone(),
                    ActiveTransaction {
                        transaction: Arc::new(Mutex::new(Some(tx))),
                        created_at: Instant::now(),
                        timeout_secs,
                    },
                );
                None
            }
        };

        if let Some(tx) = duplicate {
            // Lost a race with a concurrent begin; give the connection back.
            if let Err(e) = tx.rollback().await {
                warn!(
                    unit_of_work = %scope.0,
                    routing_key = %scope.1,
                    error = %e,
                    "Rollback of duplicate transaction failed"
                );
            }
            return Err(already_active(&scope));
        }

        info!(
            unit_of_work = %scope.0,
            routing_key = %scope.1,
            timeout_secs = timeout_secs,
            "Transaction started"
        );
        Ok(())
    }

    /// True when the unit of work has a live transaction on `key`.
    pub async fn is_active(&self, unit_of_work: &UnitOfWork, key: &RoutingKey) -> bool {
        let txs = self.transactions.read().await;
        txs.get(&(unit_of_work.clone(), key.clone()))
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Lock the unit of work's transaction on `key` for one call.
    ///
    /// Returns `None` when there is no such transaction. The lock is released when
    /// the guard drops.
    pub async fn bind(
        &self,
        unit_of_work: &UnitOfWork,
        key: &RoutingKey,
    ) -> DbResult<Option<OwnedMutexGuard<Option<DbTransaction>>>> {
        let slot = {
            let txs = self.transactions.read().await;
            match txs.get(&(unit_of_work.clone(), key.clone())) {
                None => return Ok(None),
                Some(entry) if entry.is_expired() => {
                    return Err(DbError::transaction(
                        "Transaction has expired",
                        key.as_str(),
                        unit_of_work.as_str(),
                    ));
                }
                Some(entry) => Arc::clone(&entry.transaction),
            }
        };

        let guard = slot.lock_owned().await;
        if guard.is_none() {
            return Err(DbError::transaction(
                "Transaction is no longer active",
                key.as_str(),
                unit_of_work.as_str(),
            ));
        }
        Ok(Some(guard))
    }

    pub async fn commit(&self, ctx: &RoutingContext, key: &RoutingKey) -> DbResult<()> {
        let tx = self.finish(ctx.unit_of_work(), key).await?;
        tx.commit().await?;
        info!(unit_of_work = %ctx.unit_of_work(), routing_key = %key, "Transaction committed");
        Ok(())
    }

    pub async fn rollback(&self, ctx: &RoutingContext, key: &RoutingKey) -> DbResult<()> {
        let tx = self.finish(ctx.unit_of_work(), key).await?;
        tx.rollback().await?;
        info!(unit_of_work = %ctx.unit_of_work(), routing_key = %key, "Transaction rolled back");
        Ok(())
    }

    /// Deregister the transaction and take it once in-flight calls are done with it.
    async fn finish(&self, unit_of_work: &UnitOfWork, key: &RoutingKey) -> DbResult<DbTransaction> {
        let entry = self
            .transactions
            .write()
            .await
            .remove(&(unit_of_work.clone(), key.clone()))
            .ok_or_else(|| {
                DbError::transaction("Transaction not found", key.as_str(), unit_of_work.as_str())
            })?;

        let mut slot = entry.transaction.lock().await;
        slot.take().ok_or_else(|| {
            DbError::transaction(
                "Transaction is no longer active",
                key.as_str(),
                unit_of_work.as_str(),
            )
        })
    }

    pub async fn list_all(&self) -> Vec<TransactionMetadata> {
        let txs = self.transactions.read().await;
        txs.iter()
            .map(|((unit_of_work, key), entry)| {
                // Convert Instant to DateTime by calculating offset from system start
                let offset_from_start = entry.created_at.duration_since(self.system_start_instant);
                TransactionMetadata {
                    unit_of_work: unit_of_work.to_string(),
                    routing_key: key.to_string(),
                    started_at: self.system_start_datetime + offset_from_start,
                    duration_secs: entry.created_at.elapsed().as_secs(),
                    timeout_secs: entry.timeout_secs,
                }
            })
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.transactions.read().await.len()
    }

    /// Roll back and forget every expired transaction.
    pub async fn cleanup_expired(&self) {
        let expired: Vec<(Scope, ActiveTransaction)> = {
            let mut txs = self.transactions.write().await;
            let scopes: Vec<Scope> = txs
                .iter()
                .filter(|(_, entry)| entry.is_expired())
                .map(|(scope, _)| scope.clone())
                .collect();
            scopes
                .into_iter()
                .filter_map(|scope| txs.remove(&scope).map(|entry| (scope, entry)))
                .collect()
        };

        for ((unit_of_work, key), entry) in expired {
            let tx = entry.transaction.lock().await.take();
            if let Some(tx) = tx {
                warn!(
                    unit_of_work = %unit_of_work,
                    routing_key = %key,
                    "Rolling back expired transaction"
                );
                if let Err(e) = tx.rollback().await {
                    warn!(
                        unit_of_work = %unit_of_work,
                        routing_key = %key,
                        error = %e,
                        "Rollback of expired transaction failed"
                    );
                }
            }
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn already_active(scope: &Scope) -> DbError {
    DbError::transaction(
        "A transaction is already active for this unit of work and backend",
        scope.1.as_str(),
        scope.0.as_str(),
    )
}
