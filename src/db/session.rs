//! Pool-backed sessions.
//!
//! A [`DbSession`] wraps one sqlx transaction. It either owns a transaction begun
//! for a single call, or holds the lock on the unit of work's external transaction
//! kept by the [`TransactionManager`].

use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param, bound_query};
use crate::db::pool::DbPool;
use crate::db::transaction_registry::TransactionManager;
use crate::db::types::{JsonRow, RowToJson};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam};
use crate::routing::{RoutingContext, RoutingKey, Session, SessionFactory};
use async_trait::async_trait;
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Vendor-specific transaction on a pooled connection.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbTransaction").field(&self.db_type()).finish()
    }
}

impl DbTransaction {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn commit(self) -> DbResult<()> {
        impl_tx_dispatch!(self, {
            MySql(tx) => tx.commit().await?,
            Postgres(tx) => tx.commit().await?,
            SQLite(tx) => tx.commit().await?,
        });
        Ok(())
    }

    pub async fn rollback(self) -> DbResult<()> {
        impl_tx_dispatch!(self, {
            MySql(tx) => tx.rollback().await?,
            Postgres(tx) => tx.rollback().await?,
            SQLite(tx) => tx.rollback().await?,
        });
        Ok(())
    }

    /// Run a write statement and return the number of affected rows.
    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let result = impl_tx_dispatch!(self, {
            MySql(tx) => bound_query!(sql, params, bind_mysql_param)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
            Postgres(tx) => bound_query!(sql, params, bind_postgres_param)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
            SQLite(tx) => bound_query!(sql, params, bind_sqlite_param)
                .execute(&mut **tx)
                .await?
                .rows_affected(),
        });
        Ok(result)
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        let rows: Vec<JsonRow> = impl_tx_dispatch!(self, {
            MySql(tx) => bound_query!(sql, params, bind_mysql_param)
                .fetch_all(&mut **tx)
                .await?
                .iter()
                .map(RowToJson::to_json_map)
                .collect(),
            Postgres(tx) => bound_query!(sql, params, bind_postgres_param)
                .fetch_all(&mut **tx)
                .await?
                .iter()
                .map(RowToJson::to_json_map)
                .collect(),
            SQLite(tx) => bound_query!(sql, params, bind_sqlite_param)
                .fetch_all(&mut **tx)
                .await?
                .iter()
                .map(RowToJson::to_json_map)
                .collect(),
        });
        Ok(rows)
    }

    pub async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<JsonRow>> {
        let row = impl_tx_dispatch!(self, {
            MySql(tx) => bound_query!(sql, params, bind_mysql_param)
                .fetch_optional(&mut **tx)
                .await?
                .map(|r| r.to_json_map()),
            Postgres(tx) => bound_query!(sql, params, bind_postgres_param)
                .fetch_optional(&mut **tx)
                .await?
                .map(|r| r.to_json_map()),
            SQLite(tx) => bound_query!(sql, params, bind_sqlite_param)
                .fetch_optional(&mut **tx)
                .await?
                .map(|r| r.to_json_map()),
        });
        Ok(row)
    }
}

enum SessionState {
    /// Begun for this call; `None` once committed or rolled back.
    Local(Option<DbTransaction>),
    /// Locked external transaction of the unit of work.
    Bound(OwnedMutexGuard<Option<DbTransaction>>),
}

/// Session handed to concrete mappers.
pub struct DbSession {
    key: RoutingKey,
    state: SessionState,
}

impl DbSession {
    fn local(key: RoutingKey, tx: DbTransaction) -> Self {
        Self {
            key,
            state: SessionState::Local(Some(tx)),
        }
    }

    fn bound(key: RoutingKey, guard: OwnedMutexGuard<Option<DbTransaction>>) -> Self {
        Self {
            key,
            state: SessionState::Bound(guard),
        }
    }

    pub fn key(&self) -> &RoutingKey {
        &self.key
    }

    fn transaction(&mut self) -> DbResult<&mut DbTransaction> {
        let slot = match &mut self.state {
            SessionState::Local(slot) => slot,
            SessionState::Bound(guard) => &mut **guard,
        };
        slot.as_mut()
            .ok_or_else(|| DbError::internal("Session transaction already finished"))
    }

    pub async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let rows_affected = self.transaction()?.execute(sql, params).await?;
        debug!(routing_key = %self.key, rows_affected, "Executed statement");
        Ok(rows_affected)
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        let rows = self.transaction()?.fetch_all(sql, params).await?;
        debug!(routing_key = %self.key, row_count = rows.len(), "Fetched rows");
        Ok(rows)
    }

    pub async fn fetch_optional(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> DbResult<Option<JsonRow>> {
        self.transaction()?.fetch_optional(sql, params).await
    }
}

#[async_trait]
impl Session for DbSession {
    fn is_transactional(&self) -> bool {
        matches!(self.state, SessionState::Bound(_))
    }

    async fn commit(&mut self) -> DbResult<()> {
        match &mut self.state {
            SessionState::Local(slot) => match slot.take() {
                Some(tx) => tx.commit().await,
                None => Ok(()),
            },
            // Owned by the transaction manager.
            SessionState::Bound(_) => Ok(()),
        }
    }

    async fn rollback(&mut self) -> DbResult<()> {
        match &mut self.state {
            SessionState::Local(slot) => match slot.take() {
                Some(tx) => tx.rollback().await,
                None => Ok(()),
            },
            SessionState::Bound(_) => Ok(()),
        }
    }

    async fn close(self) {
        // A local transaction still open here is rolled back when dropped; a bound
        // one is unlocked for the next call of the unit of work.
        debug!(routing_key = %self.key, "Session closed");
    }
}

/// Session factory for one pooled backend.
#[derive(Debug, Clone)]
pub struct PoolSessionFactory {
    key: RoutingKey,
    pool: DbPool,
    transactions: Option<Arc<TransactionManager>>,
}

impl PoolSessionFactory {
    pub fn new(
        key: RoutingKey,
        pool: DbPool,
        transactions: Option<Arc<TransactionManager>>,
    ) -> Self {
        Self {
            key,
            pool,
            transactions,
        }
    }

    pub fn key(&self) -> &RoutingKey {
        &self.key
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl SessionFactory for PoolSessionFactory {
    type Session = DbSession;

    async fn open_session(&self, ctx: &RoutingContext) -> DbResult<DbSession> {
        if let Some(transactions) = &self.transactions {
            if let Some(guard) = transactions.bind(ctx.unit_of_work(), &self.key).await? {
                debug!(
                    routing_key = %self.key,
                    unit_of_work = %ctx.unit_of_work(),
                    "Joined external transaction"
                );
                return Ok(DbSession::bound(self.key.clone(), guard));
            }
        }
        let tx = self.pool.begin().await?;
        Ok(DbSession::local(self.key.clone(), tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> DbPool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        DbPool::SQLite(pool)
    }

    #[tokio::test]
    async fn test_local_session_commit_persists() {
        let pool = memory_pool().await;
        let factory = PoolSessionFactory::new(RoutingKey::from("a"), pool.clone(), None);

        let mut session = factory.open_session(&RoutingContext::new()).await.unwrap();
        assert!(!session.is_transactional());
        let n = session
            .execute("INSERT INTO items (name) VALUES (?)", &[QueryParam::from("x")])
            .await
            .unwrap();
        assert_eq!(n, 1);
        session.commit().await.unwrap();
        session.close().await;

        let mut session = factory.open_session(&RoutingContext::new()).await.unwrap();
        let rows = session.fetch_all("SELECT name FROM items", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], serde_json::json!("x"));
    }

    #[tokio::test]
    async fn test_local_session_rollback_discards() {
        let pool = memory_pool().await;
        let factory = PoolSessionFactory::new(RoutingKey::from("a"), pool, None);

        let mut session = factory.open_session(&RoutingContext::new()).await.unwrap();
        session
            .execute("INSERT INTO items (name) VALUES ('y')", &[])
            .await
            .unwrap();
        session.rollback().await.unwrap();
        assert!(session.execute("SELECT 1", &[]).await.is_err());
        session.close().await;

        let mut session = factory.open_session(&RoutingContext::new()).await.unwrap();
        let row = session
            .fetch_optional("SELECT name FROM items", &[])
            .await
            .unwrap();
        assert!(row.is_none());
    }
}
