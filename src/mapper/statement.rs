//! Generic statement mapper.
//!
//! [`StatementMapper`] runs named statements with positional parameters. Statements
//! may carry per-vendor SQL; each backend's [`SqlStatementMapper`] picks the variant
//! matching its database id. Failures are tagged with the statement id inside the
//! session; the interceptor strips that tag again before the caller sees the error.

use crate::db::session::PoolSessionFactory;
use crate::db::types::JsonRow;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, Statement};
use crate::routing::{RoutingContext, SessionTemplate, async_trait};
use std::sync::Arc;

#[async_trait]
pub trait StatementMapper: Send + Sync {
    /// Run a query and return its rows.
    async fn query(
        &self,
        ctx: &RoutingContext,
        statement: &Statement,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>>;

    /// Run a write statement and return the number of affected rows.
    async fn execute(
        &self,
        ctx: &RoutingContext,
        statement: &Statement,
        params: &[QueryParam],
    ) -> DbResult<u64>;
}

crate::routed_mapper!(StatementMapper {
    async fn query(&self, ctx: &RoutingContext, statement: &Statement, params: &[QueryParam]) -> DbResult<Vec<JsonRow>>;
    async fn execute(&self, ctx: &RoutingContext, statement: &Statement, params: &[QueryParam]) -> DbResult<u64>;
});

/// [`StatementMapper`] for one pooled backend.
#[derive(Debug, Clone)]
pub struct SqlStatementMapper {
    template: SessionTemplate<PoolSessionFactory>,
}

impl SqlStatementMapper {
    pub fn new(template: SessionTemplate<PoolSessionFactory>) -> Self {
        Self { template }
    }

    /// Binder for [`RoutingTemplate::mapper`](crate::routing::RoutingTemplate::mapper).
    pub fn bind(template: SessionTemplate<PoolSessionFactory>) -> Arc<dyn StatementMapper> {
        Arc::new(Self::new(template))
    }
}

#[async_trait]
impl StatementMapper for SqlStatementMapper {
    async fn query(
        &self,
        ctx: &RoutingContext,
        statement: &Statement,
        params: &[QueryParam],
    ) -> DbResult<Vec<JsonRow>> {
        let id = statement.id().to_string();
        let sql = statement.sql_for(self.template.database_id()).to_string();
        let params = params.to_vec();
        self.template
            .execute(ctx, move |session| {
                Box::pin(async move {
                    session
                        .fetch_all(&sql, &params)
                        .await
                        .map_err(|e| DbError::statement(id, e))
                })
            })
            .await
    }

    async fn execute(
        &self,
        ctx: &RoutingContext,
        statement: &Statement,
        params: &[QueryParam],
    ) -> DbResult<u64> {
        let id = statement.id().to_string();
        let sql = statement.sql_for(self.template.database_id()).to_string();
        let params = params.to_vec();
        self.template
            .execute(ctx, move |session| {
                Box::pin(async move {
                    session
                        .execute(&sql, &params)
                        .await
                        .map_err(|e| DbError::statement(id, e))
                })
            })
            .await
    }
}
