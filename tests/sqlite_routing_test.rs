//! End-to-end routing across two SQLite backends.

use serde_json::json;
use sqlroute::config::BackendConfig;
use sqlroute::db::{BackendFactories, PoolSessionFactory, TransactionManager, VendorDatabaseIdProvider};
use sqlroute::error::{DbError, ErrorKind};
use sqlroute::mapper::{SqlStatementMapper, StatementMapper};
use sqlroute::models::{QueryParam, Statement};
use sqlroute::routing::{
    CallRouter, RouterOverrides, RoutingContext, RoutingKey, RoutingTemplate, SessionInterceptor,
    SqlStateTranslator,
};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    template: RoutingTemplate<PoolSessionFactory>,
    transactions: Arc<TransactionManager>,
}

impl Fixture {
    async fn new(overrides: RouterOverrides) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let configs: Vec<BackendConfig> = ["a", "b"]
            .iter()
            .map(|name| {
                let path = dir.path().join(format!("{name}.db"));
                BackendConfig::new(*name, format!("sqlite:{}", path.display()))
            })
            .collect();

        let transactions = Arc::new(TransactionManager::new());
        let registry = BackendFactories::with_defaults()
            .connect_all(
                &configs,
                "a",
                Some(Arc::clone(&transactions)),
                &VendorDatabaseIdProvider::new(),
            )
            .await
            .unwrap();

        let template = RoutingTemplate::new(
            registry,
            overrides,
            SessionInterceptor::with_translator(Arc::new(SqlStateTranslator)),
        );

        let fixture = Self {
            _dir: dir,
            template,
            transactions,
        };
        // Seeded directly on each pool so route overrides do not apply.
        for key in ["a", "b"] {
            let pool = fixture.template.registry().get(key).unwrap().factory().pool();
            let mut tx = pool.begin().await.unwrap();
            tx.execute(
                "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT UNIQUE)",
                &[],
            )
            .await
            .unwrap();
            tx.execute(
                "INSERT INTO users (id, email) VALUES (?, ?)",
                &[QueryParam::from(1_i64), QueryParam::from(format!("{key}@example.com"))],
            )
            .await
            .unwrap();
            tx.commit().await.unwrap();
        }
        fixture
    }

    fn mapper(&self) -> CallRouter<dyn StatementMapper> {
        self.template.mapper(SqlStatementMapper::bind).unwrap()
    }
}

fn select_email() -> Statement {
    Statement::new("users.email", "SELECT email FROM users WHERE id = ?")
}

async fn count_users(mapper: &CallRouter<dyn StatementMapper>, ctx: &RoutingContext) -> usize {
    let rows = mapper
        .query(ctx, &Statement::new("users.ids", "SELECT id FROM users"), &[])
        .await
        .unwrap();
    assert!(rows.iter().all(|row| row["id"].is_i64()));
    rows.len()
}

#[tokio::test]
async fn test_routes_by_context_selection() {
    let fixture = Fixture::new(RouterOverrides::new()).await;
    let mapper = fixture.mapper();
    let params = [QueryParam::from(1_i64)];

    let primary = mapper
        .query(&RoutingContext::new(), &select_email(), &params)
        .await
        .unwrap();
    assert_eq!(primary[0]["email"], json!("a@example.com"));

    let mut ctx = RoutingContext::new();
    fixture.template.registry().select(&mut ctx, "b").unwrap();
    let selected = mapper.query(&ctx, &select_email(), &params).await.unwrap();
    assert_eq!(selected[0]["email"], json!("b@example.com"));

    fixture.template.registry().close_all().await;
}

#[tokio::test]
async fn test_selecting_unknown_backend_is_rejected() {
    let fixture = Fixture::new(RouterOverrides::new()).await;

    let err = fixture.template.registry().context_for("c").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Routing);

    fixture.template.registry().close_all().await;
}

#[tokio::test]
async fn test_override_routes_method_to_fixed_backend() {
    let fixture = Fixture::new(RouterOverrides::new().with_route("StatementMapper", "execute", "b")).await;
    let mapper = fixture.mapper();
    let ctx = RoutingContext::new();

    mapper
        .execute(
            &ctx,
            &Statement::raw("INSERT INTO users (id, email) VALUES (?, ?)"),
            &[QueryParam::from(2_i64), QueryParam::from("second@example.com")],
        )
        .await
        .unwrap();

    // Queries still go to the primary.
    assert_eq!(count_users(&mapper, &ctx).await, 1);
    assert_eq!(count_users(&mapper, &RoutingContext::with_key("b")).await, 2);

    fixture.template.registry().close_all().await;
}

#[tokio::test]
async fn test_unique_violation_is_translated() {
    let fixture = Fixture::new(RouterOverrides::new()).await;
    let mapper = fixture.mapper();

    let err = mapper
        .execute(
            &RoutingContext::with_key("b"),
            &Statement::new("users.insert", "INSERT INTO users (id, email) VALUES (?, ?)"),
            &[QueryParam::from(7_i64), QueryParam::from("b@example.com")],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::DuplicateKey { .. }), "got {err:?}");
    assert_eq!(err.kind(), ErrorKind::Translated);

    // The failed call left the backend usable.
    assert_eq!(count_users(&mapper, &RoutingContext::with_key("b")).await, 1);

    fixture.template.registry().close_all().await;
}

#[tokio::test]
async fn test_statement_variant_follows_database_id() {
    let fixture = Fixture::new(RouterOverrides::new()).await;
    let mapper = fixture.mapper();

    let statement = Statement::new("backend.name", "SELECT 'generic' AS flavour")
        .with_variant("sqlite", "SELECT 'sqlite' AS flavour");
    let rows = mapper
        .query(&RoutingContext::new(), &statement, &[])
        .await
        .unwrap();
    assert_eq!(rows[0]["flavour"], json!("sqlite"));

    fixture.template.registry().close_all().await;
}

#[tokio::test]
async fn test_external_transaction_is_joined_and_rolled_back() {
    let fixture = Fixture::new(RouterOverrides::new()).await;
    let mapper = fixture.mapper();
    let ctx = RoutingContext::with_key("b");
    let key = RoutingKey::from("b");
    let pool = fixture.template.registry().get("b").unwrap().factory().pool();

    fixture
        .transactions
        .begin(&ctx, &key, pool, None)
        .await
        .unwrap();
    assert!(fixture.transactions.is_active(ctx.unit_of_work(), &key).await);

    for id in [10_i64, 11] {
        mapper
            .execute(
                &ctx,
                &Statement::raw("INSERT INTO users (id, email) VALUES (?, ?)"),
                &[QueryParam::from(id), QueryParam::from(format!("{id}@example.com"))],
            )
            .await
            .unwrap();
    }
    // Both writes are visible inside the transaction and were not committed per call.
    assert_eq!(count_users(&mapper, &ctx).await, 3);

    // Backend "a" is not part of the transaction.
    assert_eq!(count_users(&mapper, &RoutingContext::new()).await, 1);

    fixture.transactions.rollback(&ctx, &key).await.unwrap();
    assert!(!fixture.transactions.is_active(ctx.unit_of_work(), &key).await);

    let after = RoutingContext::with_key("b");
    assert_eq!(count_users(&mapper, &after).await, 1);

    fixture.template.registry().close_all().await;
}

#[tokio::test]
async fn test_external_transaction_commit_persists() {
    let fixture = Fixture::new(RouterOverrides::new()).await;
    let mapper = fixture.mapper();
    let ctx = RoutingContext::new();
    let key = RoutingKey::from("a");
    let pool = fixture.template.registry().get("a").unwrap().factory().pool();

    fixture
        .transactions
        .begin(&ctx, &key, pool, Some(30))
        .await
        .unwrap();
    let again = fixture.transactions.begin(&ctx, &key, pool, None).await;
    assert_eq!(again.unwrap_err().kind(), ErrorKind::Transaction);

    mapper
        .execute(
            &ctx,
            &Statement::raw("UPDATE users SET email = ? WHERE id = ?"),
            &[QueryParam::from("renamed@example.com"), QueryParam::from(1_i64)],
        )
        .await
        .unwrap();
    fixture.transactions.commit(&ctx, &key).await.unwrap();

    let rows = mapper
        .query(&RoutingContext::new(), &select_email(), &[QueryParam::from(1_i64)])
        .await
        .unwrap();
    assert_eq!(rows[0]["email"], json!("renamed@example.com"));

    fixture.template.registry().close_all().await;
}
