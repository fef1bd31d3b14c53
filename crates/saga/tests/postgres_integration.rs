//! PostgreSQL integration tests for the saga services.
//!
//! These tests share one PostgreSQL container and need a running Docker
//! daemon, so they are ignored by default. Run with:
//!
//! ```bash
//! cargo test -p saga --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use common::{ProductId, WorkflowId};
use domain::{IssueStatus, OrderStatus, Product};
use durable::RuntimeConfig;
use journal::PostgresJournal;
use saga::{
    CheckoutOutcome, CheckoutResult, InventoryLedger, IssueStore, OrderStore, PostgresIssueTracker,
    PostgresShop, ReportStore, SagaConfig, SagaCoordinator, SagaError, SagaServices,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_journal_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/002_create_shop_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh pool with cleared tables and a seeded widget
async fn get_test_pool(inventory: u32) -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE workflows, workflow_steps, workflow_events, workflow_signals, \
         inventory_reservations, orders, products, issues, reports RESTART IDENTITY",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresShop::new(pool.clone())
        .seed_product(&Product::widget(inventory))
        .await
        .unwrap();
    pool
}

fn widget() -> ProductId {
    ProductId::new(1)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_reserve_is_conditional_and_keyed() {
    let shop = PostgresShop::new(get_test_pool(1).await);

    assert!(shop.reserve(widget(), "a").await.unwrap());
    assert!(shop.reserve(widget(), "a").await.unwrap());
    assert!(!shop.reserve(widget(), "b").await.unwrap());
    assert_eq!(shop.get_product(widget()).await.unwrap().inventory, 0);

    assert!(shop.release(widget(), "a").await.unwrap());
    assert!(!shop.release(widget(), "a").await.unwrap());
    assert_eq!(shop.get_product(widget()).await.unwrap().inventory, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Docker"]
async fn test_concurrent_reservations_never_oversell() {
    let shop = PostgresShop::new(get_test_pool(3).await);

    let tasks: Vec<_> = (0..12)
        .map(|i| {
            let shop = shop.clone();
            tokio::spawn(async move { shop.reserve(widget(), &format!("k-{i}")).await.unwrap() })
        })
        .collect();

    let mut reserved = 0;
    for task in tasks {
        if task.await.unwrap() {
            reserved += 1;
        }
    }
    assert_eq!(reserved, 3);
    assert_eq!(shop.get_product(widget()).await.unwrap().inventory, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_progress_reaches_dispatched_in_one_update() {
    let shop = PostgresShop::new(get_test_pool(1).await);
    let order = shop.create_order(2).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    let err = shop.advance_progress(order.id).await.unwrap_err();
    assert!(matches!(err, SagaError::Domain(_)));

    shop.update_status(order.id, OrderStatus::Paid).await.unwrap();
    assert_eq!(shop.advance_progress(order.id).await.unwrap(), 1);
    assert_eq!(shop.advance_progress(order.id).await.unwrap(), 0);

    let order = shop.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Dispatched);
    assert_eq!(order.progress_remaining, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_issue_per_workflow_and_decision() {
    let tracker = PostgresIssueTracker::new(get_test_pool(0).await);
    let report = tracker
        .upsert_report("acme/api", true, "CVE-1")
        .await
        .unwrap();
    let again = tracker
        .upsert_report("acme/api", false, "clean")
        .await
        .unwrap();
    assert_eq!(report.id, again.id);
    assert!(!again.has_vuln);

    let wf = WorkflowId::new("issue-1");
    let issue = tracker.create_issue("acme/api", "body", &wf).await.unwrap();
    let same = tracker.create_issue("acme/api", "other", &wf).await.unwrap();
    assert_eq!(issue.id, same.id);
    assert_eq!(tracker.list_pending_issues().await.unwrap().len(), 1);

    let resolved = tracker
        .update_issue_status(issue.id, IssueStatus::Approved)
        .await
        .unwrap();
    assert_eq!(resolved.status, IssueStatus::Approved);
    assert!(tracker.list_pending_issues().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires Docker"]
async fn test_paid_checkout_end_to_end() {
    let pool = get_test_pool(2).await;
    let config = SagaConfig::default()
        .with_payment_timeout(Duration::from_secs(10))
        .with_checkout_timeout(Duration::from_secs(10))
        .with_dispatch(NonZeroU32::new(3).unwrap(), Duration::from_millis(10));
    let coordinator = SagaCoordinator::new(
        Arc::new(PostgresJournal::new(pool.clone())),
        SagaServices::postgres(pool, config),
        RuntimeConfig::default().with_poll_interval(Duration::from_millis(50)),
    );

    let payment_id = coordinator.checkout("pg-order").await.unwrap();
    let order_id = coordinator
        .payment_webhook(payment_id.as_str(), "paid")
        .await
        .unwrap();

    let result: CheckoutResult = coordinator
        .runtime()
        .handle(payment_id.clone())
        .result()
        .await
        .unwrap();
    assert_eq!(result.outcome, CheckoutOutcome::Paid);

    let remaining: u32 = coordinator
        .runtime()
        .handle(payment_id.child("dispatch"))
        .result()
        .await
        .unwrap();
    assert_eq!(remaining, 0);

    let order = coordinator.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Dispatched);
    assert_eq!(coordinator.get_product().await.unwrap().inventory, 1);
}
