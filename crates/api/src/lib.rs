//! HTTP API server with observability for the saga system.
//!
//! Provides REST endpoints for the widget shop checkout, report scans,
//! security issue approval and workflow introspection, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::Product;
use durable::RuntimeConfig;
use journal::{InMemoryJournal, PostgresJournal};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryServices, PostgresShop, SagaConfig, SagaCoordinator, SagaServices};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;
use routes::metrics::MetricsState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            app: state.clone(),
        });

    Router::new()
        .route("/health", get(routes::health::check))
        // Shop
        .route("/product", get(routes::shop::product))
        .route("/restock", post(routes::shop::restock))
        .route("/orders", get(routes::shop::list_orders))
        .route("/orders/{id}", get(routes::shop::get_order))
        .route("/checkout/{key}", post(routes::shop::checkout))
        .route(
            "/payment_webhook/{payment_id}/{status}",
            post(routes::shop::payment_webhook),
        )
        // Issue approval
        .route("/reports", get(routes::issues::list_reports))
        .route("/reports", post(routes::issues::create_report))
        .route("/reports/{id}/issue", post(routes::issues::start_issue))
        .route("/scans", post(routes::issues::start_scan))
        .route("/scans/{workflow_id}", get(routes::issues::scan_outcome))
        .route("/issues/pending", get(routes::issues::pending))
        .route("/issues/{id}", get(routes::issues::get_issue))
        .route(
            "/issues/workflow/{workflow_id}",
            get(routes::issues::outcome),
        )
        .route(
            "/issues/workflow/{workflow_id}/{decision}",
            post(routes::issues::decide),
        )
        // Workflows
        .route("/workflows", get(routes::workflows::list))
        .route("/workflows/{id}", get(routes::workflows::get))
        .route("/workflows/{id}/steps", get(routes::workflows::steps))
        .route("/workflows/{id}/fork/{step}", post(routes::workflows::fork))
        .route("/workflows/{id}/cancel", post(routes::workflows::cancel))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over in-memory stores, seeded with the widget
/// at the configured restock level.
///
/// Returns the in-memory service handles alongside for inspection.
pub fn create_in_memory_state(
    saga_config: SagaConfig,
    runtime_config: RuntimeConfig,
) -> (Arc<AppState>, InMemoryServices) {
    let shop = InMemoryServices::new();
    shop.inventory
        .add_product(widget(&saga_config));

    let coordinator = SagaCoordinator::new(
        Arc::new(InMemoryJournal::new()),
        shop.services(saga_config),
        runtime_config,
    );
    let state = Arc::new(AppState {
        coordinator,
        backend: "memory",
    });
    (state, shop)
}

/// Creates the default in-memory application state.
pub fn create_default_state() -> Arc<AppState> {
    create_in_memory_state(SagaConfig::default(), RuntimeConfig::default()).0
}

/// Creates application state backed by PostgreSQL.
///
/// Expects the migrations to have been applied. The widget is seeded only
/// if it does not exist yet, so inventory survives restarts.
pub async fn create_postgres_state(
    pool: PgPool,
    saga_config: SagaConfig,
    runtime_config: RuntimeConfig,
) -> Result<Arc<AppState>, saga::SagaError> {
    PostgresShop::new(pool.clone())
        .seed_product(&widget(&saga_config))
        .await?;

    let coordinator = SagaCoordinator::new(
        Arc::new(PostgresJournal::new(pool.clone())),
        SagaServices::postgres(pool, saga_config),
        runtime_config,
    );
    Ok(Arc::new(AppState {
        coordinator,
        backend: "postgres",
    }))
}

fn widget(config: &SagaConfig) -> Product {
    let mut product = Product::widget(config.restock_level);
    product.product_id = config.product_id;
    product
}
