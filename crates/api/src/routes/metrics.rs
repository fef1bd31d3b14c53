//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

use super::AppState;

/// State of the metrics router.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub app: Arc<AppState>,
}

/// GET /metrics: returns Prometheus-formatted metrics.
///
/// The inventory gauge is sampled on each scrape.
pub async fn get(State(state): State<MetricsState>) -> impl IntoResponse {
    if let Ok(product) = state.app.coordinator.get_product().await {
        metrics::gauge!("product_inventory").set(f64::from(product.inventory));
    }

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.handle.render(),
    )
}
