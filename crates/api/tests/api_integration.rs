//! Integration tests for the API server.

use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use durable::{RetryPolicy, RuntimeConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryServices, SagaConfig};
use serde_json::Value;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn test_config(restock_level: u32) -> SagaConfig {
    let mut config = SagaConfig::default()
        .with_payment_timeout(Duration::from_secs(5))
        .with_checkout_timeout(Duration::from_secs(5))
        .with_approval_timeout(Duration::from_secs(5))
        .with_dispatch(NonZeroU32::new(3).unwrap(), Duration::from_millis(5))
        .with_compensation_retry(RetryPolicy::new(3, Duration::from_millis(5), 1.0));
    config.restock_level = restock_level;
    config
}

fn setup_with_inventory(inventory: u32) -> (axum::Router, InMemoryServices) {
    let (state, shop) = api::create_in_memory_state(
        test_config(inventory),
        RuntimeConfig::default().with_poll_interval(Duration::from_millis(20)),
    );
    (api::create_app(state, get_metrics_handle()), shop)
}

fn setup() -> axum::Router {
    setup_with_inventory(10).0
}

async fn send(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    into_json(app.clone().oneshot(request).await.unwrap()).await
}

async fn send_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    into_json(app.clone().oneshot(request).await.unwrap()).await
}

async fn into_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Polls `uri` until `done` accepts the body or the deadline passes.
async fn poll_until(app: &axum::Router, uri: &str, done: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..250 {
        let (status, body) = send(app, "GET", uri).await;
        if status == StatusCode::OK && done(&body) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out polling {uri}");
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let (status, body) = send(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "memory");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_get_product() {
    let app = setup();

    let (status, body) = send(&app, "GET", "/product").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["product_id"], 1);
    assert_eq!(body["product"], "Premium Quality Widget");
    assert_eq!(body["inventory"], 10);
    assert_eq!(body["price"], "$99.99");
    assert_eq!(body["price_cents"], 9999);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_checkout_paid_flow() {
    let app = setup();

    let (status, body) = send(&app, "POST", "/checkout/order-abc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payment_id"], "order-abc");

    let (_, product) = send(&app, "GET", "/product").await;
    assert_eq!(product["inventory"], 9);

    let (status, body) = send(&app, "POST", "/payment_webhook/order-abc/paid").await;
    assert_eq!(status, StatusCode::OK);
    let order_id = body["order_id"].as_i64().unwrap();

    let order = poll_until(&app, &format!("/orders/{order_id}"), |o| {
        o["status"] == "DISPATCHED"
    })
    .await;
    assert_eq!(order["progress_remaining"], 0);

    let (status, orders) = send(&app, "GET", "/orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders.as_array().unwrap().len(), 1);

    let (_, product) = send(&app, "GET", "/product").await;
    assert_eq!(product["inventory"], 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_checkout_failed_payment_releases_inventory() {
    let app = setup();

    let (status, _) = send(&app, "POST", "/checkout/order-fail").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", "/payment_webhook/order-fail/failed").await;
    assert_eq!(status, StatusCode::OK);
    let order_id = body["order_id"].as_i64().unwrap();

    let (status, order) = send(&app, "GET", &format!("/orders/{order_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "CANCELLED");

    let (_, product) = send(&app, "GET", "/product").await;
    assert_eq!(product["inventory"], 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_checkout_out_of_stock() {
    let (app, _) = setup_with_inventory(0);

    let (status, body) = send(&app, "POST", "/checkout/no-stock").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("no-stock"));

    let (status, _) = send(&app, "POST", "/restock").await;
    assert_eq!(status, StatusCode::OK);
    let (_, product) = send(&app, "GET", "/product").await;
    assert_eq!(product["inventory"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restock_resets_inventory() {
    let (app, shop) = setup_with_inventory(5);

    let (status, _) = send(&app, "POST", "/checkout/order-r").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shop.inventory.inventory(common::ProductId::new(1)), 4);

    let (status, body) = send(&app, "POST", "/restock").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inventory"], 5);
}

#[tokio::test]
async fn test_webhook_for_unknown_payment() {
    let app = setup();

    let (status, body) = send(&app, "POST", "/payment_webhook/missing/paid").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_get_order_not_found_and_bad_id() {
    let app = setup();

    let (status, _) = send(&app, "GET", "/orders/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "GET", "/orders/not-a-number").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("Invalid order id")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_issue_approval_flow() {
    let app = setup();

    let (status, report) = send_json(
        &app,
        "/reports",
        serde_json::json!({
            "repo_name": "acme/api",
            "has_vuln": true,
            "raw_report": "CVE-2024-0001 in openssl"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let report_id = report["id"].as_i64().unwrap();

    let (_, reports) = send(&app, "GET", "/reports").await;
    assert_eq!(reports.as_array().unwrap().len(), 1);

    let (status, body) = send(&app, "POST", &format!("/reports/{report_id}/issue")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let workflow_id = body["workflow_id"].as_str().unwrap().to_string();

    let pending = poll_until(&app, "/issues/pending", |v| {
        v.as_array().is_some_and(|a| !a.is_empty())
    })
    .await;
    let issue = &pending[0];
    assert_eq!(issue["workflow_id"], workflow_id.as_str());
    assert_eq!(issue["status"], "pending_approval");
    assert!(issue["body"].as_str().unwrap().contains("acme/api"));
    let issue_id = issue["id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/issues/workflow/{workflow_id}/approved"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let outcome = poll_until(&app, &format!("/issues/workflow/{workflow_id}"), |v| {
        v["status"] == "SUCCESS"
    })
    .await;
    assert_eq!(
        outcome["summary"],
        format!("Issue {issue_id} status: approved")
    );

    let (status, issue) = send(&app, "GET", &format!("/issues/{issue_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(issue["status"], "approved");

    let (_, pending) = send(&app, "GET", "/issues/pending").await;
    assert!(pending.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_issue_endpoints_reject_bad_input() {
    let app = setup();

    let (status, _) = send_json(
        &app,
        "/reports",
        serde_json::json!({ "repo_name": "  ", "has_vuln": false }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/reports/42/issue").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/issues/workflow/wf-1/maybe").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/issues/workflow/wf-1/pending_approval").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/issues/workflow/wf-1/approved").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/issues/7").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_decision_to_checkout_is_type_mismatch() {
    let app = setup();

    let (status, _) = send(&app, "POST", "/checkout/order-x").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "POST", "/issues/workflow/order-x/approved").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_workflow_introspection() {
    let app = setup();

    let (status, _) = send(&app, "POST", "/checkout/order-w").await;
    assert_eq!(status, StatusCode::OK);

    let (status, list) = send(&app, "GET", "/workflows?name=checkout").await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["workflow_id"], "order-w");
    assert_eq!(list[0]["status"], "PENDING");

    let (status, _) = send(&app, "GET", "/workflows?status=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, record) = send(&app, "GET", "/workflows/order-w").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["name"], "checkout");

    let (status, steps) = send(&app, "GET", "/workflows/order-w/steps").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = steps
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names[0], "create_order");
    assert_eq!(names[1], "reserve_inventory");

    let (status, _) = send(&app, "GET", "/workflows/missing/steps").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_and_fork() {
    let app = setup();

    let (status, _) = send(&app, "POST", "/checkout/order-c").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", "/workflows/order-c/cancel").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);

    let record = poll_until(&app, "/workflows/order-c", |v| {
        v["status"] == "CANCELLED" && v["completed_at"].is_string()
    })
    .await;
    assert_eq!(record["workflow_id"], "order-c");

    let (status, _) = send(&app, "POST", "/workflows/order-c/fork/-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/workflows/missing/fork/0").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/workflows/missing/cancel").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scan_flow() {
    let (app, shop) = setup_with_inventory(10);
    shop.sources.add_report("acme-api", "Critical CVE-2024-3094");
    shop.sources.add_report("acme-web", "Total: 0");

    let (status, body) = send(&app, "POST", "/scans").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let workflow_id = body["workflow_id"].as_str().unwrap().to_string();

    let outcome = poll_until(&app, &format!("/scans/{workflow_id}"), |v| {
        v["status"] == "SUCCESS"
    })
    .await;
    assert_eq!(outcome["vulnerable"], 1);
    assert_eq!(outcome["summary"]["scanned"].as_array().unwrap().len(), 2);
    assert!(outcome["error"].is_null());

    let (status, reports) = send(&app, "GET", "/reports").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reports.as_array().unwrap().len(), 2);

    let (status, _) = send(&app, "GET", "/scans/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
