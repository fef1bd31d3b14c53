//! Widget shop endpoints: product, orders, checkout and payment webhook.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::OrderId;
use domain::{Order, Product};
use serde::Serialize;

use super::AppState;
use crate::error::ApiError;

// -- Response types --

#[derive(Serialize)]
pub struct ProductResponse {
    pub product_id: i64,
    pub product: String,
    pub description: String,
    pub inventory: u32,
    pub price: String,
    pub price_cents: i64,
}

impl From<Product> for ProductResponse {
    fn from(p: Product) -> Self {
        Self {
            product_id: p.product_id.as_i64(),
            product: p.product,
            description: p.description,
            inventory: p.inventory,
            price: p.price.to_string(),
            price_cents: p.price.cents(),
        }
    }
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: i64,
    pub status: String,
    pub status_code: i16,
    pub progress_remaining: u32,
    pub last_update_time: String,
}

impl From<Order> for OrderResponse {
    fn from(o: Order) -> Self {
        Self {
            order_id: o.id.as_i64(),
            status: o.status.to_string(),
            status_code: o.status.code(),
            progress_remaining: o.progress_remaining,
            last_update_time: o.last_update_time.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub payment_id: String,
}

#[derive(Serialize)]
pub struct PaymentWebhookResponse {
    pub order_id: i64,
}

// -- Handlers --

/// GET /product
pub async fn product(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product = state.coordinator.get_product().await?;
    Ok(Json(product.into()))
}

/// POST /restock: resets inventory to the configured level.
#[tracing::instrument(skip(state))]
pub async fn restock(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ProductResponse>, ApiError> {
    let product = state.coordinator.restock().await?;
    Ok(Json(product.into()))
}

/// GET /orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.coordinator.list_orders().await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id}
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id: OrderId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))?;
    let order = state.coordinator.get_order(order_id).await?;
    Ok(Json(order.into()))
}

/// POST /checkout/{idempotency_key}: starts (or rejoins) a checkout saga and
/// returns its payment ID.
#[tracing::instrument(skip(state))]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let payment_id = state.coordinator.checkout(&key).await?;
    Ok(Json(CheckoutResponse {
        payment_id: payment_id.to_string(),
    }))
}

/// POST /payment_webhook/{payment_id}/{status}
#[tracing::instrument(skip(state))]
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Path((payment_id, status)): Path<(String, String)>,
) -> Result<Json<PaymentWebhookResponse>, ApiError> {
    let order_id = state
        .coordinator
        .payment_webhook(&payment_id, &status)
        .await?;
    Ok(Json(PaymentWebhookResponse {
        order_id: order_id.as_i64(),
    }))
}
