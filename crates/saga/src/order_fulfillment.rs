//! Order fulfillment saga definition.
//!
//! ```text
//! create order ──► reserve inventory ──┬─ out of stock ──► mark CANCELLED ──► payment_id = ""
//!                                      │
//!                                      └─ reserved ──► payment_id = <saga id>
//!                                                         │
//!                                              wait "payment-status" (timeout)
//!                                                         │
//!                               ┌──── "paid" ─────────────┴──── anything else / timeout ────┐
//!                               ▼                                                            ▼
//!                         mark PAID                                               release inventory
//!                         spawn dispatch                                          mark CANCELLED
//!                               └──────────────────► order_id = <order id> ◄───────────────┘
//! ```
//!
//! Running out of stock and a payment that never arrives are business
//! outcomes: the saga still succeeds. Only step faults fail it.

use async_trait::async_trait;
use common::{OrderId, ProductId};
use domain::{Order, OrderStatus};
use durable::{DurableError, Workflow, WorkflowContext};
use serde::{Deserialize, Serialize};

use crate::dispatch::{DispatchInput, DispatchWorkflow};
use crate::error::{Result, SagaError};
use crate::services::SagaServices;

/// Event carrying the payment correlation ID (empty when out of stock).
pub const PAYMENT_ID_EVENT: &str = "payment_id";
/// Event carrying the order ID once payment is settled either way.
pub const ORDER_ID_EVENT: &str = "order_id";
/// Signal topic the payment webhook writes to.
pub const PAYMENT_STATUS_TOPIC: &str = "payment-status";
/// The only payment status that confirms an order.
pub const PAYMENT_PAID: &str = "paid";

const STEP_CREATE_ORDER: &str = "create_order";
const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";
const STEP_RELEASE_INVENTORY: &str = "release_inventory";
const STEP_MARK_CANCELLED: &str = "mark_order_cancelled";
const STEP_MARK_PAID: &str = "mark_order_paid";

/// Input of a checkout saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutInput {
    pub product_id: ProductId,
}

/// How a checkout ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutOutcome {
    /// No unit could be reserved.
    OutOfStock,
    /// Payment failed or never arrived; the reservation was released.
    Cancelled,
    /// Payment confirmed; dispatch was started.
    Paid,
}

impl CheckoutOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutOutcome::OutOfStock => "out_of_stock",
            CheckoutOutcome::Cancelled => "cancelled",
            CheckoutOutcome::Paid => "paid",
        }
    }
}

/// Output of a checkout saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResult {
    pub order_id: OrderId,
    pub outcome: CheckoutOutcome,
}

/// The order fulfillment saga. Its workflow ID doubles as the payment
/// correlation ID and as the inventory reservation key.
pub struct CheckoutWorkflow {
    services: SagaServices,
}

impl CheckoutWorkflow {
    pub fn new(services: SagaServices) -> Self {
        Self { services }
    }

    async fn mark_order(
        &self,
        ctx: &WorkflowContext,
        step: &str,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order> {
        let orders = &self.services.orders;
        let order = ctx
            .run_step(step, || async move { orders.update_status(order_id, status).await })
            .await?;
        tracing::info!(workflow_id = %ctx.workflow_id(), %order_id, status = %status, "order status updated");
        Ok(order)
    }

    async fn cancel(
        &self,
        ctx: &WorkflowContext,
        product_id: ProductId,
        order_id: OrderId,
    ) -> Result<()> {
        let inventory = &self.services.inventory;
        let key = ctx.workflow_id().as_str();
        let released: bool = ctx
            .run_step_with(
                STEP_RELEASE_INVENTORY,
                &self.services.config.compensation_retry,
                || async move { inventory.release(product_id, key).await },
            )
            .await?;
        tracing::info!(workflow_id = %ctx.workflow_id(), %order_id, released, "inventory released");

        self.mark_order(ctx, STEP_MARK_CANCELLED, order_id, OrderStatus::Cancelled)
            .await?;
        Ok(())
    }

    async fn confirm(&self, ctx: &WorkflowContext, order_id: OrderId) -> Result<()> {
        self.mark_order(ctx, STEP_MARK_PAID, order_id, OrderStatus::Paid)
            .await?;
        let dispatch_id = ctx
            .start_child::<DispatchWorkflow>(
                ctx.workflow_id().child("dispatch"),
                DispatchInput { order_id },
            )
            .await?;
        tracing::info!(workflow_id = %ctx.workflow_id(), %order_id, %dispatch_id, "dispatch started");
        Ok(())
    }
}

#[async_trait]
impl Workflow for CheckoutWorkflow {
    const NAME: &'static str = "checkout";
    type Input = CheckoutInput;
    type Output = CheckoutResult;
    type Error = SagaError;

    #[tracing::instrument(skip(self, ctx), fields(workflow_id = %ctx.workflow_id()))]
    async fn run(&self, ctx: &WorkflowContext, input: CheckoutInput) -> Result<CheckoutResult> {
        let CheckoutInput { product_id } = input;
        let key = ctx.workflow_id().as_str();

        let orders = &self.services.orders;
        let total_progress = self.services.config.dispatch_ticks.get();
        let order: Order = ctx
            .run_step(STEP_CREATE_ORDER, || async move {
                orders.create_order(total_progress).await
            })
            .await?;
        let order_id = order.id;
        tracing::info!(%order_id, "order created");

        let inventory = &self.services.inventory;
        let reserved = match ctx
            .run_step(STEP_RESERVE_INVENTORY, || async move {
                inventory.reserve(product_id, key).await
            })
            .await
        {
            Ok(reserved) => reserved,
            Err(DurableError::StepFailed { reason, .. }) => {
                tracing::warn!(%order_id, error = %reason, "reservation failed, treating as out of stock");
                false
            }
            Err(e) => return Err(e.into()),
        };

        if !reserved {
            self.mark_order(ctx, STEP_MARK_CANCELLED, order_id, OrderStatus::Cancelled)
                .await?;
            ctx.set_event(PAYMENT_ID_EVENT, &"").await?;
            metrics::counter!("checkout_outcomes", "outcome" => CheckoutOutcome::OutOfStock.as_str())
                .increment(1);
            tracing::warn!(%order_id, "checkout cancelled: out of stock");
            return Ok(CheckoutResult {
                order_id,
                outcome: CheckoutOutcome::OutOfStock,
            });
        }

        ctx.set_event(PAYMENT_ID_EVENT, &key).await?;

        let payment_status: Option<String> = match ctx
            .recv(PAYMENT_STATUS_TOPIC, self.services.config.payment_timeout)
            .await
        {
            Ok(status) => status,
            // Compensation still runs for a cancelled checkout.
            Err(DurableError::Cancelled(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let outcome = if payment_status.as_deref() == Some(PAYMENT_PAID) {
            self.confirm(ctx, order_id).await?;
            CheckoutOutcome::Paid
        } else {
            tracing::warn!(%order_id, status = ?payment_status, "payment not confirmed, cancelling order");
            self.cancel(ctx, product_id, order_id).await?;
            CheckoutOutcome::Cancelled
        };

        ctx.set_event(ORDER_ID_EVENT, &order_id.to_string()).await?;
        metrics::counter!("checkout_outcomes", "outcome" => outcome.as_str()).increment(1);
        tracing::info!(%order_id, outcome = outcome.as_str(), "checkout finished");

        Ok(CheckoutResult { order_id, outcome })
    }
}
