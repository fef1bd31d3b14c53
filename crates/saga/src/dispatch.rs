//! Dispatch sub-saga: ticks an order's progress counter down to zero.

use async_trait::async_trait;
use common::OrderId;
use durable::{Workflow, WorkflowContext};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::services::SagaServices;

const STEP_ADVANCE_PROGRESS: &str = "advance_progress";

/// Input of a dispatch sub-saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchInput {
    pub order_id: OrderId,
}

/// Started by a paid checkout and never awaited by it.
///
/// Each iteration sleeps durably, then runs one progress step, until the
/// order's progress reaches 0. The step that reaches 0 also marks the order
/// DISPATCHED. A failed sleep or step fails
/// the sub-saga; a half-dispatched order is left for an operator.
pub struct DispatchWorkflow {
    services: SagaServices,
}

impl DispatchWorkflow {
    pub fn new(services: SagaServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Workflow for DispatchWorkflow {
    const NAME: &'static str = "dispatch";
    type Input = DispatchInput;
    /// Progress remaining after the last tick.
    type Output = u32;
    type Error = SagaError;

    #[tracing::instrument(skip(self, ctx), fields(workflow_id = %ctx.workflow_id()))]
    async fn run(&self, ctx: &WorkflowContext, input: DispatchInput) -> Result<u32> {
        let DispatchInput { order_id } = input;
        let orders = &self.services.orders;
        // Ticks until the order's own counter reaches 0.
        let mut tick = 0u32;
        let remaining = loop {
            ctx.sleep(self.services.config.dispatch_interval).await?;
            let remaining: u32 = ctx
                .run_step(STEP_ADVANCE_PROGRESS, || async move {
                    orders.advance_progress(order_id).await
                })
                .await?;
            tick += 1;
            metrics::counter!("dispatch_ticks").increment(1);
            tracing::debug!(%order_id, tick, remaining, "dispatch progress");
            if remaining == 0 {
                break remaining;
            }
        };

        tracing::info!(%order_id, remaining, "order dispatched");
        Ok(remaining)
    }
}
