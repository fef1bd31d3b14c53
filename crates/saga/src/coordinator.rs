//! Saga coordinator: the operations callers use to drive and inspect sagas.

use std::sync::Arc;
use std::time::Duration;

use common::{IssueId, OrderId, ReportId, WorkflowId};
use domain::{Issue, IssueError, IssueStatus, Order, Product, Report};
use durable::{
    DurableRuntime, RuntimeConfig, StepRecord, Workflow, WorkflowQuery, WorkflowRecord,
    WorkflowStatus,
};
use journal::Journal;

use crate::dispatch::DispatchWorkflow;
use crate::error::{Result, SagaError};
use crate::issue_approval::{APPROVAL_TOPIC, IssueApprovalInput, IssueApprovalWorkflow};
use crate::order_fulfillment::{
    CheckoutInput, CheckoutWorkflow, ORDER_ID_EVENT, PAYMENT_ID_EVENT, PAYMENT_STATUS_TOPIC,
};
use crate::scan::ScanWorkflow;
use crate::services::SagaServices;

/// Starts sagas, relays external signals to them and waits for their events.
///
/// Owns the durable runtime with every saga of this crate registered.
#[derive(Clone)]
pub struct SagaCoordinator {
    runtime: DurableRuntime,
    services: SagaServices,
}

impl SagaCoordinator {
    /// Creates a coordinator over a journal. Must be called inside a Tokio
    /// runtime: the work queue dispatcher is spawned here.
    pub fn new(journal: Arc<dyn Journal>, services: SagaServices, config: RuntimeConfig) -> Self {
        let runtime = DurableRuntime::builder(journal)
            .config(config)
            .register(CheckoutWorkflow::new(services.clone()))
            .register(DispatchWorkflow::new(services.clone()))
            .register(IssueApprovalWorkflow::new(services.clone()))
            .register(ScanWorkflow::new(services.clone()))
            .build();
        Self { runtime, services }
    }

    pub fn runtime(&self) -> &DurableRuntime {
        &self.runtime
    }

    pub fn services(&self) -> &SagaServices {
        &self.services
    }

    /// Resumes sagas left unfinished by a previous process.
    pub async fn recover(&self) -> Result<usize> {
        Ok(self.runtime.recover().await?)
    }

    /// Starts (or rejoins) the checkout saga for an idempotency key and waits
    /// for its payment correlation ID.
    ///
    /// Repeating a key never starts a second saga. Fails with `OutOfStock`
    /// when no unit could be reserved, and with `EventTimeout` when the saga
    /// does not publish within the caller's wait window.
    #[tracing::instrument(skip(self))]
    pub async fn checkout(&self, idempotency_key: &str) -> Result<WorkflowId> {
        if idempotency_key.trim().is_empty() {
            return Err(SagaError::InvalidInput(
                "idempotency key must not be empty".to_string(),
            ));
        }
        metrics::counter!("checkout_requests_total").increment(1);

        let id = WorkflowId::new(idempotency_key);
        let input = CheckoutInput {
            product_id: self.services.config.product_id,
        };
        self.runtime
            .start_workflow::<CheckoutWorkflow>(id.clone(), input)
            .await?;

        let payment_id: String = self
            .wait_event(&id, PAYMENT_ID_EVENT, self.services.config.checkout_timeout)
            .await?;
        if payment_id.is_empty() {
            tracing::warn!(workflow_id = %id, "checkout rejected: out of stock");
            return Err(SagaError::OutOfStock(id));
        }
        Ok(WorkflowId::new(payment_id))
    }

    /// Relays a payment status to the checkout saga and waits for its order ID.
    #[tracing::instrument(skip(self))]
    pub async fn payment_webhook(&self, payment_id: &str, status: &str) -> Result<OrderId> {
        let id = WorkflowId::new(payment_id);
        let record = self.expect_workflow::<CheckoutWorkflow>(&id).await?;

        if record.status.is_terminal() {
            tracing::debug!(workflow_id = %id, status, "checkout already finished, payment status dropped");
        } else {
            self.runtime.send(&id, PAYMENT_STATUS_TOPIC, &status).await?;
            tracing::info!(workflow_id = %id, status, "payment status delivered");
        }

        // A finished checkout has published everything it ever will.
        let timeout = if record.status.is_terminal() {
            Duration::ZERO
        } else {
            self.services.config.checkout_timeout
        };
        let order_id: String = self.wait_event(&id, ORDER_ID_EVENT, timeout).await?;
        order_id
            .parse()
            .map_err(|_| SagaError::InvalidInput(format!("malformed order id {order_id:?}")))
    }

    /// Starts an approval saga for a report and returns its workflow ID.
    #[tracing::instrument(skip(self))]
    pub async fn start_issue_approval(&self, report_id: ReportId) -> Result<WorkflowId> {
        if self.services.reports.get_report(report_id).await?.is_none() {
            return Err(SagaError::ReportNotFound(report_id));
        }

        let handle = self
            .runtime
            .start_workflow::<IssueApprovalWorkflow>(
                WorkflowId::generate(),
                IssueApprovalInput { report_id },
            )
            .await?;
        Ok(handle.workflow_id().clone())
    }

    /// Sends an `approved` or `rejected` decision to an approval saga.
    #[tracing::instrument(skip(self))]
    pub async fn decide_issue(&self, workflow_id: &WorkflowId, decision: &str) -> Result<()> {
        let status: IssueStatus = decision.parse()?;
        if !status.is_resolved() {
            return Err(IssueError::InvalidDecision(status).into());
        }
        let record = self
            .expect_workflow::<IssueApprovalWorkflow>(workflow_id)
            .await?;
        if record.status.is_terminal() {
            tracing::debug!(%workflow_id, decision = status.as_str(), "approval already finished, decision dropped");
            return Ok(());
        }

        self.runtime
            .send(workflow_id, APPROVAL_TOPIC, &status.as_str())
            .await?;
        tracing::info!(%workflow_id, decision = status.as_str(), "issue decision delivered");
        Ok(())
    }

    /// Returns the record of an approval saga, including its summary or error.
    pub async fn issue_outcome(&self, workflow_id: &WorkflowId) -> Result<WorkflowRecord> {
        self.expect_workflow::<IssueApprovalWorkflow>(workflow_id)
            .await
    }

    /// Starts a scan over every available report, or returns the scan that
    /// is still running.
    #[tracing::instrument(skip(self))]
    pub async fn start_scan(&self) -> Result<WorkflowId> {
        let running = self
            .runtime
            .list_workflows(
                WorkflowQuery::new()
                    .name(ScanWorkflow::NAME)
                    .statuses(vec![WorkflowStatus::Pending, WorkflowStatus::Enqueued])
                    .limit(1),
            )
            .await?;
        if let Some(existing) = running.into_iter().next() {
            tracing::info!(workflow_id = %existing.id, "scan already running");
            return Ok(existing.id);
        }

        let handle = self
            .runtime
            .start_workflow::<ScanWorkflow>(WorkflowId::generate(), ())
            .await?;
        Ok(handle.workflow_id().clone())
    }

    /// Returns the record of a scan saga, including its summary or error.
    pub async fn scan_outcome(&self, workflow_id: &WorkflowId) -> Result<WorkflowRecord> {
        self.expect_workflow::<ScanWorkflow>(workflow_id).await
    }

    pub async fn get_product(&self) -> Result<Product> {
        self.services
            .inventory
            .get_product(self.services.config.product_id)
            .await
    }

    /// Resets the product inventory to the configured restock level.
    #[tracing::instrument(skip(self))]
    pub async fn restock(&self) -> Result<Product> {
        let product = self
            .services
            .inventory
            .restock(
                self.services.config.product_id,
                self.services.config.restock_level,
            )
            .await?;
        tracing::info!(inventory = product.inventory, "product restocked");
        Ok(product)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.services
            .orders
            .get_order(order_id)
            .await?
            .ok_or(SagaError::OrderNotFound(order_id))
    }

    pub async fn list_orders(&self) -> Result<Vec<Order>> {
        self.services.orders.list_orders().await
    }

    pub async fn list_reports(&self) -> Result<Vec<Report>> {
        self.services.reports.list_reports().await
    }

    /// Stores a scan report, replacing the previous one for the repository.
    pub async fn create_report(
        &self,
        repo_name: &str,
        has_vuln: bool,
        raw_report: &str,
    ) -> Result<Report> {
        if repo_name.trim().is_empty() {
            return Err(SagaError::InvalidInput(
                "repo_name must not be empty".to_string(),
            ));
        }
        self.services
            .reports
            .upsert_report(repo_name, has_vuln, raw_report)
            .await
    }

    pub async fn get_issue(&self, issue_id: IssueId) -> Result<Issue> {
        self.services
            .issues
            .get_issue(issue_id)
            .await?
            .ok_or(SagaError::IssueNotFound(issue_id))
    }

    pub async fn list_pending_issues(&self) -> Result<Vec<Issue>> {
        self.services.issues.list_pending_issues().await
    }

    pub async fn list_workflows(&self, query: WorkflowQuery) -> Result<Vec<WorkflowRecord>> {
        Ok(self.runtime.list_workflows(query).await?)
    }

    /// Returns a workflow record, failing with `WorkflowNotFound` if absent.
    pub async fn get_workflow(&self, workflow_id: &WorkflowId) -> Result<WorkflowRecord> {
        Ok(self
            .runtime
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| durable::DurableError::WorkflowNotFound(workflow_id.clone()))?)
    }

    pub async fn list_steps(&self, workflow_id: &WorkflowId) -> Result<Vec<StepRecord>> {
        Ok(self.runtime.list_steps(workflow_id).await?)
    }

    /// Re-runs a saga from `start_step` under a new workflow ID.
    pub async fn fork_workflow(
        &self,
        workflow_id: &WorkflowId,
        start_step: i32,
    ) -> Result<WorkflowId> {
        Ok(self.runtime.fork(workflow_id, start_step).await?)
    }

    pub async fn cancel_workflow(&self, workflow_id: &WorkflowId) -> Result<bool> {
        Ok(self.runtime.cancel(workflow_id).await?)
    }

    async fn wait_event(&self, id: &WorkflowId, key: &str, timeout: Duration) -> Result<String> {
        self.runtime
            .get_event(id, key, timeout)
            .await?
            .ok_or_else(|| SagaError::EventTimeout {
                workflow_id: id.clone(),
                key: key.to_string(),
                timeout,
            })
    }

    /// Loads a workflow record and checks it runs `W`.
    async fn expect_workflow<W: Workflow>(&self, id: &WorkflowId) -> Result<WorkflowRecord> {
        let record = self.get_workflow(id).await?;
        if record.name != W::NAME {
            return Err(durable::DurableError::WorkflowTypeMismatch {
                workflow_id: id.clone(),
                expected: W::NAME.to_string(),
                found: record.name,
            }
            .into());
        }
        Ok(record)
    }
}
