//! Saga error types.

use std::time::Duration;

use common::{IssueId, OrderId, ProductId, ReportId, WorkflowId};
use domain::{DomainError, IssueError, OrderError};
use durable::DurableError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Durable runtime error.
    #[error("Workflow error: {0}")]
    Durable(#[from] DurableError),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Database error from a Postgres-backed service.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Inventory service error.
    #[error("Inventory service error: {0}")]
    InventoryService(String),

    /// Order store error.
    #[error("Order service error: {0}")]
    OrderService(String),

    /// Issue content could not be generated.
    #[error("Content generation error: {0}")]
    ContentGeneration(String),

    /// A scan report could not be listed or read.
    #[error("Report source error: {0}")]
    ReportSource(String),

    /// A scan report could not be judged.
    #[error("Vulnerability detection error: {0}")]
    VulnerabilityDetection(String),

    /// Product not found.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Report not found.
    #[error("Report not found: {0}")]
    ReportNotFound(ReportId),

    /// Issue not found.
    #[error("Issue not found: {0}")]
    IssueNotFound(IssueId),

    /// Checkout could not reserve a unit; the order was cancelled.
    #[error("Checkout {0} failed: product is out of stock")]
    OutOfStock(WorkflowId),

    /// A caller-side wait for a saga event ran out.
    #[error("Timed out after {timeout:?} waiting for '{key}' from workflow {workflow_id}")]
    EventTimeout {
        workflow_id: WorkflowId,
        key: String,
        timeout: Duration,
    },

    /// No approval decision arrived before the approval timeout.
    #[error("timeout waiting for approval of workflow {0}")]
    ApprovalTimedOut(WorkflowId),

    /// The request itself is malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<OrderError> for SagaError {
    fn from(err: OrderError) -> Self {
        SagaError::Domain(err.into())
    }
}

impl From<IssueError> for SagaError {
    fn from(err: IssueError) -> Self {
        SagaError::Domain(err.into())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
