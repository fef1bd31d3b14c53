use common::WorkflowId;
use journal::{JournalError, StepSeq};
use thiserror::Error;

/// Errors raised by the durable runtime.
#[derive(Debug, Error)]
pub enum DurableError {
    /// Journal error.
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// A workflow input, output or step result could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Replay found a different operation at this sequence number than the
    /// workflow code asked for.
    #[error(
        "Non-deterministic replay of workflow {workflow_id} at step {seq}: expected '{expected}', recorded '{found}'"
    )]
    NonDeterministic {
        workflow_id: WorkflowId,
        seq: StepSeq,
        expected: String,
        found: String,
    },

    /// A step failed after exhausting its retry policy.
    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    /// The workflow was cancelled; no new waits are accepted.
    #[error("Workflow cancelled: {0}")]
    Cancelled(WorkflowId),

    /// The event key already holds a different value.
    #[error("Event '{key}' is already set for workflow {workflow_id}")]
    EventAlreadySet { workflow_id: WorkflowId, key: String },

    /// No workflow is registered under this name.
    #[error("Unknown workflow type: {0}")]
    UnknownWorkflow(String),

    /// An instance with this ID exists but runs a different workflow.
    #[error("Workflow {workflow_id} is a '{found}' instance, not '{expected}'")]
    WorkflowTypeMismatch {
        workflow_id: WorkflowId,
        expected: String,
        found: String,
    },

    /// The workflow instance does not exist.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// The workflow finished with an error.
    #[error("Workflow {workflow_id} failed: {reason}")]
    WorkflowFailed {
        workflow_id: WorkflowId,
        reason: String,
    },

    /// The requested fork point is not valid for this workflow.
    #[error("Cannot fork workflow {workflow_id} at step {step}: {reason}")]
    InvalidFork {
        workflow_id: WorkflowId,
        step: i32,
        reason: String,
    },

    /// The work queue dispatcher has shut down.
    #[error("Work queue is closed")]
    QueueClosed,
}

/// Result type for durable runtime operations.
pub type Result<T> = std::result::Result<T, DurableError>;
