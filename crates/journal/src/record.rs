use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::WorkflowId;

/// Sequence number of a durable operation within one workflow instance.
///
/// Sequence numbers start at 1 for the first operation and increment by 1
/// for each subsequent one, in program order. They are the address used to
/// replay a memoized result and to fork an instance from a chosen step.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StepSeq(i32);

impl StepSeq {
    /// Creates a sequence number from a raw value.
    pub fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the position before any step (0).
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first step's sequence number (1).
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next sequence number.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw value.
    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for StepSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for StepSeq {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a workflow instance.
///
/// ```text
/// Enqueued ──► Pending ──┬──► Success
///                        ├──► Error
///                        └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Waiting in the work queue for a free worker.
    Enqueued,

    /// Executing (or suspended in a wait).
    #[default]
    Pending,

    /// Completed and returned an output (terminal).
    Success,

    /// Completed with an error (terminal).
    Error,

    /// Cancelled by a caller (terminal).
    Cancelled,
}

impl WorkflowStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Success | WorkflowStatus::Error | WorkflowStatus::Cancelled
        )
    }

    /// Returns the status name as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Enqueued => "ENQUEUED",
            WorkflowStatus::Pending => "PENDING",
            WorkflowStatus::Success => "SUCCESS",
            WorkflowStatus::Error => "ERROR",
            WorkflowStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parses a stored status name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ENQUEUED" => Some(WorkflowStatus::Enqueued),
            "PENDING" => Some(WorkflowStatus::Pending),
            "SUCCESS" => Some(WorkflowStatus::Success),
            "ERROR" => Some(WorkflowStatus::Error),
            "CANCELLED" => Some(WorkflowStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A workflow instance as stored in the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// The instance ID (idempotency key).
    pub id: WorkflowId,

    /// Registered workflow name used to find the code to run.
    pub name: String,

    /// The workflow input as JSON.
    pub input: serde_json::Value,

    /// Current lifecycle status.
    pub status: WorkflowStatus,

    /// The output as JSON, once the workflow succeeded.
    pub output: Option<serde_json::Value>,

    /// The error text, once the workflow failed.
    pub error: Option<String>,

    /// The workflow that started this one as a child, if any.
    pub parent_id: Option<WorkflowId>,

    /// The workflow this one was forked from, if any.
    pub forked_from: Option<WorkflowId>,

    /// When the instance was created.
    pub created_at: DateTime<Utc>,

    /// When the status last changed.
    pub updated_at: DateTime<Utc>,

    /// When the workflow body returned. A cancelled instance whose body has
    /// not returned yet still has cleanup left to run.
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRecord {
    /// Creates a record for a workflow that starts executing immediately.
    pub fn new(id: WorkflowId, name: impl Into<String>, input: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            input,
            status: WorkflowStatus::Pending,
            output: None,
            error: None,
            parent_id: None,
            forked_from: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Sets the initial status.
    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = status;
        self
    }

    /// Records the parent that spawned this workflow.
    pub fn with_parent(mut self, parent_id: WorkflowId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Records the workflow this one was forked from.
    pub fn with_forked_from(mut self, original: WorkflowId) -> Self {
        self.forked_from = Some(original);
        self
    }
}

/// The memoized result of one durable operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// The owning workflow instance.
    pub workflow_id: WorkflowId,

    /// Position of the operation in program order.
    pub seq: StepSeq,

    /// Step name (or the name of the built-in operation, e.g. `recv`).
    pub name: String,

    /// The step output as JSON, if it completed.
    pub output: Option<serde_json::Value>,

    /// The error text, if the step failed after all retries.
    pub error: Option<String>,

    /// The child workflow started by this operation, if any.
    pub child_id: Option<WorkflowId>,

    /// When the result was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl StepRecord {
    /// Creates a record for a step that completed with an output.
    pub fn success(
        workflow_id: WorkflowId,
        seq: StepSeq,
        name: impl Into<String>,
        output: serde_json::Value,
    ) -> Self {
        Self {
            workflow_id,
            seq,
            name: name.into(),
            output: Some(output),
            error: None,
            child_id: None,
            recorded_at: Utc::now(),
        }
    }

    /// Creates a record for a step that failed.
    pub fn failure(
        workflow_id: WorkflowId,
        seq: StepSeq,
        name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id,
            seq,
            name: name.into(),
            output: None,
            error: Some(error.into()),
            child_id: None,
            recorded_at: Utc::now(),
        }
    }

    /// Links a child workflow to this record.
    pub fn with_child(mut self, child_id: WorkflowId) -> Self {
        self.child_id = Some(child_id);
        self
    }

    /// Returns true if the step recorded a failure.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
