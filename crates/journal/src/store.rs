use async_trait::async_trait;

use crate::{Result, StepRecord, StepSeq, WorkflowId, WorkflowQuery, WorkflowRecord, WorkflowStatus};

/// Outcome of inserting a workflow record.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// No instance with this ID existed; the record was stored.
    Created,
    /// An instance with this ID already exists; nothing was written.
    Existing(WorkflowRecord),
}

impl InsertOutcome {
    /// Returns true if a new instance was created.
    pub fn is_created(&self) -> bool {
        matches!(self, InsertOutcome::Created)
    }
}

/// Core trait for journal implementations.
///
/// A journal persists workflow instances and the memoized results of their
/// durable operations. All implementations must be thread-safe (Send + Sync)
/// and every mutating call must be atomic on its own.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Inserts a workflow record unless one with the same ID exists.
    async fn insert_workflow(&self, record: WorkflowRecord) -> Result<InsertOutcome>;

    /// Loads a workflow record.
    async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowRecord>>;

    /// Moves a workflow to `to` if its current status is one of `from`.
    ///
    /// `error`, when given, replaces the stored error text. Returns false
    /// (and writes nothing) if the status is not in `from`; fails with
    /// `WorkflowNotFound` if the instance does not exist.
    async fn transition_status(
        &self,
        id: &WorkflowId,
        from: &[WorkflowStatus],
        to: WorkflowStatus,
        error: Option<String>,
    ) -> Result<bool>;

    /// Records that the workflow body returned, stamping `completed_at`.
    ///
    /// A `Cancelled` instance keeps its status, output and error; any other
    /// instance takes `status` with its output or error. Returns the status
    /// the instance ends with.
    async fn complete_workflow(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<WorkflowStatus>;

    /// Lists workflows matching a query, oldest first.
    async fn list_workflows(&self, query: WorkflowQuery) -> Result<Vec<WorkflowRecord>>;

    /// Appends the result of one durable operation.
    ///
    /// Fails with `StepConflict` if a record already exists at the same
    /// `(workflow_id, seq)`; the first writer wins.
    async fn append_step(&self, record: StepRecord) -> Result<()>;

    /// Loads the record at one sequence number.
    async fn get_step(&self, id: &WorkflowId, seq: StepSeq) -> Result<Option<StepRecord>>;

    /// Lists every recorded step of a workflow in sequence order.
    async fn list_steps(&self, id: &WorkflowId) -> Result<Vec<StepRecord>>;

    /// Copies the steps of `from` with sequence number below `before` to `to`.
    ///
    /// Returns the number of records copied.
    async fn copy_steps(&self, from: &WorkflowId, to: &WorkflowId, before: StepSeq)
    -> Result<usize>;

    /// Sets an event value if the key is still unset.
    ///
    /// Returns false (and writes nothing) if the key already has a value.
    async fn set_event(&self, id: &WorkflowId, key: &str, value: serde_json::Value)
    -> Result<bool>;

    /// Reads an event value.
    async fn get_event(&self, id: &WorkflowId, key: &str) -> Result<Option<serde_json::Value>>;

    /// Delivers a message to a workflow's inbox for a topic.
    async fn push_signal(&self, id: &WorkflowId, topic: &str, payload: serde_json::Value)
    -> Result<()>;

    /// Removes and returns the oldest pending message for a topic.
    async fn pop_signal(&self, id: &WorkflowId, topic: &str) -> Result<Option<serde_json::Value>>;

    /// Consumes the oldest pending message for a topic and records it as the
    /// step `name` at `seq`, in one atomic write.
    ///
    /// Returns `Ok(None)` and writes nothing if the inbox is empty. If the
    /// step record cannot be written (for example `StepConflict`), the
    /// message stays in the inbox.
    async fn receive_signal(
        &self,
        id: &WorkflowId,
        topic: &str,
        seq: StepSeq,
        name: &str,
    ) -> Result<Option<serde_json::Value>>;
}

/// Extension trait providing convenience methods for journals.
#[async_trait]
pub trait JournalExt: Journal {
    /// Checks if a workflow instance exists.
    async fn workflow_exists(&self, id: &WorkflowId) -> Result<bool> {
        Ok(self.get_workflow(id).await?.is_some())
    }

    /// Returns the highest recorded sequence number of a workflow.
    async fn last_seq(&self, id: &WorkflowId) -> Result<StepSeq> {
        Ok(self
            .list_steps(id)
            .await?
            .last()
            .map(|s| s.seq)
            .unwrap_or(StepSeq::initial()))
    }

    /// Returns the current status of a workflow, if it exists.
    async fn workflow_status(&self, id: &WorkflowId) -> Result<Option<WorkflowStatus>> {
        Ok(self.get_workflow(id).await?.map(|r| r.status))
    }
}

// Blanket implementation for all Journal implementations
impl<T: Journal + ?Sized> JournalExt for T {}
