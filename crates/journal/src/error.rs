use thiserror::Error;

use crate::{StepSeq, WorkflowId};

/// Errors that can occur when interacting with the journal.
#[derive(Debug, Error)]
pub enum JournalError {
    /// A step record already exists at this sequence number.
    /// Two executors raced on the same workflow instance.
    #[error("Step conflict for workflow {workflow_id}: sequence {seq} is already recorded")]
    StepConflict { workflow_id: WorkflowId, seq: StepSeq },

    /// The workflow was not found in the journal.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// A stored value could not be decoded.
    #[error("Corrupt journal data: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for journal operations.
pub type Result<T> = std::result::Result<T, JournalError>;
