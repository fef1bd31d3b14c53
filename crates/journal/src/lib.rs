//! Durable step journal.
//!
//! The journal is the append-only log a workflow runtime replays from: one
//! record per workflow instance, one record per completed durable operation
//! keyed by `(workflow id, step sequence number)`, plus the per-instance event
//! namespace (set-once values) and signal inboxes (consume-once messages).

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;

pub use common::WorkflowId;
pub use error::{JournalError, Result};
pub use memory::InMemoryJournal;
pub use postgres::PostgresJournal;
pub use query::WorkflowQuery;
pub use record::{StepRecord, StepSeq, WorkflowRecord, WorkflowStatus};
pub use store::{InsertOutcome, Journal, JournalExt};
