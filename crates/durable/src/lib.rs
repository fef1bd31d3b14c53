//! Durable workflow runtime.
//!
//! Workflows are ordinary async functions that perform every side effect
//! through a [`WorkflowContext`]. Each context call is journaled under the
//! next step sequence number, so re-executing a workflow (after a restart,
//! or as a fork of an earlier instance) replays recorded results instead of
//! repeating side effects.
//!
//! The runtime provides:
//! - idempotent start by workflow ID
//! - steps with retry policies
//! - set-once events and consume-once signals, awaited with timeouts
//! - durable sleep
//! - child workflows dispatched through a bounded work queue
//! - introspection: list, steps, fork, cancel

pub mod config;
pub mod context;
pub mod error;
mod hub;
pub mod runtime;
pub mod workflow;

pub use common::WorkflowId;
pub use config::{RetryPolicy, RuntimeConfig};
pub use context::WorkflowContext;
pub use error::{DurableError, Result};
pub use journal::{StepRecord, StepSeq, WorkflowQuery, WorkflowRecord, WorkflowStatus};
pub use runtime::{DurableRuntime, RuntimeBuilder, WorkflowHandle};
pub use workflow::Workflow;
