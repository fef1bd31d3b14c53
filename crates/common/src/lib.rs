//! Identifier types shared across the saga workspace.

pub mod types;

pub use types::{IssueId, OrderId, ProductId, ReportId, WorkflowId};
