//! Domain error types.

use thiserror::Error;

use crate::issue::IssueError;
use crate::order::OrderError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the order model.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// An error occurred in the issue model.
    #[error("Issue error: {0}")]
    Issue(#[from] IssueError),
}
