//! Security reports and the issues generated from them.

mod state;

pub use state::IssueStatus;

use chrono::{DateTime, Utc};
use common::{IssueId, ReportId, WorkflowId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during issue operations.
#[derive(Debug, Error)]
pub enum IssueError {
    /// The value is not one of the known issue statuses.
    #[error("Invalid issue status: {0:?}")]
    InvalidStatus(String),

    /// Decisions must be `approved` or `rejected`.
    #[error("Invalid decision: {0}")]
    InvalidDecision(IssueStatus),

    /// The issue was already resolved with a different decision.
    #[error("Issue {id} is already {status}")]
    AlreadyResolved { id: IssueId, status: IssueStatus },
}

/// A scan report for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub repo_name: String,
    pub has_vuln: bool,
    pub raw_report: String,
    pub created_at: DateTime<Utc>,
}

/// A generated issue waiting for (or resolved by) a human decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub repo_name: String,
    pub body: String,
    pub status: IssueStatus,
    /// The approval saga that owns this issue.
    pub workflow_id: WorkflowId,
    pub created_at: DateTime<Utc>,
}

impl Issue {
    /// Creates an issue pending approval.
    pub fn new(
        id: IssueId,
        repo_name: impl Into<String>,
        body: impl Into<String>,
        workflow_id: WorkflowId,
    ) -> Self {
        Self {
            id,
            repo_name: repo_name.into(),
            body: body.into(),
            status: IssueStatus::PendingApproval,
            workflow_id,
            created_at: Utc::now(),
        }
    }

    /// Applies an approval decision.
    ///
    /// Re-applying the same decision is a no-op.
    pub fn resolve(&mut self, decision: IssueStatus) -> Result<(), IssueError> {
        if !decision.is_resolved() {
            return Err(IssueError::InvalidDecision(decision));
        }
        match self.status {
            IssueStatus::PendingApproval => {
                self.status = decision;
                Ok(())
            }
            current if current == decision => Ok(()),
            current => Err(IssueError::AlreadyResolved {
                id: self.id,
                status: current,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue() -> Issue {
        Issue::new(IssueId::new(1), "acme/api", "body", WorkflowId::new("wf"))
    }

    #[test]
    fn test_new_issue_is_pending() {
        assert_eq!(issue().status, IssueStatus::PendingApproval);
    }

    #[test]
    fn test_resolve_once() {
        let mut issue = issue();
        issue.resolve(IssueStatus::Approved).unwrap();
        assert_eq!(issue.status, IssueStatus::Approved);

        issue.resolve(IssueStatus::Approved).unwrap();
        assert!(matches!(
            issue.resolve(IssueStatus::Rejected),
            Err(IssueError::AlreadyResolved { .. })
        ));
    }

    #[test]
    fn test_pending_is_not_a_decision() {
        let mut issue = issue();
        assert!(matches!(
            issue.resolve(IssueStatus::PendingApproval),
            Err(IssueError::InvalidDecision(_))
        ));
    }
}
