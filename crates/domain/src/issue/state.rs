use serde::{Deserialize, Serialize};

use super::IssueError;

/// Approval status of an issue.
///
/// ```text
/// PendingApproval ──┬──► Approved
///                   └──► Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    PendingApproval,
    Approved,
    Rejected,
}

impl IssueStatus {
    /// Returns true once a decision has been applied.
    pub fn is_resolved(&self) -> bool {
        matches!(self, IssueStatus::Approved | IssueStatus::Rejected)
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::PendingApproval => "pending_approval",
            IssueStatus::Approved => "approved",
            IssueStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for IssueStatus {
    type Err = IssueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_approval" => Ok(IssueStatus::PendingApproval),
            "approved" => Ok(IssueStatus::Approved),
            "rejected" => Ok(IssueStatus::Rejected),
            other => Err(IssueError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wire_names() {
        assert_eq!("approved".parse::<IssueStatus>().unwrap(), IssueStatus::Approved);
        assert_eq!("rejected".parse::<IssueStatus>().unwrap(), IssueStatus::Rejected);
        assert_eq!(
            "pending_approval".parse::<IssueStatus>().unwrap(),
            IssueStatus::PendingApproval
        );
        assert!("maybe".parse::<IssueStatus>().is_err());
        assert!("".parse::<IssueStatus>().is_err());
    }

    #[test]
    fn test_serialization_matches_wire_names() {
        let json = serde_json::to_string(&IssueStatus::PendingApproval).unwrap();
        assert_eq!(json, "\"pending_approval\"");
    }
}
