use chrono::{DateTime, Utc};

use crate::{WorkflowRecord, WorkflowStatus};

/// Builder for filtering workflow listings.
///
/// Results are ordered by creation time, oldest first.
#[derive(Debug, Clone, Default)]
pub struct WorkflowQuery {
    /// Filter by registered workflow name.
    pub name: Option<String>,

    /// Filter by status (any of these).
    pub statuses: Option<Vec<WorkflowStatus>>,

    /// Filter by workflows created at or after this time.
    pub created_after: Option<DateTime<Utc>>,

    /// Maximum number of workflows to return.
    pub limit: Option<usize>,

    /// Number of workflows to skip.
    pub offset: Option<usize>,
}

impl WorkflowQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by workflow name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Filters by a single status.
    pub fn status(mut self, status: WorkflowStatus) -> Self {
        self.statuses = Some(vec![status]);
        self
    }

    /// Filters by several statuses.
    pub fn statuses(mut self, statuses: Vec<WorkflowStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    /// Filters by creation time.
    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the record passes every filter.
    pub fn matches(&self, record: &WorkflowRecord) -> bool {
        if let Some(ref name) = self.name
            && &record.name != name
        {
            return false;
        }
        if let Some(ref statuses) = self.statuses
            && !statuses.contains(&record.status)
        {
            return false;
        }
        if let Some(after) = self.created_after
            && record.created_at < after
        {
            return false;
        }
        true
    }
}
