//! Report and issue stores with in-memory implementations.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use common::{IssueId, ReportId, WorkflowId};
use domain::{Issue, IssueStatus, Report};

use crate::error::SagaError;

/// Trait for scan report persistence. One report is kept per repository.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Stores the latest report for a repository, replacing any earlier one.
    async fn upsert_report(
        &self,
        repo_name: &str,
        has_vuln: bool,
        raw_report: &str,
    ) -> Result<Report, SagaError>;

    async fn get_report(&self, report_id: ReportId) -> Result<Option<Report>, SagaError>;

    /// Lists reports, newest first.
    async fn list_reports(&self) -> Result<Vec<Report>, SagaError>;
}

/// Trait for issue persistence.
#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Creates an issue pending approval.
    ///
    /// Each approval workflow owns at most one issue: calling this again with
    /// the same `workflow_id` returns the existing issue.
    async fn create_issue(
        &self,
        repo_name: &str,
        body: &str,
        workflow_id: &WorkflowId,
    ) -> Result<Issue, SagaError>;

    /// Applies an approval decision.
    async fn update_issue_status(
        &self,
        issue_id: IssueId,
        status: IssueStatus,
    ) -> Result<Issue, SagaError>;

    async fn get_issue(&self, issue_id: IssueId) -> Result<Option<Issue>, SagaError>;

    async fn get_issue_by_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<Issue>, SagaError>;

    /// Lists issues still waiting for a decision, newest first.
    async fn list_pending_issues(&self) -> Result<Vec<Issue>, SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryReportState {
    reports: BTreeMap<ReportId, Report>,
    next_id: i64,
}

/// In-memory report store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReportStore {
    state: Arc<RwLock<InMemoryReportState>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryReportState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryReportState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn upsert_report(
        &self,
        repo_name: &str,
        has_vuln: bool,
        raw_report: &str,
    ) -> Result<Report, SagaError> {
        let mut state = self.write();

        if let Some(existing) = state.reports.values_mut().find(|r| r.repo_name == repo_name) {
            existing.has_vuln = has_vuln;
            existing.raw_report = raw_report.to_string();
            existing.created_at = Utc::now();
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let report = Report {
            id: ReportId::new(state.next_id),
            repo_name: repo_name.to_string(),
            has_vuln,
            raw_report: raw_report.to_string(),
            created_at: Utc::now(),
        };
        state.reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn get_report(&self, report_id: ReportId) -> Result<Option<Report>, SagaError> {
        Ok(self.read().reports.get(&report_id).cloned())
    }

    async fn list_reports(&self) -> Result<Vec<Report>, SagaError> {
        Ok(self.read().reports.values().rev().cloned().collect())
    }
}

#[derive(Debug, Default)]
struct InMemoryIssueState {
    issues: BTreeMap<IssueId, Issue>,
    next_id: i64,
}

/// In-memory issue store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIssueStore {
    state: Arc<RwLock<InMemoryIssueState>>,
}

impl InMemoryIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored issues.
    pub fn issue_count(&self) -> usize {
        self.read().issues.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryIssueState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryIssueState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl IssueStore for InMemoryIssueStore {
    async fn create_issue(
        &self,
        repo_name: &str,
        body: &str,
        workflow_id: &WorkflowId,
    ) -> Result<Issue, SagaError> {
        let mut state = self.write();

        if let Some(existing) = state.issues.values().find(|i| &i.workflow_id == workflow_id) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let issue = Issue::new(
            IssueId::new(state.next_id),
            repo_name,
            body,
            workflow_id.clone(),
        );
        state.issues.insert(issue.id, issue.clone());
        Ok(issue)
    }

    async fn update_issue_status(
        &self,
        issue_id: IssueId,
        status: IssueStatus,
    ) -> Result<Issue, SagaError> {
        let mut state = self.write();
        let issue = state
            .issues
            .get_mut(&issue_id)
            .ok_or(SagaError::IssueNotFound(issue_id))?;
        issue.resolve(status)?;
        Ok(issue.clone())
    }

    async fn get_issue(&self, issue_id: IssueId) -> Result<Option<Issue>, SagaError> {
        Ok(self.read().issues.get(&issue_id).cloned())
    }

    async fn get_issue_by_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<Issue>, SagaError> {
        Ok(self
            .read()
            .issues
            .values()
            .find(|i| &i.workflow_id == workflow_id)
            .cloned())
    }

    async fn list_pending_issues(&self) -> Result<Vec<Issue>, SagaError> {
        Ok(self
            .read()
            .issues
            .values()
            .rev()
            .filter(|i| i.status == IssueStatus::PendingApproval)
            .cloned()
            .collect())
    }
}
