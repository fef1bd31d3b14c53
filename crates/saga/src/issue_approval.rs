//! Issue approval saga definition.
//!
//! ```text
//! read report ──► generate body ──► create issue ──► issue_generated = <issue id>
//!                                                        │
//!                                           wait "approval" (timeout)
//!                                                        │
//!                          ┌──── "approved" / "rejected" ┴ timeout ───► error
//!                          ▼
//!                  update issue status ──► "Issue <id> status: <status>"
//! ```
//!
//! Unlike checkout, a wait that runs out is a fault here: an approval is
//! expected to arrive eventually, so the issue stays `pending_approval` and
//! the saga fails.

use async_trait::async_trait;
use common::{IssueId, ReportId};
use domain::{Issue, IssueStatus, Report};
use durable::{Workflow, WorkflowContext};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::services::SagaServices;

/// Event carrying the ID of the generated issue.
pub const ISSUE_GENERATED_EVENT: &str = "issue_generated";
/// Signal topic carrying the decision.
pub const APPROVAL_TOPIC: &str = "approval";

const STEP_READ_REPORT: &str = "read_report";
const STEP_GENERATE_CONTENT: &str = "generate_issue_content";
const STEP_CREATE_ISSUE: &str = "create_issue";
const STEP_UPDATE_STATUS: &str = "update_issue_status";

/// Input of an issue approval saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueApprovalInput {
    pub report_id: ReportId,
}

pub struct IssueApprovalWorkflow {
    services: SagaServices,
}

impl IssueApprovalWorkflow {
    pub fn new(services: SagaServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Workflow for IssueApprovalWorkflow {
    const NAME: &'static str = "issue_approval";
    type Input = IssueApprovalInput;
    type Output = String;
    type Error = SagaError;

    #[tracing::instrument(skip(self, ctx), fields(workflow_id = %ctx.workflow_id()))]
    async fn run(&self, ctx: &WorkflowContext, input: IssueApprovalInput) -> Result<String> {
        let IssueApprovalInput { report_id } = input;
        let workflow_id = ctx.workflow_id();

        let reports = &self.services.reports;
        let report: Report = ctx
            .run_step(STEP_READ_REPORT, || async move {
                reports
                    .get_report(report_id)
                    .await?
                    .ok_or(SagaError::ReportNotFound(report_id))
            })
            .await?;

        let generator = &self.services.generator;
        let report = &report;
        let body: String = ctx
            .run_step(STEP_GENERATE_CONTENT, || async move {
                generator.generate_issue(report).await
            })
            .await?;

        let issues = &self.services.issues;
        let body = body.as_str();
        let issue: Issue = ctx
            .run_step(STEP_CREATE_ISSUE, || async move {
                issues.create_issue(&report.repo_name, body, workflow_id).await
            })
            .await?;
        let issue_id: IssueId = issue.id;

        ctx.set_event(ISSUE_GENERATED_EVENT, &issue_id).await?;
        tracing::info!(%issue_id, repo = %report.repo_name, "issue generated, waiting for approval");

        let decision: Option<String> = ctx
            .recv(APPROVAL_TOPIC, self.services.config.approval_timeout)
            .await?;
        let Some(decision) = decision.filter(|d| !d.is_empty()) else {
            metrics::counter!("issue_decisions", "decision" => "timed_out").increment(1);
            tracing::error!(%issue_id, "no approval decision before timeout");
            return Err(SagaError::ApprovalTimedOut(workflow_id.clone()));
        };

        let decision = decision.as_str();
        let updated: Issue = ctx
            .run_step(STEP_UPDATE_STATUS, || async move {
                let status: IssueStatus = decision.parse()?;
                issues.update_issue_status(issue_id, status).await
            })
            .await?;

        metrics::counter!("issue_decisions", "decision" => updated.status.as_str()).increment(1);
        tracing::info!(%issue_id, status = %updated.status, "issue resolved");
        Ok(format!("Issue {} status: {}", updated.id, updated.status))
    }
}
