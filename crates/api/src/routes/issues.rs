//! Security report and issue approval endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{IssueId, ReportId, WorkflowId};
use domain::{Issue, Report};
use saga::ScanSummary;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateReportRequest {
    pub repo_name: String,
    pub has_vuln: bool,
    #[serde(default)]
    pub raw_report: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct IssueWorkflowResponse {
    pub workflow_id: String,
}

#[derive(Serialize)]
pub struct DecisionResponse {
    pub workflow_id: String,
    pub decision: String,
}

#[derive(Serialize)]
pub struct IssueOutcomeResponse {
    pub workflow_id: String,
    pub status: String,
    pub summary: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct ScanOutcomeResponse {
    pub workflow_id: String,
    pub status: String,
    pub summary: Option<ScanSummary>,
    pub vulnerable: Option<usize>,
    pub error: Option<String>,
}

// -- Handlers --

/// GET /reports
pub async fn list_reports(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Report>>, ApiError> {
    Ok(Json(state.coordinator.list_reports().await?))
}

/// POST /reports: stores the latest scan report for a repository.
#[tracing::instrument(skip_all)]
pub async fn create_report(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<Report>), ApiError> {
    let report = state
        .coordinator
        .create_report(&req.repo_name, req.has_vuln, &req.raw_report)
        .await?;
    tracing::info!(report_id = %report.id, repo = %report.repo_name, "report stored");
    Ok((StatusCode::CREATED, Json(report)))
}

/// POST /reports/{id}/issue: starts an approval saga for the report.
#[tracing::instrument(skip(state))]
pub async fn start_issue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<IssueWorkflowResponse>), ApiError> {
    let report_id: ReportId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid report id: {e}")))?;
    let workflow_id = state.coordinator.start_issue_approval(report_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IssueWorkflowResponse {
            workflow_id: workflow_id.to_string(),
        }),
    ))
}

/// GET /issues/pending
pub async fn pending(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Issue>>, ApiError> {
    Ok(Json(state.coordinator.list_pending_issues().await?))
}

/// GET /issues/{id}
pub async fn get_issue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Issue>, ApiError> {
    let issue_id: IssueId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid issue id: {e}")))?;
    Ok(Json(state.coordinator.get_issue(issue_id).await?))
}

/// POST /issues/workflow/{workflow_id}/{decision}: `approved` or `rejected`.
#[tracing::instrument(skip(state))]
pub async fn decide(
    State(state): State<Arc<AppState>>,
    Path((workflow_id, decision)): Path<(String, String)>,
) -> Result<(StatusCode, Json<DecisionResponse>), ApiError> {
    let id = WorkflowId::new(workflow_id);
    state.coordinator.decide_issue(&id, &decision).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DecisionResponse {
            workflow_id: id.to_string(),
            decision,
        }),
    ))
}

/// GET /issues/workflow/{workflow_id}: status and summary of an approval saga.
pub async fn outcome(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
) -> Result<Json<IssueOutcomeResponse>, ApiError> {
    let record = state
        .coordinator
        .issue_outcome(&WorkflowId::new(workflow_id))
        .await?;
    Ok(Json(IssueOutcomeResponse {
        workflow_id: record.id.to_string(),
        status: record.status.to_string(),
        summary: record
            .output
            .and_then(|v| v.as_str().map(str::to_string)),
        error: record.error,
    }))
}

/// POST /scans: starts a scan over every available report.
#[tracing::instrument(skip(state))]
pub async fn start_scan(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<IssueWorkflowResponse>), ApiError> {
    let workflow_id = state.coordinator.start_scan().await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IssueWorkflowResponse {
            workflow_id: workflow_id.to_string(),
        }),
    ))
}

/// GET /scans/{workflow_id}
pub async fn scan_outcome(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
) -> Result<Json<ScanOutcomeResponse>, ApiError> {
    let record = state
        .coordinator
        .scan_outcome(&WorkflowId::new(workflow_id))
        .await?;
    let summary: Option<ScanSummary> = record
        .output
        .and_then(|v| serde_json::from_value(v).ok());
    Ok(Json(ScanOutcomeResponse {
        workflow_id: record.id.to_string(),
        status: record.status.to_string(),
        vulnerable: summary.as_ref().map(ScanSummary::vulnerable_count),
        summary,
        error: record.error,
    }))
}
