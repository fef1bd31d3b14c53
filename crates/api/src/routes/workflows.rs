//! Workflow introspection and management endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use common::WorkflowId;
use durable::{StepRecord, StepSeq, WorkflowQuery, WorkflowRecord, WorkflowStatus};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 100;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct ListWorkflowsParams {
    pub name: Option<String>,
    pub status: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
pub struct WorkflowResponse {
    pub workflow_id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub parent_id: Option<String>,
    pub forked_from: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl From<WorkflowRecord> for WorkflowResponse {
    fn from(r: WorkflowRecord) -> Self {
        Self {
            workflow_id: r.id.to_string(),
            name: r.name,
            status: r.status,
            input: r.input,
            output: r.output,
            error: r.error,
            parent_id: r.parent_id.map(|id| id.to_string()),
            forked_from: r.forked_from.map(|id| id.to_string()),
            created_at: r.created_at.to_rfc3339(),
            updated_at: r.updated_at.to_rfc3339(),
            completed_at: r.completed_at.map(|at| at.to_rfc3339()),
        }
    }
}

#[derive(Serialize)]
pub struct StepResponse {
    pub seq: StepSeq,
    pub name: String,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub child_id: Option<String>,
    pub recorded_at: String,
}

impl From<StepRecord> for StepResponse {
    fn from(s: StepRecord) -> Self {
        Self {
            seq: s.seq,
            name: s.name,
            output: s.output,
            error: s.error,
            child_id: s.child_id.map(|id| id.to_string()),
            recorded_at: s.recorded_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct ForkResponse {
    pub workflow_id: String,
    pub forked_from: String,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub workflow_id: String,
    pub cancelled: bool,
}

// -- Handlers --

/// GET /workflows?name=&status=&created_after=&limit=&offset=
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListWorkflowsParams>,
) -> Result<Json<Vec<WorkflowResponse>>, ApiError> {
    let mut query = WorkflowQuery::new()
        .limit(params.limit.unwrap_or(DEFAULT_LIMIT))
        .offset(params.offset.unwrap_or(0));
    if let Some(name) = params.name {
        query = query.name(name);
    }
    if let Some(status) = params.status {
        let status = WorkflowStatus::parse(&status.to_uppercase())
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid workflow status: {status}")))?;
        query = query.status(status);
    }
    if let Some(created_after) = params.created_after {
        query = query.created_after(created_after);
    }

    let records = state.coordinator.list_workflows(query).await?;
    Ok(Json(records.into_iter().map(WorkflowResponse::from).collect()))
}

/// GET /workflows/{id}
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let record = state
        .coordinator
        .get_workflow(&WorkflowId::new(id))
        .await?;
    Ok(Json(record.into()))
}

/// GET /workflows/{id}/steps
pub async fn steps(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StepResponse>>, ApiError> {
    let id = WorkflowId::new(id);
    state.coordinator.get_workflow(&id).await?;
    let steps = state.coordinator.list_steps(&id).await?;
    Ok(Json(steps.into_iter().map(StepResponse::from).collect()))
}

/// POST /workflows/{id}/fork/{step}: replays the workflow under a new ID,
/// re-executing from `step` onwards.
#[tracing::instrument(skip(state))]
pub async fn fork(
    State(state): State<Arc<AppState>>,
    Path((id, step)): Path<(String, i32)>,
) -> Result<Json<ForkResponse>, ApiError> {
    let id = WorkflowId::new(id);
    let forked = state.coordinator.fork_workflow(&id, step).await?;
    Ok(Json(ForkResponse {
        workflow_id: forked.to_string(),
        forked_from: id.to_string(),
    }))
}

/// POST /workflows/{id}/cancel
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id = WorkflowId::new(id);
    let cancelled = state.coordinator.cancel_workflow(&id).await?;
    Ok(Json(CancelResponse {
        workflow_id: id.to_string(),
        cancelled,
    }))
}
