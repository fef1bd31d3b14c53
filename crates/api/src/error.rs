//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, IssueError, OrderError};
use durable::DurableError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga or workflow error.
    Saga(SagaError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    let status = match &err {
        SagaError::ProductNotFound(_)
        | SagaError::OrderNotFound(_)
        | SagaError::ReportNotFound(_)
        | SagaError::IssueNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SagaError::OutOfStock(_) => StatusCode::CONFLICT,
        SagaError::EventTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        SagaError::Domain(domain) => domain_status(domain),
        SagaError::Durable(durable) => durable_status(durable),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Issue(IssueError::InvalidStatus(_) | IssueError::InvalidDecision(_)) => {
            StatusCode::BAD_REQUEST
        }
        DomainError::Issue(IssueError::AlreadyResolved { .. })
        | DomainError::Order(OrderError::InvalidStatusTransition { .. }) => StatusCode::CONFLICT,
        DomainError::Order(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn durable_status(err: &DurableError) -> StatusCode {
    match err {
        DurableError::WorkflowNotFound(_) => StatusCode::NOT_FOUND,
        DurableError::InvalidFork { .. } => StatusCode::BAD_REQUEST,
        DurableError::WorkflowTypeMismatch { .. } | DurableError::EventAlreadySet { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}
