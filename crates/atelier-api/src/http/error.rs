//! Application error type mapping to HTTP status codes and envelope format.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use atelier_core::workflow::executor::ExecutorError;
use atelier_core::workflow::template::WorkflowError;

use super::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Engine errors (template lookup, unknown instance).
    Executor(ExecutorError),
    /// Malformed request body or query.
    Validation(String),
}

impl From<ExecutorError> for AppError {
    fn from(e: ExecutorError) -> Self {
        AppError::Executor(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Executor(ExecutorError::Workflow(WorkflowError::TemplateNotFound(name))) => (
                StatusCode::NOT_FOUND,
                "TEMPLATE_NOT_FOUND",
                format!("Template '{name}' not found"),
            ),
            AppError::Executor(ExecutorError::InstanceNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "WORKFLOW_NOT_FOUND",
                format!("Workflow '{id}' not found"),
            ),
            AppError::Executor(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "WORKFLOW_ERROR", e.to_string())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        }

        let mut response =
            ApiResponse::error(code, &message, uuid::Uuid::now_v7().to_string()).into_response();
        *response.status_mut() = status;
        response
    }
}
