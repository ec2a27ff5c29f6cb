//! Workflow execution, status and analytics handlers.
//!
//! Endpoints for running templates (blocking or in the background), polling
//! and cancelling instances, and inspecting templates and recent runs.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use atelier_core::workflow::aggregate::aggregate;
use atelier_core::workflow::status_store::WorkflowAnalytics;
use atelier_types::workflow::{
    AggregatedResult, StepDefinition, WorkflowInstance, WorkflowRequest, WorkflowStatus,
};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Query parameters and views
// ---------------------------------------------------------------------------

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// Query parameters for listing workflow instances.
#[derive(Debug, Deserialize, Default)]
pub struct ListWorkflowsQuery {
    /// Filter by status (`running`, `failed`, ...).
    pub status: Option<String>,
    /// Maximum results (default 50, at most 500).
    pub limit: Option<usize>,
}

/// Compact row of `GET /workflows`.
#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub id: Uuid,
    pub template_name: String,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub steps: usize,
}

impl From<&WorkflowInstance> for WorkflowSummary {
    fn from(instance: &WorkflowInstance) -> Self {
        Self {
            id: instance.id,
            template_name: instance.template_name.clone(),
            status: instance.status,
            created_at: instance.created_at,
            completed_at: instance.completed_at,
            duration_ms: instance.duration_ms(),
            steps: instance.steps.len(),
        }
    }
}

/// A registered template with its resolved waves.
#[derive(Debug, Serialize)]
pub struct TemplateView {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub steps: Vec<StepDefinition>,
    pub waves: Vec<Vec<String>>,
}

/// Body of `202 Accepted` from the async endpoint.
#[derive(Debug, Serialize)]
pub struct AcceptedWorkflow {
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
}

fn status_link(id: Uuid) -> String {
    format!("/workflows/{id}/status")
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// POST /workflows/execute - Run a workflow and return the aggregated result.
///
/// Answers 200 whatever the workflow outcome; `status` in the body tells
/// success, partial success and failure apart.
pub async fn execute_workflow(
    State(state): State<AppState>,
    payload: Result<Json<WorkflowRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AggregatedResult>>, AppError> {
    let timer = RequestTimer::start();
    let Json(request) = payload?;

    let instance = state.engine.execute(request).await?;
    let result = aggregate(&instance);

    let resp = timer
        .finish(result)
        .with_link("status", &status_link(instance.id));
    Ok(Json(resp))
}

/// POST /workflows/execute/async - Start a workflow and return its ID.
pub async fn execute_workflow_async(
    State(state): State<AppState>,
    payload: Result<Json<WorkflowRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<AcceptedWorkflow>>), AppError> {
    let timer = RequestTimer::start();
    let Json(request) = payload?;

    let workflow_id = state.engine.spawn(request)?;

    let resp = timer
        .finish(AcceptedWorkflow {
            workflow_id,
            status: WorkflowStatus::Pending,
        })
        .with_link("status", &status_link(workflow_id))
        .with_link("cancel", &format!("/workflows/{workflow_id}"));
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

/// GET /workflows/{id}/status - Latest snapshot of an instance.
pub async fn get_workflow_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowInstance>>, AppError> {
    let timer = RequestTimer::start();
    let instance = state.engine.status(id)?;
    Ok(Json(timer.finish(instance).with_link("self", &status_link(id))))
}

/// DELETE /workflows/{id} - Cancel an instance and return its snapshot.
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowInstance>>, AppError> {
    let timer = RequestTimer::start();
    let instance = state.engine.cancel(id)?;
    Ok(Json(timer.finish(instance).with_link("status", &status_link(id))))
}

/// GET /workflows - Recent instances, newest first.
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowSummary>>>, AppError> {
    let timer = RequestTimer::start();

    let status = query
        .status
        .as_deref()
        .map(str::parse::<WorkflowStatus>)
        .transpose()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);

    let summaries: Vec<WorkflowSummary> = state
        .store
        .list(status, limit)
        .iter()
        .map(WorkflowSummary::from)
        .collect();

    Ok(Json(timer.finish(summaries).with_link("self", "/workflows")))
}

/// GET /workflows/analytics - Counts per status and per template.
pub async fn get_analytics(
    State(state): State<AppState>,
) -> Json<ApiResponse<WorkflowAnalytics>> {
    let timer = RequestTimer::start();
    Json(timer.finish(state.store.analytics()))
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// GET /workflows/templates - Registered templates and their waves.
pub async fn list_templates(State(state): State<AppState>) -> Json<ApiResponse<Vec<TemplateView>>> {
    let timer = RequestTimer::start();

    let views: Vec<TemplateView> = state
        .engine
        .templates()
        .list()
        .iter()
        .map(|registered| TemplateView {
            name: registered.template.name.clone(),
            description: registered.template.description.clone(),
            timeout_secs: registered.template.timeout_secs,
            steps: registered.template.steps.clone(),
            waves: registered.plan.waves.clone(),
        })
        .collect();

    Json(timer.finish(views).with_link("self", "/workflows/templates"))
}
