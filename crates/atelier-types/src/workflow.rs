//! Workflow domain types for Atelier.
//!
//! Defines the template representation loaded at startup (`WorkflowTemplate`,
//! `StepDefinition`), the per-request execution record (`WorkflowInstance`,
//! `StepResult`), and the aggregate returned to clients (`AggregatedResult`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow Template
// ---------------------------------------------------------------------------

/// A named, reusable graph of service calls.
///
/// Templates are registered once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Unique template name (e.g. "complete_style_analysis").
    pub name: String,
    /// Optional longer description shown in template listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whole-workflow deadline in seconds (overrides the engine default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Steps forming the dependency graph, in declaration order.
    pub steps: Vec<StepDefinition>,
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A single service call in a workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step ID, unique within its template.
    pub id: String,
    /// Logical name of the target service (key into the service registry).
    pub service: String,
    /// HTTP method used for the call.
    #[serde(default)]
    pub method: HttpMethod,
    /// Path appended to the service base URL (e.g. "/analyze").
    #[serde(default)]
    pub path: String,
    /// How the request body is built.
    #[serde(default)]
    pub input: InputMapping,
    /// Step IDs whose outputs this step consumes (DAG edges).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Retry policy override for this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// When true, failure of this step does not fail the workflow.
    #[serde(default)]
    pub optional: bool,
    /// Per-attempt timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// HTTP method for a step call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a step's request body is assembled.
///
/// Internally tagged by `type`:
/// ```yaml
/// input:
///   type: template
///   body:
///     user_id: "{{ context.user_id }}"
///     profile: "{{ steps.style_profile.output }}"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputMapping {
    /// `{"context": <submitted context>, "inputs": {<dep id>: <dep output>}}`.
    #[default]
    Passthrough,
    /// JSON body whose string leaves may reference the context or step outputs.
    Template { body: serde_json::Value },
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Retry configuration for a step or a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay in milliseconds; doubled after every failed attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution Status
// ---------------------------------------------------------------------------

/// Overall status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    PartialSuccess,
    Success,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::PartialSuccess
                | WorkflowStatus::Success
                | WorkflowStatus::Failed
                | WorkflowStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::PartialSuccess => "partial_success",
            WorkflowStatus::Success => "success",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a status string does not name a `WorkflowStatus`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown workflow status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for WorkflowStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(WorkflowStatus::Pending),
            "running" => Ok(WorkflowStatus::Running),
            "partial_success" => Ok(WorkflowStatus::PartialSuccess),
            "success" => Ok(WorkflowStatus::Success),
            "failed" => Ok(WorkflowStatus::Failed),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Status of a single step within an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

// ---------------------------------------------------------------------------
// Step Result
// ---------------------------------------------------------------------------

/// Classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    Timeout,
    Connection,
    HttpStatus,
    CircuitOpen,
    InvalidInput,
    UnknownService,
    DependencyFailed,
    Cancelled,
}

/// Error detail recorded on a failed or skipped step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepErrorDetail {
    pub kind: StepErrorKind,
    pub message: String,
    /// Downstream HTTP status for `http_status` failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

/// Execution record of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub service: String,
    pub optional: bool,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepErrorDetail>,
    /// Number of attempts made (fast-failed circuit attempts included).
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepResult {
    /// A not-yet-scheduled step.
    pub fn pending(step: &StepDefinition) -> Self {
        Self {
            step_id: step.id.clone(),
            service: step.service.clone(),
            optional: step.optional,
            status: StepStatus::Pending,
            output: None,
            error: None,
            attempts: 0,
            duration_ms: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow Instance
// ---------------------------------------------------------------------------

/// Body of `POST /workflows/execute` and `/workflows/execute/async`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub template_name: String,
    #[serde(default = "empty_context")]
    pub context: serde_json::Value,
}

fn empty_context() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// One execution of a template, created per client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// UUIDv7 instance ID.
    pub id: Uuid,
    pub template_name: String,
    /// The submitted context.
    pub context: serde_json::Value,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-step results keyed by step ID.
    pub steps: BTreeMap<String, StepResult>,
    /// Workflow-level error (deadline exceeded, cancellation reason).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowInstance {
    /// Create a pending instance with every step in `pending`.
    pub fn new(id: Uuid, template: &WorkflowTemplate, context: serde_json::Value) -> Self {
        Self {
            id,
            template_name: template.name.clone(),
            context,
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            steps: template
                .steps
                .iter()
                .map(|s| (s.id.clone(), StepResult::pending(s)))
                .collect(),
            error: None,
        }
    }

    /// Wall-clock duration, available once the instance has started and ended.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregated Result
// ---------------------------------------------------------------------------

/// Per-step entry of an aggregated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub optional: bool,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepErrorDetail>,
}

/// Single response object merging all step results of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub workflow_id: Uuid,
    pub template_name: String,
    pub status: WorkflowStatus,
    pub results: BTreeMap<String, StepOutcome>,
    /// Optional steps that failed or were skipped, sorted by ID.
    pub degraded: Vec<String>,
    /// Human-readable outcome summary.
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_defaults_from_yaml() {
        let yaml = r#"
id: analyze
service: image_processing
"#;
        let step: StepDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(step.method, HttpMethod::Post);
        assert_eq!(step.path, "");
        assert_eq!(step.input, InputMapping::Passthrough);
        assert!(step.depends_on.is_empty());
        assert!(step.retry.is_none());
        assert!(!step.optional);
    }

    #[test]
    fn template_input_mapping_parses() {
        let yaml = r#"
id: recommend
service: recommendation_engine
path: /recommend
depends_on: [profile]
optional: true
retry:
  max_attempts: 2
input:
  type: template
  body:
    user: "{{ context.user_id }}"
    profile: "{{ steps.profile.output }}"
"#;
        let step: StepDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert!(step.optional);
        let retry = step.retry.unwrap();
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.backoff_base_ms, 200);
        match step.input {
            InputMapping::Template { body } => {
                assert_eq!(body["user"], "{{ context.user_id }}");
            }
            other => panic!("expected template mapping, got {other:?}"),
        }
    }

    #[test]
    fn workflow_status_terminality() {
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(WorkflowStatus::PartialSuccess.is_terminal());
        assert!(WorkflowStatus::Success.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
    }

    #[test]
    fn workflow_status_parse_and_display() {
        let status: WorkflowStatus = "partial_success".parse().unwrap();
        assert_eq!(status, WorkflowStatus::PartialSuccess);
        assert_eq!(status.to_string(), "partial_success");
        assert!("bogus".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn workflow_status_serializes_snake_case() {
        let json = serde_json::to_string(&WorkflowStatus::PartialSuccess).unwrap();
        assert_eq!(json, "\"partial_success\"");
    }

    #[test]
    fn new_instance_has_all_steps_pending() {
        let template = WorkflowTemplate {
            name: "t".to_string(),
            description: None,
            timeout_secs: None,
            steps: vec![
                serde_yaml_ng::from_str("{id: a, service: nlu}").unwrap(),
                serde_yaml_ng::from_str("{id: b, service: nlu, depends_on: [a]}").unwrap(),
            ],
        };
        let instance = WorkflowInstance::new(Uuid::nil(), &template, empty_context());
        assert_eq!(instance.status, WorkflowStatus::Pending);
        assert_eq!(instance.steps.len(), 2);
        assert!(instance.steps.values().all(|s| s.status == StepStatus::Pending));
        assert!(instance.duration_ms().is_none());
    }

    #[test]
    fn request_context_defaults_to_empty_object() {
        let req: WorkflowRequest =
            serde_json::from_str(r#"{"template_name": "x"}"#).unwrap();
        assert!(req.context.as_object().unwrap().is_empty());
    }
}
