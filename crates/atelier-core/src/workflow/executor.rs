//! Workflow engine: wave-based parallel execution with retries, circuit
//! breaking, and cooperative cancellation.
//!
//! The `WorkflowEngine` processes a template's precomputed waves in order.
//! Steps within the same wave run concurrently via `tokio::JoinSet`. Step
//! tasks never touch shared instance state: they report every transition
//! through an mpsc channel to the single driver that owns the instance, and
//! the driver writes a snapshot to the `StatusStore` after each one.
//!
//! # Execution flow
//!
//! 1. Look up the template (unknown name fails before any instance exists).
//! 2. Create a pending `WorkflowInstance` and its cancellation token.
//! 3. For each wave: stop if cancelled or past the workflow deadline, skip
//!    steps whose dependencies did not succeed, spawn the rest.
//! 4. Each step: circuit check -> invoke with timeout -> retry with backoff.
//! 5. Resolve the final status from the step results.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use atelier_types::config::EngineConfig;
use atelier_types::workflow::{
    RetryPolicy, StepDefinition, StepErrorDetail, StepErrorKind, StepStatus, WorkflowInstance,
    WorkflowRequest, WorkflowStatus, WorkflowTemplate,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::service::health::CircuitBreakers;
use crate::service::registry::ServiceRegistry;
use crate::service::{ServiceInvoker, ServiceRequest, StepError};

use super::context::WorkflowContext;
use super::dag::transitive_dependents;
use super::registry::{RegisteredTemplate, TemplateRegistry};
use super::retry::RetryHandler;
use super::status_store::StatusStore;
use super::template::WorkflowError;

// ---------------------------------------------------------------------------
// Step events
// ---------------------------------------------------------------------------

/// Transition reported by a step task to its workflow driver.
#[derive(Debug)]
enum StepEvent {
    Started {
        step_id: String,
        at: DateTime<Utc>,
    },
    AttemptFailed {
        step_id: String,
        attempt: u32,
        error: StepErrorDetail,
    },
    Finished {
        step_id: String,
        attempts: u32,
        duration_ms: u64,
        outcome: Result<Value, StepErrorDetail>,
    },
}

// ---------------------------------------------------------------------------
// Run state (owned by the driver)
// ---------------------------------------------------------------------------

struct RunState {
    instance: WorkflowInstance,
    ctx: WorkflowContext,
    registered: Arc<RegisteredTemplate>,
}

impl RunState {
    fn new(instance: WorkflowInstance, registered: Arc<RegisteredTemplate>) -> Self {
        let ctx = WorkflowContext::new(instance.context.clone());
        Self {
            instance,
            ctx,
            registered,
        }
    }

    /// Apply `event`; a step that ends failed takes its dependents down with it.
    fn apply(&mut self, event: StepEvent) {
        let failed = match &event {
            StepEvent::Finished {
                step_id,
                outcome: Err(detail),
                ..
            } if detail.kind != StepErrorKind::Cancelled => Some(step_id.clone()),
            _ => None,
        };
        self.record_event(event);
        if let Some(step_id) = failed {
            self.skip_dependents(&step_id);
        }
    }

    fn record_event(&mut self, event: StepEvent) {
        match event {
            StepEvent::Started { step_id, at } => {
                if let Some(result) = self.instance.steps.get_mut(&step_id) {
                    result.status = StepStatus::Running;
                    result.started_at = Some(at);
                }
            }
            StepEvent::AttemptFailed {
                step_id,
                attempt,
                error,
            } => {
                if let Some(result) = self.instance.steps.get_mut(&step_id) {
                    result.attempts = attempt;
                    result.error = Some(error);
                }
            }
            StepEvent::Finished {
                step_id,
                attempts,
                duration_ms,
                outcome,
            } => {
                let Some(result) = self.instance.steps.get_mut(&step_id) else {
                    return;
                };
                result.attempts = attempts;
                result.duration_ms = duration_ms;
                result.completed_at = Some(Utc::now());
                match outcome {
                    Ok(output) => {
                        result.status = StepStatus::Succeeded;
                        result.error = None;
                        self.ctx.set_step_output(&step_id, output.clone());
                        result.output = Some(output);
                    }
                    Err(detail) => {
                        result.status = StepStatus::Failed;
                        result.error = Some(detail);
                    }
                }
            }
        }
    }

    /// Finish a step without running it.
    fn settle(&mut self, step_id: &str, status: StepStatus, detail: StepErrorDetail) {
        if let Some(result) = self.instance.steps.get_mut(step_id) {
            result.status = status;
            result.error = Some(detail);
            result.completed_at = Some(Utc::now());
        }
    }

    /// Skip every pending step downstream of `failed`, ahead of its wave.
    fn skip_dependents(&mut self, failed: &str) {
        let registered = Arc::clone(&self.registered);
        let dependents = transitive_dependents(failed, &registered.template.steps);
        let now = Utc::now();
        for step_id in dependents {
            let Some(result) = self.instance.steps.get_mut(step_id) else {
                continue;
            };
            if result.status != StepStatus::Pending {
                continue;
            }
            tracing::info!(
                workflow_id = %self.instance.id,
                step_id,
                upstream = failed,
                "skipping step, upstream step did not succeed"
            );
            result.status = StepStatus::Skipped;
            result.completed_at = Some(now);
            result.error = Some(StepErrorDetail {
                kind: StepErrorKind::DependencyFailed,
                message: format!("upstream step '{failed}' did not succeed"),
                status_code: None,
            });
        }
    }

    fn is_settled(&self, step_id: &str) -> bool {
        self.instance
            .steps
            .get(step_id)
            .is_some_and(|r| r.status.is_terminal())
    }

    /// First dependency of `step` that did not succeed.
    fn blocking_dependency(&self, step: &StepDefinition) -> Option<String> {
        step.depends_on
            .iter()
            .find(|dep| {
                self.instance.steps.get(dep.as_str()).map(|r| r.status)
                    != Some(StepStatus::Succeeded)
            })
            .cloned()
    }

    /// Steps of `wave` still running after every task joined lost their task.
    fn fail_abandoned(&mut self, wave: &[String]) {
        for step_id in wave {
            if let Some(result) = self.instance.steps.get_mut(step_id) {
                if result.status == StepStatus::Running {
                    result.status = StepStatus::Failed;
                    result.completed_at = Some(Utc::now());
                    result.error = Some(StepErrorDetail {
                        kind: StepErrorKind::Connection,
                        message: "step task aborted".to_string(),
                        status_code: None,
                    });
                }
            }
        }
    }

    /// Mark every pending step skipped.
    fn skip_pending(&mut self, detail: &StepErrorDetail) {
        let now = Utc::now();
        for result in self.instance.steps.values_mut() {
            if result.status == StepStatus::Pending {
                result.status = StepStatus::Skipped;
                result.error = Some(detail.clone());
                result.completed_at = Some(now);
            }
        }
    }

    /// `success` if every step succeeded, `partial_success` if every other
    /// step is optional, `failed` otherwise.
    fn final_status(&self) -> WorkflowStatus {
        let mut degraded = self
            .instance
            .steps
            .values()
            .filter(|r| r.status != StepStatus::Succeeded)
            .peekable();
        if degraded.peek().is_none() {
            WorkflowStatus::Success
        } else if degraded.all(|r| r.optional) {
            WorkflowStatus::PartialSuccess
        } else {
            WorkflowStatus::Failed
        }
    }

    fn failed_required_steps(&self) -> Vec<&str> {
        self.instance
            .steps
            .values()
            .filter(|r| !r.optional && r.status != StepStatus::Succeeded)
            .map(|r| r.step_id.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Step task
// ---------------------------------------------------------------------------

/// Everything a spawned step needs; owns its data so the task is `'static`.
struct StepTask {
    workflow_id: Uuid,
    step: StepDefinition,
    url: String,
    body: Value,
    policy: RetryPolicy,
    timeout: Duration,
    invoker: Arc<dyn ServiceInvoker>,
    breakers: Arc<CircuitBreakers>,
}

impl StepTask {
    async fn run(self, events: mpsc::UnboundedSender<StepEvent>, token: CancellationToken) {
        let started = Instant::now();
        let mut attempt = 0u32;
        let mut last_error: Option<StepError> = None;

        let outcome = loop {
            if token.is_cancelled() {
                match &last_error {
                    None => {
                        tracing::debug!(
                            workflow_id = %self.workflow_id,
                            step_id = self.step.id.as_str(),
                            "workflow cancelled before step started"
                        );
                        return;
                    }
                    Some(error) => {
                        break Err(StepErrorDetail {
                            kind: StepErrorKind::Cancelled,
                            message: format!(
                                "workflow cancelled after {attempt} attempt(s); last error: {error}"
                            ),
                            status_code: None,
                        });
                    }
                }
            }

            attempt += 1;
            if attempt == 1 {
                let _ = events.send(StepEvent::Started {
                    step_id: self.step.id.clone(),
                    at: Utc::now(),
                });
            }

            match self.attempt(attempt).await {
                Ok(output) => break Ok(output),
                Err(error) => {
                    if !RetryHandler::should_retry(&self.policy, attempt, &error) {
                        break Err(error.to_detail());
                    }
                    let delay = RetryHandler::backoff_delay(&self.policy, attempt);
                    tracing::warn!(
                        workflow_id = %self.workflow_id,
                        step_id = self.step.id.as_str(),
                        service = self.step.service.as_str(),
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %error,
                        "step attempt failed, retrying"
                    );
                    let _ = events.send(StepEvent::AttemptFailed {
                        step_id: self.step.id.clone(),
                        attempt,
                        error: error.to_detail(),
                    });
                    last_error = Some(error);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => {}
                    }
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => tracing::info!(
                workflow_id = %self.workflow_id,
                step_id = self.step.id.as_str(),
                attempts = attempt,
                duration_ms,
                "step succeeded"
            ),
            Err(detail) => tracing::warn!(
                workflow_id = %self.workflow_id,
                step_id = self.step.id.as_str(),
                attempts = attempt,
                error = detail.message.as_str(),
                "step failed"
            ),
        }
        let _ = events.send(StepEvent::Finished {
            step_id: self.step.id.clone(),
            attempts: attempt,
            duration_ms,
            outcome,
        });
    }

    /// One attempt: circuit check, then a call bounded by the step timeout.
    async fn attempt(&self, attempt: u32) -> Result<Value, StepError> {
        let service = self.step.service.as_str();
        self.breakers.try_acquire(service)?;

        tracing::debug!(
            workflow_id = %self.workflow_id,
            step_id = self.step.id.as_str(),
            service,
            attempt,
            url = self.url.as_str(),
            "invoking service"
        );
        let request = ServiceRequest {
            service: service.to_string(),
            url: self.url.clone(),
            method: self.step.method,
            body: self.body.clone(),
            timeout: self.timeout,
        };

        let result = match tokio::time::timeout(self.timeout, self.invoker.invoke(request)).await {
            Ok(Ok(response)) if response.is_success() => Ok(response.body),
            Ok(Ok(response)) => Err(StepError::Status {
                service: service.to_string(),
                status: response.status,
                body: response.body,
            }),
            Ok(Err(error)) => Err(error),
            Err(_elapsed) => Err(StepError::Timeout {
                service: service.to_string(),
                after_ms: self.timeout.as_millis() as u64,
            }),
        };

        match &result {
            Ok(_) => self.breakers.record_success(service),
            Err(error) if error.counts_against_service() => {
                self.breakers.record_failure(service, error)
            }
            Err(_) => {}
        }
        result
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Executes workflow requests against the registered templates and services.
pub struct WorkflowEngine {
    templates: Arc<TemplateRegistry>,
    services: Arc<ServiceRegistry>,
    invoker: Arc<dyn ServiceInvoker>,
    breakers: Arc<CircuitBreakers>,
    store: Arc<StatusStore>,
    config: EngineConfig,
    /// Cancellation tokens of running workflows, keyed by instance ID.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl WorkflowEngine {
    pub fn new(
        templates: Arc<TemplateRegistry>,
        services: Arc<ServiceRegistry>,
        invoker: Arc<dyn ServiceInvoker>,
        breakers: Arc<CircuitBreakers>,
        store: Arc<StatusStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            templates,
            services,
            invoker,
            breakers,
            store,
            config,
            cancellation_tokens: DashMap::new(),
        }
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    /// Run a workflow to completion and return its final snapshot.
    ///
    /// The driver runs on its own task, so dropping the returned future
    /// leaves the workflow running to a terminal status in the store.
    pub async fn execute(
        self: &Arc<Self>,
        request: WorkflowRequest,
    ) -> Result<WorkflowInstance, ExecutorError> {
        let (registered, instance, token) = self.prepare(request)?;
        let id = instance.id;
        let engine = Arc::clone(self);
        let driver =
            tokio::spawn(async move { engine.drive(registered, instance, token).await });
        match driver.await {
            Ok(finished) => Ok(finished),
            Err(e) => {
                tracing::error!(workflow_id = %id, error = %e, "workflow driver task failed");
                self.cancellation_tokens.remove(&id);
                Err(ExecutorError::DriverFailed {
                    id,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Start a workflow in the background and return its instance ID.
    pub fn spawn(self: &Arc<Self>, request: WorkflowRequest) -> Result<Uuid, ExecutorError> {
        let (registered, instance, token) = self.prepare(request)?;
        let id = instance.id;
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.drive(registered, instance, token).await;
        });
        Ok(id)
    }

    /// Cancel a workflow and return its latest snapshot.
    ///
    /// Cancelling a finished workflow changes nothing.
    pub fn cancel(&self, id: Uuid) -> Result<WorkflowInstance, ExecutorError> {
        let snapshot = self
            .store
            .mark_cancelled(id)
            .ok_or(ExecutorError::InstanceNotFound(id))?;
        if let Some(token) = self.cancellation_tokens.get(&id) {
            token.cancel();
            tracing::info!(workflow_id = %id, "workflow cancelled");
        }
        Ok(snapshot)
    }

    /// Latest snapshot of an instance.
    pub fn status(&self, id: Uuid) -> Result<WorkflowInstance, ExecutorError> {
        self.store
            .get(id)
            .ok_or(ExecutorError::InstanceNotFound(id))
    }

    /// Whether a driver is still working on `id`.
    pub fn is_active(&self, id: Uuid) -> bool {
        self.cancellation_tokens.contains_key(&id)
    }

    fn prepare(
        &self,
        request: WorkflowRequest,
    ) -> Result<(Arc<RegisteredTemplate>, WorkflowInstance, CancellationToken), ExecutorError> {
        let registered = self.templates.get(&request.template_name)?;
        let instance =
            WorkflowInstance::new(Uuid::now_v7(), &registered.template, request.context);
        let token = CancellationToken::new();
        self.cancellation_tokens.insert(instance.id, token.clone());
        self.store.record(instance.clone());
        Ok((registered, instance, token))
    }

    fn workflow_timeout(&self, template: &WorkflowTemplate) -> Duration {
        Duration::from_secs(
            template
                .timeout_secs
                .unwrap_or(self.config.workflow_timeout_secs),
        )
    }

    /// Own one instance from start to terminal status.
    async fn drive(
        &self,
        registered: Arc<RegisteredTemplate>,
        instance: WorkflowInstance,
        token: CancellationToken,
    ) -> WorkflowInstance {
        let id = instance.id;
        let mut state = RunState::new(instance, Arc::clone(&registered));
        state.instance.status = WorkflowStatus::Running;
        state.instance.started_at = Some(Utc::now());
        self.store.record(state.instance.clone());

        tracing::info!(
            workflow_id = %id,
            template = registered.template.name.as_str(),
            waves = registered.plan.waves.len(),
            "starting workflow execution"
        );

        let result = self.execute_waves(&registered, &mut state, &token).await;
        self.cancellation_tokens.remove(&id);

        let (status, error) = match result {
            Ok(()) => {
                let status = state.final_status();
                let error = (status == WorkflowStatus::Failed).then(|| {
                    format!(
                        "required steps did not succeed: {}",
                        state.failed_required_steps().join(", ")
                    )
                });
                (status, error)
            }
            Err(ExecutorError::Cancelled) => {
                (WorkflowStatus::Cancelled, Some("workflow cancelled".to_string()))
            }
            Err(e @ ExecutorError::WorkflowTimeout { .. }) => {
                state.skip_pending(&StepErrorDetail {
                    kind: StepErrorKind::Timeout,
                    message: e.to_string(),
                    status_code: None,
                });
                (WorkflowStatus::Failed, Some(e.to_string()))
            }
            Err(e) => (WorkflowStatus::Failed, Some(e.to_string())),
        };

        state.instance.status = status;
        state.instance.completed_at = Some(Utc::now());
        state.instance.error = error;
        self.store.record(state.instance.clone());

        // The store may hold a status set concurrently by `cancel`.
        let finished = self.store.get(id).unwrap_or(state.instance);
        tracing::info!(
            workflow_id = %id,
            status = %finished.status,
            duration_ms = finished.duration_ms().unwrap_or(0),
            "workflow finished"
        );
        finished
    }

    /// Run every wave in order, recording each transition.
    async fn execute_waves(
        &self,
        registered: &RegisteredTemplate,
        state: &mut RunState,
        token: &CancellationToken,
    ) -> Result<(), ExecutorError> {
        let template = &registered.template;
        let workflow_id = state.instance.id;
        let workflow_timeout = self.workflow_timeout(template);
        let deadline = Instant::now() + workflow_timeout;
        let default_timeout = Duration::from_secs(self.config.default_step_timeout_secs);
        let steps: HashMap<&str, &StepDefinition> =
            template.steps.iter().map(|s| (s.id.as_str(), s)).collect();

        let (tx, mut rx) = mpsc::unbounded_channel::<StepEvent>();

        for (wave_idx, wave) in registered.plan.waves.iter().enumerate() {
            if token.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(ExecutorError::WorkflowTimeout {
                    after_secs: workflow_timeout.as_secs(),
                });
            }

            tracing::debug!(
                workflow_id = %workflow_id,
                wave = wave_idx,
                steps = wave.len(),
                "processing wave"
            );

            let mut join_set = JoinSet::new();

            for step_id in wave {
                let Some(step) = steps.get(step_id.as_str()).copied() else {
                    continue;
                };
                if state.is_settled(&step.id) {
                    continue;
                }

                if let Some(dep) = state.blocking_dependency(step) {
                    tracing::info!(
                        workflow_id = %workflow_id,
                        step_id = step.id.as_str(),
                        dependency = dep.as_str(),
                        "skipping step, dependency did not succeed"
                    );
                    state.settle(
                        &step.id,
                        StepStatus::Skipped,
                        StepErrorDetail {
                            kind: StepErrorKind::DependencyFailed,
                            message: format!("dependency '{dep}' did not succeed"),
                            status_code: None,
                        },
                    );
                    self.store.record(state.instance.clone());
                    continue;
                }

                let prepared = self
                    .services
                    .url_for(step)
                    .and_then(|url| Ok((url, state.ctx.build_request_body(step)?)));
                let (url, body) = match prepared {
                    Ok(prepared) => prepared,
                    Err(error) => {
                        tracing::warn!(
                            workflow_id = %workflow_id,
                            step_id = step.id.as_str(),
                            error = %error,
                            "step cannot be invoked"
                        );
                        state.settle(&step.id, StepStatus::Failed, error.to_detail());
                        state.skip_dependents(&step.id);
                        self.store.record(state.instance.clone());
                        continue;
                    }
                };

                let task = StepTask {
                    workflow_id,
                    step: step.clone(),
                    url,
                    body,
                    policy: self.services.retry_policy_for(step),
                    timeout: self.services.timeout_for(step, default_timeout),
                    invoker: Arc::clone(&self.invoker),
                    breakers: Arc::clone(&self.breakers),
                };
                join_set.spawn(task.run(tx.clone(), token.clone()));
            }

            // Apply events as they arrive until every task of the wave joined.
            loop {
                tokio::select! {
                    biased;
                    Some(event) = rx.recv() => {
                        state.apply(event);
                        self.store.record(state.instance.clone());
                    }
                    joined = join_set.join_next() => match joined {
                        Some(Ok(())) => {}
                        Some(Err(e)) => {
                            tracing::error!(workflow_id = %workflow_id, error = %e, "step task failed to join");
                        }
                        None => break,
                    },
                }
            }
            while let Ok(event) = rx.try_recv() {
                state.apply(event);
                self.store.record(state.instance.clone());
            }
            state.fail_abandoned(wave);
        }

        if token.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors that can occur during workflow execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Template lookup or validation error.
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Workflow exceeded its overall deadline.
    #[error("workflow timed out after {after_secs}s")]
    WorkflowTimeout { after_secs: u64 },

    /// Workflow execution was cancelled.
    #[error("workflow cancelled")]
    Cancelled,

    /// No instance with this ID (for status and cancel).
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    /// The task driving the instance panicked or was aborted.
    #[error("workflow {id} driver failed: {message}")]
    DriverFailed { id: Uuid, message: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
