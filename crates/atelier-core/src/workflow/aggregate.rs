//! Merge a finished instance's step results into one response.

use std::collections::BTreeMap;

use atelier_types::workflow::{
    AggregatedResult, StepOutcome, StepStatus, WorkflowInstance, WorkflowStatus,
};

/// Build the client-facing result for `instance`.
///
/// Pure function of the instance: results are keyed in step-ID order and
/// `degraded` lists every step that did not succeed, so aggregating the same
/// instance twice yields identical JSON.
pub fn aggregate(instance: &WorkflowInstance) -> AggregatedResult {
    let results: BTreeMap<String, StepOutcome> = instance
        .steps
        .iter()
        .map(|(id, step)| {
            (
                id.clone(),
                StepOutcome {
                    status: step.status,
                    optional: step.optional,
                    attempts: step.attempts,
                    output: step.output.clone(),
                    error: step.error.clone(),
                },
            )
        })
        .collect();

    let degraded: Vec<String> = results
        .iter()
        .filter(|(_, outcome)| outcome.status != StepStatus::Succeeded)
        .map(|(id, _)| id.clone())
        .collect();

    AggregatedResult {
        workflow_id: instance.id,
        template_name: instance.template_name.clone(),
        status: instance.status,
        summary: summarize(instance.status, &results, &degraded),
        results,
        degraded,
        started_at: instance.started_at,
        completed_at: instance.completed_at,
        duration_ms: instance.duration_ms(),
    }
}

fn summarize(
    status: WorkflowStatus,
    results: &BTreeMap<String, StepOutcome>,
    degraded: &[String],
) -> String {
    let succeeded = results.len() - degraded.len();
    let mut summary = format!(
        "{status}: {succeeded}/{} steps succeeded",
        results.len()
    );
    if !degraded.is_empty() {
        summary.push_str(&format!(" (degraded: {})", degraded.join(", ")));
    }
    summary
}
