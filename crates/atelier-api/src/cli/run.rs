//! `atelier run`: execute one workflow from the command line.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use atelier_core::workflow::aggregate::aggregate;
use atelier_types::config::OrchestratorConfig;
use atelier_types::workflow::{AggregatedResult, StepStatus, WorkflowRequest, WorkflowStatus};

use crate::state::AppState;

/// Parse the `--context` argument; absent means an empty object.
fn parse_context(raw: Option<&str>) -> Result<serde_json::Value> {
    let Some(raw) = raw else {
        return Ok(serde_json::json!({}));
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).context("Invalid JSON in --context")?;
    if !value.is_object() {
        bail!("--context must be a JSON object");
    }
    Ok(value)
}

fn status_color(status: StepStatus) -> Color {
    match status {
        StepStatus::Succeeded => Color::Green,
        StepStatus::Failed => Color::Red,
        StepStatus::Skipped => Color::Yellow,
        StepStatus::Pending | StepStatus::Running => Color::Grey,
    }
}

fn print_result(result: &AggregatedResult) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Error"),
        ]);

    for (id, outcome) in &result.results {
        let name = if outcome.optional {
            format!("{id} (optional)")
        } else {
            id.clone()
        };
        table.add_row(vec![
            Cell::new(name),
            Cell::new(outcome.status.as_str()).fg(status_color(outcome.status)),
            Cell::new(outcome.attempts),
            Cell::new(
                outcome
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or(""),
            ),
        ]);
    }

    let marker = match result.status {
        WorkflowStatus::Success => style("*").green().bold(),
        WorkflowStatus::PartialSuccess => style("~").yellow().bold(),
        _ => style("x").red().bold(),
    };
    println!();
    println!(
        "  {} Workflow '{}' {}",
        marker,
        style(&result.template_name).cyan(),
        result.summary
    );
    println!("  ID: {}", result.workflow_id);
    if let Some(ms) = result.duration_ms {
        println!("  Duration: {ms}ms");
    }
    println!();
    println!("{table}");
    println!();
}

/// Execute `template` once and print the aggregated result.
///
/// Fails (non-zero exit) when the workflow ends `failed` or `cancelled`.
pub async fn run_workflow(
    config: OrchestratorConfig,
    template: String,
    context: Option<&str>,
    mock: bool,
    json: bool,
) -> Result<()> {
    let context = parse_context(context)?;
    let state = AppState::init(config, mock)?;

    let instance = state
        .engine
        .execute(WorkflowRequest {
            template_name: template,
            context,
        })
        .await?;
    let result = aggregate(&instance);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    match result.status {
        WorkflowStatus::Failed | WorkflowStatus::Cancelled => {
            bail!("workflow {} ended {}", result.workflow_id, result.status)
        }
        _ => Ok(()),
    }
}
