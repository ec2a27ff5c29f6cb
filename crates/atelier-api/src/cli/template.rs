//! `atelier templates` and `atelier validate`.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use atelier_core::service::registry::ServiceRegistry;
use atelier_core::workflow::dag::{ExecutionPlan, build_execution_plan};
use atelier_core::workflow::template::{load_template_file, validate_services};
use atelier_infra::templates::build_template_registry;
use atelier_types::config::OrchestratorConfig;

fn format_waves(plan: &ExecutionPlan) -> String {
    plan.waves
        .iter()
        .map(|wave| format!("[{}]", wave.join(", ")))
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// List every template the server would register.
pub fn list_templates(config: &OrchestratorConfig, json: bool) -> Result<()> {
    let services = ServiceRegistry::new(config.services.clone());
    let registry = build_template_registry(&services, config.templates_dir.as_deref())
        .context("Failed to load workflow templates")?;

    if json {
        let out: Vec<_> = registry
            .list()
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.template.name,
                    "description": t.template.description,
                    "steps": t.template.steps.len(),
                    "waves": t.plan.waves,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Steps"),
            Cell::new("Waves"),
            Cell::new("Description"),
        ]);

    for t in registry.list() {
        table.add_row(vec![
            Cell::new(&t.template.name).fg(Color::Cyan),
            Cell::new(t.template.steps.len()),
            Cell::new(format_waves(&t.plan)),
            Cell::new(t.template.description.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

/// Parse, validate and resolve one template file.
pub fn validate_file(file: &Path, config: &OrchestratorConfig, json: bool) -> Result<()> {
    let template = load_template_file(file)
        .with_context(|| format!("Invalid template {}", file.display()))?;
    let plan = build_execution_plan(&template.steps)
        .with_context(|| format!("Invalid template {}", file.display()))?;
    let services = ServiceRegistry::new(config.services.clone());
    validate_services(&template, &services)
        .with_context(|| format!("Invalid template {}", file.display()))?;

    if json {
        let out = serde_json::json!({
            "valid": true,
            "name": template.name,
            "steps": template.steps.len(),
            "waves": plan.waves,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Template '{}' is valid",
            style("*").green().bold(),
            style(&template.name).cyan()
        );
        println!("  Steps: {}", template.steps.len());
        println!("  Waves: {}", format_waves(&plan));
        println!();
    }
    Ok(())
}
