//! `atelier services`: the configured service registry.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};

use atelier_core::service::registry::ServiceRegistry;
use atelier_types::config::OrchestratorConfig;

pub fn list_services(config: &OrchestratorConfig, json: bool) -> Result<()> {
    let registry = ServiceRegistry::new(config.services.clone());

    if json {
        let out: Vec<_> = registry.iter().collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Service").fg(Color::Cyan),
            Cell::new("Base URL"),
            Cell::new("Timeout"),
            Cell::new("Retry"),
            Cell::new("Circuit"),
        ]);

    for svc in registry.iter() {
        let retry = svc.retry.unwrap_or_default();
        let breaker = svc.circuit_breaker.unwrap_or(config.circuit_breaker);
        table.add_row(vec![
            Cell::new(&svc.name).fg(Color::Cyan),
            Cell::new(&svc.base_url),
            Cell::new(format!("{}s", svc.timeout_secs)),
            Cell::new(format!(
                "{}x, {}ms base, {}ms cap",
                retry.max_attempts, retry.backoff_base_ms, retry.max_backoff_ms
            )),
            Cell::new(format!(
                "opens after {}, {}s cooldown",
                breaker.failure_threshold, breaker.cooldown_secs
            )),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
