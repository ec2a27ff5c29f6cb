//! Atelier CLI and REST API entry point.
//!
//! Binary name: `atelier`
//!
//! Parses CLI arguments, loads configuration, then dispatches to the
//! appropriate command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use atelier_infra::config::load_config;
use atelier_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
use atelier_types::config::OrchestratorConfig;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(TracingOptions {
        verbosity: cli.verbose,
        json: cli.json,
        otel: cli.otel,
    })?;

    let config = load_config(cli.config.as_deref()).await?;

    let result = match cli.command {
        Commands::Serve { host, port, mock } => serve(config, host, port, mock).await,
        Commands::Templates => cli::template::list_templates(&config, cli.json),
        Commands::Validate { file } => cli::template::validate_file(&file, &config, cli.json),
        Commands::Run {
            template,
            context,
            mock,
        } => cli::run::run_workflow(config, template, context.as_deref(), mock, cli.json).await,
        Commands::Services => cli::service::list_services(&config, cli.json),
    };

    shutdown_tracing();
    result
}

/// Run the REST API until Ctrl+C or SIGTERM.
async fn serve(
    mut config: OrchestratorConfig,
    host: Option<String>,
    port: Option<u16>,
    mock: bool,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState::init(config, mock)?;
    let shutdown = CancellationToken::new();
    let sweeper = Arc::clone(&state.store).spawn_sweeper(shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        %addr,
        templates = state.engine.templates().len(),
        services = state.engine.services().len(),
        mock,
        "orchestrator listening"
    );
    println!(
        "  {} Atelier orchestrator listening on {}",
        console::style("*").green().bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let router = http::router::build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "status store sweeper ended abnormally");
    }
    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
///
/// If a handler cannot be installed, that signal is never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
