//! CLI command definitions for the `atelier` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod run;
pub mod service;
pub mod template;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Orchestrate multi-service AI workflows.
#[derive(Parser)]
#[command(name = "atelier", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to config.toml (default: <config dir>/atelier/config.toml).
    #[arg(long, global = true, env = "ATELIER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text (logs included).
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the orchestrator REST API.
    Serve {
        /// Host to bind to (overrides [server].host).
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides [server].port).
        #[arg(short, long)]
        port: Option<u16>,

        /// Answer service calls in-process instead of calling the services.
        #[arg(long)]
        mock: bool,
    },

    /// List registered workflow templates and their execution waves.
    Templates,

    /// Parse and validate a workflow template file.
    Validate {
        /// Path to the template YAML file.
        file: PathBuf,
    },

    /// Run a workflow once and print the aggregated result.
    Run {
        /// Template name.
        template: String,

        /// JSON context passed to the workflow.
        #[arg(long)]
        context: Option<String>,

        /// Answer service calls in-process instead of calling the services.
        #[arg(long)]
        mock: bool,
    },

    /// Show configured downstream services.
    Services,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_global_flags() {
        let cli = Cli::try_parse_from([
            "atelier",
            "-vv",
            "run",
            "outfit_recommendation",
            "--context",
            r#"{"user_id":"u-1"}"#,
            "--mock",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
        match cli.command {
            Commands::Run { template, context, mock } => {
                assert_eq!(template, "outfit_recommendation");
                assert_eq!(context.as_deref(), Some(r#"{"user_id":"u-1"}"#));
                assert!(mock);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn serve_overrides_are_optional() {
        let cli = Cli::try_parse_from(["atelier", "serve", "--port", "9100"]).unwrap();
        match cli.command {
            Commands::Serve { host, port, mock } => {
                assert!(host.is_none());
                assert_eq!(port, Some(9100));
                assert!(!mock);
            }
            _ => panic!("expected serve"),
        }
    }
}
