//! Global configuration types for Atelier.
//!
//! `OrchestratorConfig` represents the top-level `config.toml` that controls
//! the HTTP listener, engine defaults, circuit breaker thresholds, status
//! store retention, and the registry of downstream services.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::service::{CircuitBreakerConfig, ServiceConfig};

/// Top-level configuration. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    /// Global circuit breaker thresholds (services may override).
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub status_store: StatusStoreConfig,

    /// Directory of additional `*.yaml` workflow templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<PathBuf>,

    /// Downstream services. Defaults to the six AI services on localhost.
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            engine: EngineConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            status_store: StatusStoreConfig::default(),
            templates_dir: None,
            services: default_services(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8006
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Execution engine defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-attempt timeout for steps whose service has none configured.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,
    /// Whole-workflow deadline for templates that do not set one.
    #[serde(default = "default_workflow_timeout_secs")]
    pub workflow_timeout_secs: u64,
}

fn default_step_timeout_secs() -> u64 {
    30
}

fn default_workflow_timeout_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_secs: default_step_timeout_secs(),
            workflow_timeout_secs: default_workflow_timeout_secs(),
        }
    }
}

/// Retention of workflow instances in the status store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusStoreConfig {
    /// Seconds a finished instance is kept after completion.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Maximum number of instances held; oldest finished ones go first.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Interval of the background expiry sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    10_000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for StatusStoreConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// The AI services of the style platform, on their development ports.
pub fn default_services() -> Vec<ServiceConfig> {
    [
        ("image_processing", 8001),
        ("nlu", 8002),
        ("style_profile", 8003),
        ("combination_engine", 8004),
        ("recommendation_engine", 8005),
        ("feedback_loop", 8007),
    ]
    .into_iter()
    .map(|(name, port)| ServiceConfig::new(name, format!("http://localhost:{port}")))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.server.port, 8006);
        assert_eq!(config.engine.workflow_timeout_secs, 300);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.status_store.max_entries, 10_000);
        assert_eq!(config.services.len(), 6);
        assert!(config.templates_dir.is_none());
    }

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: OrchestratorConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.status_store.ttl_secs, 3600);
        assert!(config.services.iter().any(|s| s.name == "style_profile"));
    }

    #[test]
    fn test_deserialize_with_values() {
        let toml_str = r#"
templates_dir = "/etc/atelier/templates"

[server]
port = 9000

[circuit_breaker]
failure_threshold = 5
cooldown_secs = 10

[status_store]
ttl_secs = 60
max_entries = 100

[[services]]
name = "nlu"
base_url = "http://nlu.internal"
timeout_secs = 3

[services.retry]
max_attempts = 5
"#;
        let config: OrchestratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.status_store.max_entries, 100);
        assert_eq!(config.status_store.sweep_interval_secs, 60);
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].timeout_secs, 3);
        assert_eq!(config.services[0].retry.unwrap().max_attempts, 5);
        assert_eq!(
            config.templates_dir.as_deref(),
            Some(std::path::Path::new("/etc/atelier/templates"))
        );
    }
}
