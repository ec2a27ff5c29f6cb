//! Target service descriptions and health reporting types.

use serde::{Deserialize, Serialize};

use crate::workflow::RetryPolicy;

/// A logical downstream service the orchestrator can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Logical name referenced by `StepDefinition.service`.
    pub name: String,
    /// Base URL (e.g. "http://localhost:8001"); step paths are appended.
    pub base_url: String,
    /// Per-attempt timeout in seconds.
    #[serde(default = "default_service_timeout_secs")]
    pub timeout_secs: u64,
    /// Retry policy for steps that do not override it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Circuit breaker thresholds overriding the global ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

fn default_service_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            timeout_secs: default_service_timeout_secs(),
            retry: None,
            circuit_breaker: None,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before a trial call is admitted.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    30
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Externally visible circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

/// Health snapshot of one service, for `GET /services` and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealthInfo {
    pub name: String,
    pub circuit_state: CircuitStateKind,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_ago: Option<String>,
}
