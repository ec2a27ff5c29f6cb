//! Per-service health tracking and circuit breaking.
//!
//! Each target service gets a [`ServiceHealth`] record driving a three-state
//! circuit breaker. [`CircuitBreakers`] holds one record per service in a
//! `DashMap`; every check or update holds the entry's shard lock, so
//! concurrent workflows touching the same service never race on the counters.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use atelier_types::service::{CircuitBreakerConfig, CircuitStateKind, ServiceHealthInfo};
use dashmap::DashMap;

use super::registry::ServiceRegistry;
use super::StepError;

/// Circuit breaker state for a service.
#[derive(Debug, Clone)]
pub enum CircuitState {
    /// Normal operation. Tracks consecutive failures toward threshold.
    Closed { consecutive_failures: u32 },
    /// Calls are rejected until the cool-down has elapsed.
    Open { opened_at: Instant },
    /// Probing: a single trial call is admitted at a time.
    HalfOpen { trial_started: Option<Instant> },
}

impl CircuitState {
    pub fn kind(&self) -> CircuitStateKind {
        match self {
            CircuitState::Closed { .. } => CircuitStateKind::Closed,
            CircuitState::Open { .. } => CircuitStateKind::Open,
            CircuitState::HalfOpen { .. } => CircuitStateKind::HalfOpen,
        }
    }
}

/// Health record for a single service.
#[derive(Debug)]
pub struct ServiceHealth {
    pub name: String,
    pub state: CircuitState,
    pub last_error: Option<String>,
    pub last_success: Option<Instant>,
    pub total_calls: u64,
    pub total_failures: u64,
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// How long to stay open before admitting a trial call.
    pub cooldown: Duration,
}

impl ServiceHealth {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            state: CircuitState::Closed {
                consecutive_failures: 0,
            },
            last_error: None,
            last_success: None,
            total_calls: 0,
            total_failures: 0,
            failure_threshold: config.failure_threshold.max(1),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }

    /// Decide whether a call may go out now.
    ///
    /// Moves Open -> HalfOpen once the cool-down has elapsed and claims the
    /// trial slot. A trial that never reported back is considered lost after
    /// another cool-down period, so a dropped call cannot wedge the breaker.
    pub fn try_acquire(&mut self) -> bool {
        match &self.state {
            CircuitState::Closed { .. } => true,
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.cooldown {
                    self.state = CircuitState::HalfOpen {
                        trial_started: Some(Instant::now()),
                    };
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen { trial_started } => match trial_started {
                Some(started) if started.elapsed() < self.cooldown => false,
                _ => {
                    self.state = CircuitState::HalfOpen {
                        trial_started: Some(Instant::now()),
                    };
                    true
                }
            },
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self) {
        self.total_calls += 1;
        self.last_success = Some(Instant::now());

        if !matches!(self.state, CircuitState::Closed { .. }) {
            tracing::info!(service = self.name.as_str(), "circuit closed");
        }
        self.state = CircuitState::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a failed call.
    pub fn record_failure(&mut self, error: &str) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.last_error = Some(error.to_string());

        match &self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let new_count = consecutive_failures + 1;
                if new_count >= self.failure_threshold {
                    tracing::warn!(
                        service = self.name.as_str(),
                        failures = new_count,
                        "circuit opened"
                    );
                    self.state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                } else {
                    self.state = CircuitState::Closed {
                        consecutive_failures: new_count,
                    };
                }
            }
            CircuitState::HalfOpen { .. } => {
                tracing::warn!(service = self.name.as_str(), "trial call failed, circuit reopened");
                self.state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
            }
            CircuitState::Open { .. } => {}
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        match &self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => *consecutive_failures,
            _ => self.failure_threshold,
        }
    }

    /// Convert to a `ServiceHealthInfo` for API and CLI display.
    pub fn to_health_info(&self) -> ServiceHealthInfo {
        let last_success_ago = self.last_success.map(|s| {
            let elapsed = s.elapsed();
            if elapsed.as_secs() < 60 {
                format!("{}s ago", elapsed.as_secs())
            } else if elapsed.as_secs() < 3600 {
                format!("{}m ago", elapsed.as_secs() / 60)
            } else {
                format!("{}h ago", elapsed.as_secs() / 3600)
            }
        });

        ServiceHealthInfo {
            name: self.name.clone(),
            circuit_state: self.state.kind(),
            consecutive_failures: self.consecutive_failures(),
            total_calls: self.total_calls,
            total_failures: self.total_failures,
            last_error: self.last_error.clone(),
            last_success_ago,
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakers
// ---------------------------------------------------------------------------

/// Shared circuit breakers for all services, keyed by service name.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    breakers: DashMap<String, ServiceHealth>,
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
}

impl CircuitBreakers {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
            overrides: HashMap::new(),
        }
    }

    /// Build breakers for every registered service, honouring per-service overrides.
    pub fn for_registry(defaults: CircuitBreakerConfig, registry: &ServiceRegistry) -> Self {
        let overrides = registry
            .iter()
            .filter_map(|svc| svc.circuit_breaker.map(|cb| (svc.name.clone(), cb)))
            .collect();
        let breakers = Self {
            breakers: DashMap::new(),
            defaults,
            overrides,
        };
        for svc in registry.iter() {
            breakers.with_health(&svc.name, |_| ());
        }
        breakers
    }

    fn with_health<T>(&self, service: &str, f: impl FnOnce(&mut ServiceHealth) -> T) -> T {
        let config = self.overrides.get(service).unwrap_or(&self.defaults);
        let mut entry = self
            .breakers
            .entry(service.to_string())
            .or_insert_with(|| ServiceHealth::new(service, config));
        f(entry.value_mut())
    }

    /// Admit or reject an attempt against `service`.
    pub fn try_acquire(&self, service: &str) -> Result<(), StepError> {
        if self.with_health(service, ServiceHealth::try_acquire) {
            Ok(())
        } else {
            Err(StepError::CircuitOpen {
                service: service.to_string(),
            })
        }
    }

    pub fn record_success(&self, service: &str) {
        self.with_health(service, ServiceHealth::record_success);
    }

    pub fn record_failure(&self, service: &str, error: &StepError) {
        let message = error.to_string();
        self.with_health(service, |h| h.record_failure(&message));
    }

    /// Current state of one service's breaker.
    pub fn state(&self, service: &str) -> CircuitStateKind {
        self.breakers
            .get(service)
            .map(|h| h.state.kind())
            .unwrap_or(CircuitStateKind::Closed)
    }

    /// Health of every known service, sorted by name.
    pub fn snapshot(&self) -> Vec<ServiceHealthInfo> {
        let mut infos: Vec<ServiceHealthInfo> =
            self.breakers.iter().map(|h| h.to_health_info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}
