//! Static registry of target services.

use std::collections::BTreeMap;
use std::time::Duration;

use atelier_types::service::ServiceConfig;
use atelier_types::workflow::{RetryPolicy, StepDefinition};

use super::StepError;

/// Logical service name -> base URL, timeout, and retry policy.
///
/// Built once from configuration at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceConfig>,
}

impl ServiceRegistry {
    pub fn new(services: Vec<ServiceConfig>) -> Self {
        Self {
            services: services.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceConfig> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Full URL for a step: service base URL joined with the step path.
    pub fn url_for(&self, step: &StepDefinition) -> Result<String, StepError> {
        let service = self
            .get(&step.service)
            .ok_or_else(|| StepError::UnknownService(step.service.clone()))?;
        Ok(join_url(&service.base_url, &step.path))
    }

    /// Retry policy for a step: step override, then service, then default.
    pub fn retry_policy_for(&self, step: &StepDefinition) -> RetryPolicy {
        step.retry
            .or_else(|| self.get(&step.service).and_then(|s| s.retry))
            .unwrap_or_default()
    }

    /// Per-attempt timeout for a step: step override, then service, then fallback.
    pub fn timeout_for(&self, step: &StepDefinition, fallback: Duration) -> Duration {
        step.timeout_secs
            .or_else(|| self.get(&step.service).map(|s| s.timeout_secs))
            .map(Duration::from_secs)
            .unwrap_or(fallback)
    }
}

fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
