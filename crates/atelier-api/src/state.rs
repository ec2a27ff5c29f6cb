//! Application state wiring the engine together.
//!
//! AppState holds the engine and status store shared by the CLI commands and
//! the REST API. The engine is generic over its transport; AppState picks the
//! reqwest transport, or the in-process echo transport in mock mode.

use std::sync::Arc;
use std::time::Duration;

use atelier_core::service::ServiceInvoker;
use atelier_core::service::health::CircuitBreakers;
use atelier_core::service::registry::ServiceRegistry;
use atelier_core::service::stub::InProcessInvoker;
use atelier_core::workflow::executor::WorkflowEngine;
use atelier_core::workflow::status_store::StatusStore;
use atelier_infra::http_invoker::HttpServiceInvoker;
use atelier_infra::templates::build_template_registry;
use atelier_types::config::OrchestratorConfig;

/// Connection setup bound for outbound service calls.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    /// Same store the engine writes to; the server runs its expiry sweeper.
    pub store: Arc<StatusStore>,
}

impl AppState {
    /// Build registries, breakers and the store from `config`.
    ///
    /// With `mock`, services are answered in-process instead of over HTTP.
    pub fn init(config: OrchestratorConfig, mock: bool) -> anyhow::Result<Self> {
        let invoker: Arc<dyn ServiceInvoker> = if mock {
            tracing::info!("mock mode: services are answered in-process");
            Arc::new(InProcessInvoker::echo())
        } else {
            Arc::new(HttpServiceInvoker::new(CONNECT_TIMEOUT)?)
        };
        Self::with_invoker(config, invoker)
    }

    /// Build the state around an explicit transport.
    pub fn with_invoker(
        config: OrchestratorConfig,
        invoker: Arc<dyn ServiceInvoker>,
    ) -> anyhow::Result<Self> {
        let services = ServiceRegistry::new(config.services.clone());
        let templates = build_template_registry(&services, config.templates_dir.as_deref())?;
        let breakers = CircuitBreakers::for_registry(config.circuit_breaker, &services);
        let store = Arc::new(StatusStore::new(config.status_store.clone()));

        let engine = WorkflowEngine::new(
            Arc::new(templates),
            Arc::new(services),
            invoker,
            Arc::new(breakers),
            Arc::clone(&store),
            config.engine.clone(),
        );

        Ok(Self {
            engine: Arc::new(engine),
            store,
        })
    }
}
