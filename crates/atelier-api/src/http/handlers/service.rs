//! Service registry endpoint.
//!
//! GET /services - Configured services with their circuit breaker health.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use atelier_types::service::ServiceHealthInfo;
use atelier_types::workflow::RetryPolicy;

use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// One registered service and its current health.
#[derive(Debug, Serialize)]
pub struct ServiceView {
    pub name: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Policy applied to steps that do not set their own.
    pub retry: RetryPolicy,
    pub health: ServiceHealthInfo,
}

/// GET /services - Registry entries in name order.
pub async fn list_services(State(state): State<AppState>) -> Json<ApiResponse<Vec<ServiceView>>> {
    let timer = RequestTimer::start();
    let engine = &state.engine;
    let health = engine.breakers().snapshot();

    let views: Vec<ServiceView> = engine
        .services()
        .iter()
        .filter_map(|svc| {
            let info = health.iter().find(|h| h.name == svc.name)?.clone();
            Some(ServiceView {
                name: svc.name.clone(),
                base_url: svc.base_url.clone(),
                timeout_secs: svc.timeout_secs,
                retry: svc.retry.unwrap_or_default(),
                health: info,
            })
        })
        .collect();

    Json(timer.finish(views).with_link("self", "/services"))
}
