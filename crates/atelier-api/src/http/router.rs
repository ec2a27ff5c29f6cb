//! Axum router configuration with middleware.
//!
//! Routes are mounted at the root, the way the AI services expose theirs.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Execution
        .route("/workflows/execute", post(handlers::workflow::execute_workflow))
        .route(
            "/workflows/execute/async",
            post(handlers::workflow::execute_workflow_async),
        )
        // Instances
        .route("/workflows", get(handlers::workflow::list_workflows))
        .route(
            "/workflows/{id}/status",
            get(handlers::workflow::get_workflow_status),
        )
        .route("/workflows/{id}", delete(handlers::workflow::cancel_workflow))
        .route("/workflows/analytics", get(handlers::workflow::get_analytics))
        // Templates
        .route("/workflows/templates", get(handlers::workflow::list_templates))
        // Services
        .route("/services", get(handlers::service::list_services))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple liveness endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "service": "orchestrator",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use atelier_core::service::stub::InProcessInvoker;
    use atelier_core::service::{ServiceRequest, ServiceResponse};
    use atelier_types::config::OrchestratorConfig;

    use super::*;

    fn state_with(invoker: InProcessInvoker) -> AppState {
        AppState::with_invoker(OrchestratorConfig::default(), Arc::new(invoker)).unwrap()
    }

    fn state() -> AppState {
        state_with(InProcessInvoker::echo())
    }

    async fn send(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn analysis_request() -> Value {
        json!({
            "template_name": "complete_style_analysis",
            "context": {"user_id": "u-42", "image_url": "s3://outfits/1.jpg", "query": "summer wedding"}
        })
    }

    async fn wait_until_idle(state: &AppState, id: uuid::Uuid) {
        for _ in 0..200 {
            if !state.engine.is_active(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("workflow {id} did not finish");
    }

    #[tokio::test]
    async fn health_check_ok() {
        let (status, body) = send(&state(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn execute_returns_aggregate() {
        let state = state();
        let (status, body) =
            send(&state, "POST", "/workflows/execute", Some(analysis_request())).await;

        assert_eq!(status, StatusCode::OK);
        let data = &body["data"];
        assert_eq!(data["status"], "success");
        assert_eq!(data["template_name"], "complete_style_analysis");
        assert_eq!(data["results"].as_object().unwrap().len(), 5);
        assert_eq!(data["results"]["image"]["output"]["received"]["user_id"], "u-42");
        assert!(data["degraded"].as_array().unwrap().is_empty());
        assert!(body["_links"]["status"].as_str().unwrap().starts_with("/workflows/"));
    }

    #[tokio::test]
    async fn optional_failure_is_partial_success_with_200() {
        let invoker = InProcessInvoker::echo().with_handler(
            "recommendation_engine",
            |_: &ServiceRequest| Ok(ServiceResponse { status: 503, body: Value::Null }),
        );
        let state = state_with(invoker);
        let (status, body) =
            send(&state, "POST", "/workflows/execute", Some(analysis_request())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "partial_success");
        assert_eq!(body["data"]["degraded"], json!(["recommend"]));
        assert_eq!(body["data"]["results"]["recommend"]["attempts"], 2);
        assert_eq!(body["data"]["results"]["recommend"]["error"]["status_code"], 503);
    }

    #[tokio::test]
    async fn unknown_template_is_404_without_instance() {
        let state = state();
        let (status, body) = send(
            &state,
            "POST",
            "/workflows/execute",
            Some(json!({"template_name": "does_not_exist", "context": {}})),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "TEMPLATE_NOT_FOUND");
        assert!(state.store.is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let state = state();
        let (status, body) =
            send(&state, "POST", "/workflows/execute", Some(json!({"context": {}}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
        assert!(state.store.is_empty());
    }

    #[tokio::test]
    async fn async_execution_can_be_polled() {
        let state = state();
        let (status, body) = send(
            &state,
            "POST",
            "/workflows/execute/async",
            Some(json!({"template_name": "feedback_processing", "context": {"user_id": "u-1", "item_id": "i-9", "rating": 4}})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id: uuid::Uuid = body["data"]["workflow_id"].as_str().unwrap().parse().unwrap();

        wait_until_idle(&state, id).await;
        let (status, body) = send(&state, "GET", &format!("/workflows/{id}/status"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "success");
        assert_eq!(body["data"]["steps"]["feedback"]["output"]["received"]["rating"], 4);
    }

    #[tokio::test]
    async fn cancel_stops_remaining_waves() {
        let invoker = InProcessInvoker::echo().with_latency("feedback_loop", Duration::from_millis(200));
        let state = state_with(invoker);
        let (_, body) = send(
            &state,
            "POST",
            "/workflows/execute/async",
            Some(json!({"template_name": "feedback_processing", "context": {}})),
        )
        .await;
        let id: uuid::Uuid = body["data"]["workflow_id"].as_str().unwrap().parse().unwrap();

        let (status, body) = send(&state, "DELETE", &format!("/workflows/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "cancelled");

        wait_until_idle(&state, id).await;
        let (_, body) = send(&state, "GET", &format!("/workflows/{id}/status"), None).await;
        assert_eq!(body["data"]["status"], "cancelled");
        assert_eq!(body["data"]["steps"]["profile_update"]["status"], "pending");
        assert_eq!(body["data"]["steps"]["refresh"]["status"], "pending");
    }

    #[tokio::test]
    async fn unknown_instance_is_404() {
        let state = state();
        let id = uuid::Uuid::now_v7();
        let (status, body) = send(&state, "GET", &format!("/workflows/{id}/status"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "WORKFLOW_NOT_FOUND");

        let (status, _) = send(&state, "DELETE", &format!("/workflows/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn templates_list_waves() {
        let (status, body) = send(&state(), "GET", "/workflows/templates", None).await;
        assert_eq!(status, StatusCode::OK);
        let templates = body["data"].as_array().unwrap();
        assert_eq!(templates.len(), 3);

        let feedback = templates
            .iter()
            .find(|t| t["name"] == "feedback_processing")
            .unwrap();
        assert_eq!(
            feedback["waves"],
            json!([["feedback"], ["profile_update"], ["refresh"]])
        );
        assert_eq!(feedback["steps"][0]["service"], "feedback_loop");
    }

    #[tokio::test]
    async fn list_and_analytics_reflect_runs() {
        let state = state();
        send(&state, "POST", "/workflows/execute", Some(analysis_request())).await;
        send(&state, "POST", "/workflows/execute", Some(analysis_request())).await;

        let (status, body) = send(&state, "GET", "/workflows?status=success&limit=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["template_name"], "complete_style_analysis");

        let (status, body) = send(&state, "GET", "/workflows/analytics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 2);
        assert_eq!(body["data"]["by_status"]["success"], 2);
        assert_eq!(body["data"]["templates"]["complete_style_analysis"]["runs"], 2);
    }

    #[tokio::test]
    async fn list_rejects_unknown_status() {
        let (status, body) = send(&state(), "GET", "/workflows?status=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"][0]["message"].as_str().unwrap().contains("bogus"));
    }

    #[tokio::test]
    async fn services_show_circuit_state() {
        let (status, body) = send(&state(), "GET", "/services", None).await;
        assert_eq!(status, StatusCode::OK);
        let services = body["data"].as_array().unwrap();
        assert_eq!(services.len(), 6);
        assert_eq!(services[0]["name"], "combination_engine");
        assert!(services.iter().all(|s| s["health"]["circuit_state"] == "closed"));
    }
}
