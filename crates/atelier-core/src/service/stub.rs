//! In-process service transport.
//!
//! [`InProcessInvoker`] answers service calls with Rust closures instead of
//! the network. It backs the `--mock` mode of the binary (echoing requests the
//! way the prototype AI services returned placeholder data) and is the fake
//! transport used throughout the engine tests. Every call is recorded with its
//! start and finish instants so tests can assert on ordering and overlap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;

use super::{InvokeFuture, ServiceInvoker, ServiceRequest, ServiceResponse, StepError};

/// Handler answering one service.
pub type Handler =
    Arc<dyn Fn(&ServiceRequest) -> Result<ServiceResponse, StepError> + Send + Sync>;

/// One recorded call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub service: String,
    pub url: String,
    pub body: serde_json::Value,
    pub started_at: Instant,
    pub finished_at: Instant,
}

/// Transport dispatching to per-service closures.
#[derive(Default)]
pub struct InProcessInvoker {
    handlers: HashMap<String, Handler>,
    fallback: Option<Handler>,
    latency: HashMap<String, Duration>,
    records: Mutex<Vec<CallRecord>>,
}

impl InProcessInvoker {
    /// An invoker with no handlers; calls to unhandled services fail to connect.
    pub fn new() -> Self {
        Self::default()
    }

    /// An invoker answering every service with an echo of the request.
    pub fn echo() -> Self {
        let echo: Handler = Arc::new(|req: &ServiceRequest| {
            Ok(ServiceResponse::ok(json!({
                "service": req.service,
                "mock": true,
                "received": req.body,
            })))
        });
        Self {
            fallback: Some(echo),
            ..Self::default()
        }
    }

    /// Answer `service` with `handler`.
    pub fn with_handler<F>(mut self, service: &str, handler: F) -> Self
    where
        F: Fn(&ServiceRequest) -> Result<ServiceResponse, StepError> + Send + Sync + 'static,
    {
        self.handlers.insert(service.to_string(), Arc::new(handler));
        self
    }

    /// Delay every answer from `service` by `latency`.
    pub fn with_latency(mut self, service: &str, latency: Duration) -> Self {
        self.latency.insert(service.to_string(), latency);
        self
    }

    /// Number of calls that reached `service`.
    pub fn calls(&self, service: &str) -> usize {
        self.records().iter().filter(|r| r.service == service).count()
    }

    pub fn total_calls(&self) -> usize {
        self.records().len()
    }

    /// All completed calls in completion order.
    pub fn records(&self) -> Vec<CallRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, record: CallRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

impl ServiceInvoker for InProcessInvoker {
    fn invoke(&self, request: ServiceRequest) -> InvokeFuture<'_> {
        Box::pin(async move {
            let started_at = Instant::now();
            if let Some(latency) = self.latency.get(&request.service) {
                tokio::time::sleep(*latency).await;
            }

            let handler = self
                .handlers
                .get(&request.service)
                .or(self.fallback.as_ref());
            let result = match handler {
                Some(handler) => handler(&request),
                None => Err(StepError::Connection {
                    service: request.service.clone(),
                    message: "no in-process handler registered".to_string(),
                }),
            };

            self.record(CallRecord {
                service: request.service.clone(),
                url: request.url.clone(),
                body: request.body.clone(),
                started_at,
                finished_at: Instant::now(),
            });
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_types::workflow::HttpMethod;

    fn request(service: &str) -> ServiceRequest {
        ServiceRequest {
            service: service.to_string(),
            url: format!("http://{service}"),
            method: HttpMethod::Post,
            body: json!({"hello": "world"}),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn echo_returns_request_body() {
        let invoker = InProcessInvoker::echo();
        let resp = invoker.invoke(request("nlu")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["received"]["hello"], "world");
        assert_eq!(resp.body["service"], "nlu");
        assert_eq!(invoker.calls("nlu"), 1);
    }

    #[tokio::test]
    async fn handler_takes_precedence_over_fallback() {
        let invoker = InProcessInvoker::echo().with_handler("nlu", |_| {
            Ok(ServiceResponse {
                status: 503,
                body: json!({"error": "overloaded"}),
            })
        });
        let resp = invoker.invoke(request("nlu")).await.unwrap();
        assert_eq!(resp.status, 503);
        let resp = invoker.invoke(request("style_profile")).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(invoker.total_calls(), 2);
    }

    #[tokio::test]
    async fn unhandled_service_fails_to_connect() {
        let invoker = InProcessInvoker::new();
        let err = invoker.invoke(request("nlu")).await.unwrap_err();
        assert!(matches!(err, StepError::Connection { .. }));
        assert_eq!(invoker.calls("nlu"), 1);
    }

    #[tokio::test]
    async fn latency_is_applied() {
        let invoker = InProcessInvoker::echo().with_latency("nlu", Duration::from_millis(30));
        invoker.invoke(request("nlu")).await.unwrap();
        let record = &invoker.records()[0];
        assert!(record.finished_at - record.started_at >= Duration::from_millis(30));
    }
}
