//! JSON-over-HTTP transport to the downstream AI services.
//!
//! [`HttpServiceInvoker`] implements the [`ServiceInvoker`] port from
//! atelier-core with a shared `reqwest::Client`. Any response that arrives is
//! returned as-is (status + body); only transport failures become errors.

use std::time::Duration;

use atelier_core::service::{
    InvokeFuture, ServiceInvoker, ServiceRequest, ServiceResponse, StepError,
};
use atelier_types::workflow::HttpMethod;
use serde_json::Value;

/// Real transport used by `atelier serve` and `atelier run` without `--mock`.
pub struct HttpServiceInvoker {
    client: reqwest::Client,
}

impl HttpServiceInvoker {
    /// Build the shared client. Per-request timeouts come from each
    /// `ServiceRequest`; `connect_timeout` bounds connection setup.
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("atelier-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn map_error(service: &str, timeout: Duration, err: reqwest::Error) -> StepError {
    if err.is_timeout() {
        StepError::Timeout {
            service: service.to_string(),
            after_ms: timeout.as_millis() as u64,
        }
    } else {
        StepError::Connection {
            service: service.to_string(),
            message: err.to_string(),
        }
    }
}

impl ServiceInvoker for HttpServiceInvoker {
    fn invoke(&self, request: ServiceRequest) -> InvokeFuture<'_> {
        Box::pin(async move {
            let ServiceRequest {
                service,
                url,
                method,
                body,
                timeout,
            } = request;

            let mut builder = self
                .client
                .request(to_reqwest_method(method), &url)
                .timeout(timeout);
            if !matches!(method, HttpMethod::Get | HttpMethod::Delete) {
                builder = builder.json(&body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| map_error(&service, timeout, e))?;
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| map_error(&service, timeout, e))?;

            // Non-JSON bodies (plain-text errors from proxies) are kept as strings.
            let body = if text.is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            };

            tracing::debug!(
                service = service.as_str(),
                url = url.as_str(),
                method = %method,
                status,
                "service responded"
            );
            Ok(ServiceResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use serde_json::json;

    /// Spawn a throwaway service and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request(service: &str, url: String, method: HttpMethod, timeout: Duration) -> ServiceRequest {
        ServiceRequest {
            service: service.to_string(),
            url,
            method,
            body: json!({"context": {"user_id": "u-1"}}),
            timeout,
        }
    }

    fn invoker() -> HttpServiceInvoker {
        HttpServiceInvoker::new(Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn posts_json_and_parses_response() {
        let base = serve(Router::new().route(
            "/analyze",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"echo": body, "colors": ["navy"]}))
            }),
        ))
        .await;

        let resp = invoker()
            .invoke(request(
                "image_processing",
                format!("{base}/analyze"),
                HttpMethod::Post,
                Duration::from_secs(2),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["echo"]["context"]["user_id"], "u-1");
        assert_eq!(resp.body["colors"][0], "navy");
    }

    #[tokio::test]
    async fn error_status_is_returned_not_raised() {
        let base = serve(Router::new().route(
            "/profile",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        ))
        .await;

        let resp = invoker()
            .invoke(request(
                "style_profile",
                format!("{base}/profile"),
                HttpMethod::Get,
                Duration::from_secs(2),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status, 503);
        assert_eq!(resp.body, Value::String("overloaded".to_string()));
        assert!(!resp.is_success());
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let base = serve(Router::new().route(
            "/slow",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!({}))
            }),
        ))
        .await;

        let err = invoker()
            .invoke(request(
                "nlu",
                format!("{base}/slow"),
                HttpMethod::Post,
                Duration::from_millis(50),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Timeout { after_ms: 50, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_connection_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = invoker()
            .invoke(request(
                "feedback_loop",
                format!("http://{addr}/feedback"),
                HttpMethod::Post,
                Duration::from_secs(1),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Connection { .. }), "got {err:?}");
    }
}
