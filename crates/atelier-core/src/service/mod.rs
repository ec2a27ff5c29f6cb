//! Service invocation port.
//!
//! Every downstream AI service is an opaque JSON-over-HTTP collaborator. The
//! engine only needs one capability from it: send `(url, method, body,
//! timeout)` and get back `(status, body)`. [`ServiceInvoker`] is that
//! capability; `atelier-infra` provides the HTTP implementation and
//! [`stub::InProcessInvoker`] serves tests and mock mode.

pub mod health;
pub mod registry;
pub mod stub;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use atelier_types::workflow::{HttpMethod, StepErrorDetail, StepErrorKind};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// Outbound call to a target service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    /// Logical service name (for logging and circuit breaking).
    pub service: String,
    /// Fully resolved URL.
    pub url: String,
    pub method: HttpMethod,
    pub body: Value,
    /// Per-attempt timeout the transport must honour.
    pub timeout: Duration,
}

/// Raw response from a target service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: Value,
}

impl ServiceResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Failure of a single step attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    /// The call did not complete within its per-attempt timeout.
    #[error("request to '{service}' timed out after {after_ms}ms")]
    Timeout { service: String, after_ms: u64 },

    /// Transport-level failure (DNS, refused connection, broken body).
    #[error("connection to '{service}' failed: {message}")]
    Connection { service: String, message: String },

    /// The service answered with a non-2xx status.
    #[error("'{service}' responded with HTTP {status}")]
    Status {
        service: String,
        status: u16,
        body: Value,
    },

    /// The service's circuit breaker rejected the attempt without a call.
    #[error("circuit open for '{service}'")]
    CircuitOpen { service: String },

    /// The step names a service that is not in the registry.
    #[error("unknown service '{0}'")]
    UnknownService(String),

    /// The request body could not be built from the input mapping.
    #[error("invalid step input: {0}")]
    InvalidInput(String),
}

impl StepError {
    /// Errors that another attempt cannot fix are not retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StepError::UnknownService(_) | StepError::InvalidInput(_))
    }

    /// Whether this failure reflects on the health of the target service.
    pub fn counts_against_service(&self) -> bool {
        matches!(
            self,
            StepError::Timeout { .. } | StepError::Connection { .. } | StepError::Status { .. }
        )
    }

    pub fn kind(&self) -> StepErrorKind {
        match self {
            StepError::Timeout { .. } => StepErrorKind::Timeout,
            StepError::Connection { .. } => StepErrorKind::Connection,
            StepError::Status { .. } => StepErrorKind::HttpStatus,
            StepError::CircuitOpen { .. } => StepErrorKind::CircuitOpen,
            StepError::UnknownService(_) => StepErrorKind::UnknownService,
            StepError::InvalidInput(_) => StepErrorKind::InvalidInput,
        }
    }

    /// Convert to the serializable detail stored on a `StepResult`.
    pub fn to_detail(&self) -> StepErrorDetail {
        StepErrorDetail {
            kind: self.kind(),
            message: self.to_string(),
            status_code: match self {
                StepError::Status { status, .. } => Some(*status),
                _ => None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceInvoker
// ---------------------------------------------------------------------------

/// Boxed future returned by [`ServiceInvoker::invoke`].
pub type InvokeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ServiceResponse, StepError>> + Send + 'a>>;

/// Transport used by the engine to reach target services.
///
/// Returns `Ok` for any response that arrived, whatever its status; the
/// engine decides what counts as a failure. Object-safe so the engine can hold
/// an `Arc<dyn ServiceInvoker>`.
pub trait ServiceInvoker: Send + Sync {
    fn invoke(&self, request: ServiceRequest) -> InvokeFuture<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_error_display() {
        let err = StepError::Status {
            service: "nlu".to_string(),
            status: 503,
            body: json!({}),
        };
        assert_eq!(err.to_string(), "'nlu' responded with HTTP 503");

        let err = StepError::CircuitOpen {
            service: "style_profile".to_string(),
        };
        assert!(err.to_string().contains("circuit open"));
    }

    #[test]
    fn retryable_classification() {
        assert!(StepError::Timeout { service: "a".into(), after_ms: 10 }.is_retryable());
        assert!(StepError::CircuitOpen { service: "a".into() }.is_retryable());
        assert!(!StepError::InvalidInput("bad".into()).is_retryable());
        assert!(!StepError::UnknownService("x".into()).is_retryable());
    }

    #[test]
    fn circuit_open_does_not_count_against_service() {
        assert!(!StepError::CircuitOpen { service: "a".into() }.counts_against_service());
        assert!(StepError::Connection { service: "a".into(), message: "refused".into() }
            .counts_against_service());
    }

    #[test]
    fn detail_carries_status_code() {
        let detail = StepError::Status {
            service: "nlu".into(),
            status: 502,
            body: Value::Null,
        }
        .to_detail();
        assert_eq!(detail.kind, StepErrorKind::HttpStatus);
        assert_eq!(detail.status_code, Some(502));

        let detail = StepError::Timeout { service: "nlu".into(), after_ms: 5 }.to_detail();
        assert_eq!(detail.kind, StepErrorKind::Timeout);
        assert!(detail.status_code.is_none());
    }

    #[test]
    fn response_success_range() {
        assert!(ServiceResponse::ok(Value::Null).is_success());
        assert!(ServiceResponse { status: 204, body: Value::Null }.is_success());
        assert!(!ServiceResponse { status: 500, body: Value::Null }.is_success());
        assert!(!ServiceResponse { status: 302, body: Value::Null }.is_success());
    }
}
