//! Retry decisions and exponential backoff for step attempts.

use std::time::Duration;

use atelier_types::workflow::RetryPolicy;

use crate::service::StepError;

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

/// Stateless retry handler for step failures.
///
/// No internal state; all logic is in associated functions that take the
/// effective policy as a parameter.
pub struct RetryHandler;

impl RetryHandler {
    /// Determine whether another attempt should be made.
    ///
    /// `attempt` is 1-based (first execution is attempt 1). Errors that a new
    /// attempt cannot fix (unknown service, invalid input) are never retried.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32, error: &StepError) -> bool {
        error.is_retryable() && attempt < policy.max_attempts
    }

    /// Delay to wait after failed attempt `attempt` (1-based):
    /// `min(backoff_base_ms * 2^(attempt - 1), max_backoff_ms)`.
    pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let millis = policy
            .backoff_base_ms
            .saturating_mul(factor)
            .min(policy.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
