//! Error types and failure classification for the resilience primitives

use thiserror::Error;

/// Classification hooks used by the retrying executor and circuit breaker
///
/// Callers bring their own error type; the primitives only need to know
/// whether a failure is worth another attempt and whether it says anything
/// about the health of the protected dependency.
pub trait Classify {
    /// Whether another attempt may succeed
    fn is_retryable(&self) -> bool;

    /// Whether this failure counts against the circuit breaker
    fn trips_breaker(&self) -> bool;
}

/// Returned by the circuit breaker while it is rejecting calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit breaker is open, rejecting calls")]
pub struct CircuitOpen;

/// A unit of work panicked instead of returning
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task panicked: {0}")]
pub struct TaskPanicked(pub String);

impl TaskPanicked {
    /// Build from a panic payload captured by `catch_unwind`
    pub fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self(message)
    }
}

/// Work was never attempted, or stopped retrying, because of cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cancelled before completion")]
pub struct Cancelled;

/// General-purpose error for callers without a domain error type
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    /// Circuit breaker is open, rejecting requests
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),

    /// Transient error that may be retried
    #[error("transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("permanent error: {0}")]
    Permanent(String),

    /// The work panicked
    #[error(transparent)]
    Panicked(#[from] TaskPanicked),

    /// The work was cancelled
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl Classify for ResilienceError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResilienceError::Transient(_) | ResilienceError::CircuitOpen(_)
        )
    }

    fn trips_breaker(&self) -> bool {
        matches!(self, ResilienceError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transient = ResilienceError::Transient("network error".to_string());
        assert!(transient.is_retryable());
        assert!(transient.trips_breaker());

        let permanent = ResilienceError::Permanent("bad input".to_string());
        assert!(!permanent.is_retryable());
        assert!(!permanent.trips_breaker());

        let open = ResilienceError::from(CircuitOpen);
        assert!(open.is_retryable());
        assert!(!open.trips_breaker());

        let cancelled = ResilienceError::from(Cancelled);
        assert!(!cancelled.is_retryable());
    }

    #[test]
    fn test_panic_payload_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(TaskPanicked::from_payload(payload).0, "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(TaskPanicked::from_payload(payload).0, "owned boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(TaskPanicked::from_payload(payload).0, "unknown panic payload");
    }
}
