//! Prospect Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! Building blocks for calling a shared, fragile, rate-sensitive dependency
//! from many concurrent workers:
//!
//! - **Rate Limiter**: Sliding-window admission control
//! - **Circuit Breaker**: Fails fast while the dependency is unhealthy, probes after a cooldown
//! - **Retrying Executor**: Rate limit + breaker + exponential backoff around one unit of work
//! - **Task Outcome**: The single record every unit of work produces
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of what the work does.
//! Callers bring their own error type and describe it through [`Classify`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Worker                          │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retrying Executor                 │  ← Bounded retries, backoff
//! └─────────────┬───────────────────────────┘
//!               │ each attempt
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Rate Limiter                      │  ← Rolling-window quota
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!         Fragile dependency
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use prospect_core_resilience::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let executor = RetryingExecutor::new(RetryPolicy::default())
//!     .with_rate_limiter(Arc::new(RateLimiter::per_minute(30)))
//!     .with_circuit_breaker(CircuitBreaker::new(CircuitBreakerConfig {
//!         failure_threshold: 5,
//!         timeout: Duration::from_secs(60),
//!     }));
//!
//! let outcome = executor
//!     .execute("item-42", || async { Ok::<_, ResilienceError>(42) })
//!     .await;
//! assert!(outcome.succeeded());
//! # }
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod outcome;
pub mod rate_limiter;
pub mod retry;

// Re-export main types for convenience
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{Cancelled, CircuitOpen, Classify, ResilienceError, TaskPanicked};
pub use outcome::TaskOutcome;
pub use rate_limiter::{Admission, RateLimiter};
pub use retry::{RetryPolicy, RetryingExecutor};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use prospect_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::error::{Classify, ResilienceError};
    pub use super::outcome::TaskOutcome;
    pub use super::rate_limiter::RateLimiter;
    pub use super::retry::{RetryPolicy, RetryingExecutor};
}
