//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker stops callers from hammering a dependency that has
//! started failing. It has three states:
//! - Closed: Normal operation, calls pass through
//! - Open: Dependency is unhealthy, calls fail immediately with [`CircuitOpen`]
//! - HalfOpen: Cooldown elapsed, exactly one probe call is let through
//!
//! The state lives behind one lock that is only held for bookkeeping. The
//! protected work runs outside the lock, so concurrent callers are never
//! serialized by the breaker itself.

use crate::clock::{system_clock, SharedClock};
use crate::error::{CircuitOpen, Classify};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through normally
    Closed,
    /// Circuit is open, calls fail immediately
    Open,
    /// Circuit is half-open, one probe decides the next state
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: usize,
    /// How long the circuit stays open before allowing a probe
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Kind of admission granted to a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Probe,
}

/// Circuit breaker for protecting a shared, fragile dependency
///
/// # Example
/// ```no_run
/// use prospect_core_resilience::{CircuitBreaker, CircuitBreakerConfig, ResilienceError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), ResilienceError> {
///     let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
///
///     let result = breaker
///         .call(|| async { Ok::<_, ResilienceError>(42) })
///         .await?;
///
///     println!("Result: {}", result);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    clock: SharedClock,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            clock: system_clock(),
            state: Arc::new(Mutex::new(BreakerState::new())),
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Use a different time source
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Get the current state of the circuit breaker
    ///
    /// An open circuit whose timeout has elapsed still reports `Open` until
    /// the next call promotes it to `HalfOpen`.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Get current consecutive failure count
    pub fn failure_count(&self) -> usize {
        self.lock().consecutive_failures
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        *self.lock() = BreakerState::new();
    }

    /// Execute `work` under circuit breaker protection
    ///
    /// While open (and before the timeout elapses) this fails with
    /// [`CircuitOpen`] without invoking `work`.
    pub async fn call<F, Fut, T, E>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + From<CircuitOpen>,
    {
        let permit = self.admit().map_err(E::from)?;
        let mut guard = ProbeGuard {
            breaker: self,
            armed: permit == Permit::Probe,
        };

        let result = work().await;
        guard.armed = false;

        match &result {
            Err(e) if e.trips_breaker() => self.on_failure(permit),
            // The dependency answered, even if the caller did not like the answer
            _ => self.on_success(permit),
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check circuit state and update if necessary
    fn admit(&self) -> Result<Permit, CircuitOpen> {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => Ok(Permit::Normal),
            CircuitState::Open => {
                let cooled = state
                    .opened_at
                    .map(|at| self.clock.now().saturating_duration_since(at) >= self.config.timeout)
                    .unwrap_or(true);
                if cooled {
                    state.state = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    tracing::info!("circuit breaker: open -> half-open");
                    Ok(Permit::Probe)
                } else {
                    Err(CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    Err(CircuitOpen)
                } else {
                    state.probe_in_flight = true;
                    Ok(Permit::Probe)
                }
            }
        }
    }

    /// Handle successful operation
    fn on_success(&self, permit: Permit) {
        let mut state = self.lock();

        match (state.state, permit) {
            (CircuitState::Closed, _) => {
                state.consecutive_failures = 0;
            }
            (CircuitState::HalfOpen, Permit::Probe) => {
                state.state = CircuitState::Closed;
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.probe_in_flight = false;
                tracing::info!("circuit breaker: half-open -> closed");
            }
            // Stale result from a call admitted before the circuit opened
            _ => {}
        }
    }

    /// Handle failed operation
    fn on_failure(&self, permit: Permit) {
        let mut state = self.lock();
        let now = self.clock.now();

        match (state.state, permit) {
            (CircuitState::Closed, _) => {
                state.consecutive_failures += 1;

                if state.consecutive_failures >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.opened_at = Some(now);
                    tracing::error!(
                        failures = state.consecutive_failures,
                        "circuit breaker: closed -> open"
                    );
                }
            }
            (CircuitState::HalfOpen, Permit::Probe) => {
                state.state = CircuitState::Open;
                state.opened_at = Some(now);
                state.probe_in_flight = false;
                tracing::warn!("circuit breaker: probe failed, half-open -> open");
            }
            _ => {}
        }
    }
}

/// Releases an outstanding probe slot if the probing future is dropped
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.breaker.lock();
            if state.state == CircuitState::HalfOpen {
                state.probe_in_flight = false;
            }
        }
    }
}
