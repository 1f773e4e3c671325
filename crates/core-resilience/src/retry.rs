//! Retrying executor: rate-limit admission, breaker protection and
//! exponential backoff around a single unit of work

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{Cancelled, CircuitOpen, Classify};
use crate::outcome::TaskOutcome;
use crate::rate_limiter::RateLimiter;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How many times to retry and how long to wait between attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Delay before the first retry; doubles each retry
    pub base_backoff: Duration,
    /// Upper bound on a single delay
    pub max_backoff: Duration,
    /// Random extra delay as a fraction of the computed delay (0.0 = none)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after the attempt with zero-based index `attempt_index` failed
    ///
    /// `base_backoff * 2^attempt_index`, capped at `max_backoff`, plus jitter.
    pub fn backoff(&self, attempt_index: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt_index.min(31));
        let delay = self
            .base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);

        if self.jitter > 0.0 {
            let extra = rand::rng().random_range(0.0..=self.jitter);
            delay + delay.mul_f64(extra)
        } else {
            delay
        }
    }
}

/// Runs work with rate limiting, circuit breaking and bounded retries
///
/// Every call to [`execute`](Self::execute) produces exactly one
/// [`TaskOutcome`]; failures are captured, never propagated.
#[derive(Debug, Clone, Default)]
pub struct RetryingExecutor {
    policy: RetryPolicy,
    limiter: Option<Arc<RateLimiter>>,
    breaker: Option<CircuitBreaker>,
    cancel: Option<CancellationToken>,
}

impl RetryingExecutor {
    /// Create an executor with only a retry policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Gate every attempt on a shared rate limiter
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Run every attempt through a shared circuit breaker
    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Stop scheduling new attempts once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Get the retry policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Get the shared circuit breaker, if any
    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.breaker.as_ref()
    }

    /// Execute `work` up to `max_retries + 1` times
    ///
    /// Before each attempt the executor waits for rate-limit admission, then
    /// calls through the circuit breaker. Non-retryable errors end the loop at
    /// once. Cancellation is cooperative: an attempt already running finishes,
    /// but no further attempt starts.
    pub async fn execute<F, Fut, T, E>(
        &self,
        label: impl Into<String>,
        mut work: F,
    ) -> TaskOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display + From<CircuitOpen> + From<Cancelled>,
    {
        let label = label.into();
        let start = Instant::now();
        let mut attempts: u32 = 0;
        let mut last_error: Option<E> = None;

        loop {
            if self.is_cancelled() {
                let error = last_error.unwrap_or_else(|| E::from(Cancelled));
                return TaskOutcome::new(label, Err(error), start.elapsed(), attempts);
            }

            if let Some(limiter) = &self.limiter {
                if !self.wait_or_cancel(limiter.acquire()).await {
                    let error = last_error.unwrap_or_else(|| E::from(Cancelled));
                    return TaskOutcome::new(label, Err(error), start.elapsed(), attempts);
                }
            }

            let result = match &self.breaker {
                Some(breaker) => breaker.call(|| work()).await,
                None => work().await,
            };
            attempts += 1;

            let error = match result {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::debug!(task = %label, attempts, "succeeded after retry");
                    }
                    return TaskOutcome::new(label, Ok(value), start.elapsed(), attempts);
                }
                Err(e) => e,
            };

            if !error.is_retryable() || attempts > self.policy.max_retries {
                tracing::warn!(
                    task = %label,
                    attempts,
                    error = %error,
                    "giving up"
                );
                return TaskOutcome::new(label, Err(error), start.elapsed(), attempts);
            }

            let delay = self.policy.backoff(attempts - 1);
            tracing::warn!(
                task = %label,
                attempt = attempts,
                max_attempts = self.policy.max_retries + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying"
            );
            last_error = Some(error);

            if !self.wait_or_cancel(tokio::time::sleep(delay)).await {
                let error = last_error.unwrap_or_else(|| E::from(Cancelled));
                return TaskOutcome::new(label, Err(error), start.elapsed(), attempts);
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Await `fut` unless cancellation fires first; false when cancelled
    ///
    /// Cancellation is polled first, so an already-cancelled token wins even
    /// when `fut` is ready immediately.
    async fn wait_or_cancel<Fut: Future>(&self, fut: Fut) -> bool {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => false,
                _ = fut => true,
            },
            None => {
                fut.await;
                true
            }
        }
    }
}
