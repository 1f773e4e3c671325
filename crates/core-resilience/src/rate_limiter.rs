//! Rate limiting for protecting rate-sensitive services
//!
//! Sliding-window admission control: the limiter remembers when each recent
//! admission happened and admits a new call only while fewer than
//! `max_requests` admissions fall inside the rolling window.

use crate::clock::{system_clock, SharedClock};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Default rolling window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default slack added on top of a computed wait
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(1);

/// Decision returned by [`RateLimiter::allow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted; the admission has been recorded
    Proceed,
    /// Not admitted; try again after this long
    Wait(Duration),
}

/// Sliding-window rate limiter
///
/// # Example
/// ```no_run
/// use prospect_core_resilience::RateLimiter;
///
/// #[tokio::main]
/// async fn main() {
///     // 30 calls per rolling minute
///     let limiter = RateLimiter::per_minute(30);
///
///     limiter.acquire().await;
///     // ... call the rate-limited service
/// }
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum admissions per window
    max_requests: usize,
    /// Length of the rolling window
    window: Duration,
    /// Added to every computed wait
    safety_margin: Duration,
    clock: SharedClock,
    admissions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `max_requests` - Maximum admissions in any rolling `window` (clamped to at least 1)
    /// * `window` - Length of the rolling window
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            clock: system_clock(),
            admissions: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Create a rate limiter with admissions per rolling minute
    pub fn per_minute(requests_per_minute: usize) -> Self {
        Self::new(requests_per_minute, DEFAULT_WINDOW)
    }

    /// Use a different time source
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Override the slack added to computed waits
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Decide whether a call may proceed now
    ///
    /// Expired admissions are discarded first. On `Proceed` the admission is
    /// recorded; on `Wait` nothing is recorded.
    pub fn allow(&self) -> Admission {
        let now = self.clock.now();
        let mut admissions = self.admissions.lock().unwrap_or_else(PoisonError::into_inner);

        while let Some(&oldest) = admissions.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                admissions.pop_front();
            } else {
                break;
            }
        }

        if admissions.len() < self.max_requests {
            admissions.push_back(now);
            return Admission::Proceed;
        }

        // Full window: wait until the oldest admission slides out
        let oldest = admissions.front().copied().unwrap_or(now);
        let expires_in = self
            .window
            .saturating_sub(now.saturating_duration_since(oldest));
        Admission::Wait(expires_in + self.safety_margin)
    }

    /// Wait until admitted, returning the total time spent waiting
    ///
    /// The lock is only held inside [`allow`](Self::allow); sleeping happens
    /// outside it, so other callers are never blocked by a waiting one.
    pub async fn acquire(&self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            match self.allow() {
                Admission::Proceed => return waited,
                Admission::Wait(delay) => {
                    tracing::warn!(
                        wait_ms = delay.as_millis() as u64,
                        limit = self.max_requests,
                        "rate limit reached, waiting"
                    );
                    tokio::time::sleep(delay).await;
                    waited += delay;
                }
            }
        }
    }

    /// Admissions currently inside the window (including expired ones not yet pruned)
    pub fn in_window(&self) -> usize {
        self.admissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Get the maximum admissions per window
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Get the rolling window length
    pub fn window(&self) -> Duration {
        self.window
    }
}
