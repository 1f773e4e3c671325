/*!
 * Configuration types for Prospect
 */

use crate::error::{Result, ScanError};
use prospect_core_resilience::{CircuitBreakerConfig, RateLimiter, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration shared by every scan a [`Scanner`](crate::scan::handle::Scanner) starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Retries after the first attempt for discovery and analysis tasks
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base retry delay in milliseconds (doubles per retry)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single retry delay in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Random extra delay as a fraction of each retry delay (0.0 = none)
    #[serde(default)]
    pub retry_jitter: f64,

    /// Maximum downstream calls per rolling minute (0 = unlimited)
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,

    /// Slack added to rate-limit waits in milliseconds
    #[serde(default = "default_rate_limit_margin_ms")]
    pub rate_limit_margin_ms: u64,

    /// Protect the downstream with a circuit breaker
    #[serde(default = "default_true")]
    pub circuit_breaker_enabled: bool,

    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// Seconds the breaker stays open before probing
    #[serde(default = "default_circuit_timeout_secs")]
    pub circuit_timeout_secs: u64,

    /// Default discovery pool size
    #[serde(default = "default_discovery_concurrency")]
    pub discovery_concurrency: usize,

    /// Default analysis pool size
    #[serde(default = "default_analysis_concurrency")]
    pub analysis_concurrency: usize,

    /// Default cap on candidates taken from each source
    #[serde(default = "default_max_items_per_source")]
    pub max_items_per_source: usize,

    /// Log entries kept for `recent_logs` before the oldest are evicted
    #[serde(default = "default_log_buffer_capacity")]
    pub log_buffer_capacity: usize,

    /// Emit a progress log line every N completed items (0 = never)
    #[serde(default = "default_progress_log_interval")]
    pub progress_log_interval: usize,

    /// Seconds to wait for outstanding notifications when a scan ends
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,

    /// Analyse an identifier once even if several sources report it
    #[serde(default = "default_true")]
    pub dedupe_candidates: bool,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_jitter: 0.0,
            rate_limit_per_minute: default_rate_limit_per_minute(),
            rate_limit_margin_ms: default_rate_limit_margin_ms(),
            circuit_breaker_enabled: true,
            failure_threshold: default_failure_threshold(),
            circuit_timeout_secs: default_circuit_timeout_secs(),
            discovery_concurrency: default_discovery_concurrency(),
            analysis_concurrency: default_analysis_concurrency(),
            max_items_per_source: default_max_items_per_source(),
            log_buffer_capacity: default_log_buffer_capacity(),
            progress_log_interval: default_progress_log_interval(),
            notify_timeout_secs: default_notify_timeout_secs(),
            dedupe_candidates: true,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    2_000
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_rate_limit_per_minute() -> u32 {
    30
}

fn default_rate_limit_margin_ms() -> u64 {
    1_000
}

fn default_failure_threshold() -> usize {
    5
}

fn default_circuit_timeout_secs() -> u64 {
    60
}

fn default_discovery_concurrency() -> usize {
    5
}

fn default_analysis_concurrency() -> usize {
    20
}

fn default_max_items_per_source() -> usize {
    10
}

fn default_log_buffer_capacity() -> usize {
    1_000
}

fn default_progress_log_interval() -> usize {
    10
}

fn default_notify_timeout_secs() -> u64 {
    10
}

impl ScannerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ScannerConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ScanError::Config(e.to_string()))
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(ScanError::Config(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ScanError::Config(format!(
                "retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(ScanError::Config(format!(
                "retry_jitter must be within 0.0..=1.0, got {}",
                self.retry_jitter
            )));
        }
        if self.log_buffer_capacity == 0 {
            return Err(ScanError::Config(
                "log_buffer_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry policy for discovery and analysis tasks
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_backoff: Duration::from_millis(self.retry_base_delay_ms),
            max_backoff: Duration::from_millis(self.retry_max_delay_ms),
            jitter: self.retry_jitter,
        }
    }

    /// Circuit breaker settings, or None when disabled
    pub fn circuit_breaker_config(&self) -> Option<CircuitBreakerConfig> {
        self.circuit_breaker_enabled.then(|| CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: Duration::from_secs(self.circuit_timeout_secs),
        })
    }

    /// Rate limiter for downstream calls, or None when unlimited
    pub fn rate_limiter(&self) -> Option<RateLimiter> {
        (self.rate_limit_per_minute > 0).then(|| {
            RateLimiter::per_minute(self.rate_limit_per_minute as usize)
                .with_safety_margin(Duration::from_millis(self.rate_limit_margin_ms))
        })
    }

    /// How long to wait for outstanding notifications
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}
