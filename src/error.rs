/*!
 * Error types for Prospect
 */

use prospect_core_resilience::{Cancelled, CircuitOpen, Classify, TaskPanicked};
use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, ScanError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug)]
pub enum ScanError {
    /// Fetching an item failed in a way that may succeed on retry
    TransientFetch { item: String, reason: String },

    /// The shared downstream dependency is cooling down
    CircuitOpen,

    /// The analyzer refused the fetched data; never retried
    PermanentAnalysis { item: String, reason: String },

    /// Persisting an accepted result failed
    Persist { item: String, reason: String },

    /// Notification dispatch failed (logged only)
    Notify(String),

    /// Enumerating a source failed
    Discovery { source: String, reason: String },

    /// Work was cancelled before it ran or before it could retry
    Cancelled,

    /// Work panicked inside a worker
    Panicked(String),

    /// Malformed scan request
    InvalidRequest(String),

    /// Configuration error
    Config(String),

    /// I/O error
    Io(io::Error),

    /// Fixture or store (de)serialization error
    Serialization(String),
}

impl ScanError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanError::InvalidRequest(_) | ScanError::Config(_) | ScanError::Serialization(_) => {
                EXIT_FATAL
            }
            _ => EXIT_PARTIAL,
        }
    }

    /// Whether the error describes a malformed input rather than a runtime failure
    pub fn is_fatal(&self) -> bool {
        self.exit_code() == EXIT_FATAL
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            ScanError::TransientFetch { .. } | ScanError::Discovery { .. } => {
                ErrorCategory::Network
            }
            ScanError::CircuitOpen => ErrorCategory::Resilience,
            ScanError::PermanentAnalysis { .. } => ErrorCategory::Analysis,
            ScanError::Persist { .. } => ErrorCategory::Storage,
            ScanError::Notify(_) => ErrorCategory::Notification,
            ScanError::Cancelled => ErrorCategory::Cancellation,
            ScanError::Panicked(_) => ErrorCategory::Concurrency,
            ScanError::InvalidRequest(_) | ScanError::Config(_) => ErrorCategory::Configuration,
            ScanError::Io(_) | ScanError::Serialization(_) => ErrorCategory::IoError,
        }
    }
}

impl Classify for ScanError {
    fn is_retryable(&self) -> bool {
        match self {
            ScanError::TransientFetch { .. }
            | ScanError::CircuitOpen
            | ScanError::Discovery { .. } => true,
            ScanError::Io(err) => is_io_transient(err),
            _ => false,
        }
    }

    fn trips_breaker(&self) -> bool {
        match self {
            ScanError::TransientFetch { .. } | ScanError::Discovery { .. } => true,
            ScanError::Io(err) => is_io_transient(err),
            _ => false,
        }
    }
}

/// Check if an I/O error is transient
fn is_io_transient(io_err: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(
        io_err.kind(),
        ConnectionRefused
            | ConnectionReset
            | ConnectionAborted
            | NotConnected
            | BrokenPipe
            | TimedOut
            | Interrupted
            | WouldBlock
    )
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Remote fetch/discovery errors
    Network,
    /// Circuit breaker short-circuits
    Resilience,
    /// Analyzer refusals
    Analysis,
    /// Persistence errors
    Storage,
    /// Notification errors
    Notification,
    /// Cooperative cancellation
    Cancellation,
    /// Worker faults
    Concurrency,
    /// Configuration and request validation
    Configuration,
    /// Local I/O and serialization
    IoError,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Resilience => write!(f, "resilience"),
            ErrorCategory::Analysis => write!(f, "analysis"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Notification => write!(f, "notification"),
            ErrorCategory::Cancellation => write!(f, "cancellation"),
            ErrorCategory::Concurrency => write!(f, "concurrency"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::IoError => write!(f, "io"),
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::TransientFetch { item, reason } => {
                write!(f, "Fetch failed for {}: {}", item, reason)
            }
            ScanError::CircuitOpen => {
                write!(f, "Circuit breaker is open, downstream is cooling down")
            }
            ScanError::PermanentAnalysis { item, reason } => {
                write!(f, "Analysis rejected {}: {}", item, reason)
            }
            ScanError::Persist { item, reason } => {
                write!(f, "Failed to persist {}: {}", item, reason)
            }
            ScanError::Notify(msg) => write!(f, "Notification failed: {}", msg),
            ScanError::Discovery { source, reason } => {
                write!(f, "Discovery failed for source {}: {}", source, reason)
            }
            ScanError::Cancelled => write!(f, "Cancelled before completion"),
            ScanError::Panicked(msg) => write!(f, "Worker panicked: {}", msg),
            ScanError::InvalidRequest(msg) => write!(f, "Invalid scan request: {}", msg),
            ScanError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ScanError::Io(err) => write!(f, "I/O error: {}", err),
            ScanError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ScanError {
    fn from(err: io::Error) -> Self {
        ScanError::Io(err)
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(err: toml::de::Error) -> Self {
        ScanError::Config(err.to_string())
    }
}

impl From<CircuitOpen> for ScanError {
    fn from(_: CircuitOpen) -> Self {
        ScanError::CircuitOpen
    }
}

impl From<Cancelled> for ScanError {
    fn from(_: Cancelled) -> Self {
        ScanError::Cancelled
    }
}

impl From<TaskPanicked> for ScanError {
    fn from(err: TaskPanicked) -> Self {
        ScanError::Panicked(err.0)
    }
}
