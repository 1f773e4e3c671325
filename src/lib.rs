/*!
 * Prospect - concurrent scan orchestration
 *
 * Discovers candidate items from several sources and runs each one through a
 * fetch, analyze, persist and notify pipeline on a bounded worker pool:
 * - Sliding-window rate limiting of downstream calls
 * - Circuit breaker around the shared downstream dependency
 * - Bounded retry with exponential backoff
 * - Panic-safe worker pools that account for every submitted item
 * - Live, thread-safe progress counters and a drainable log stream
 * - Cooperative cancellation
 */

pub mod cli_progress;
pub mod config;
pub mod error;
pub mod fixture;
pub mod logging;
pub mod scan;

// Re-export commonly used types
pub use config::{LogLevel, ScannerConfig};
pub use error::{Result, ScanError};
pub use scan::{
    AnalysisResult, CandidateItem, Collaborators, ProgressSnapshot, ScanHandle, ScanRequest,
    ScanSummary, Scanner, SourceDescriptor, Verdict,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
