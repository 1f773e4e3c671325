/*!
 * Value types flowing through a scan
 */

use crate::config::ScannerConfig;
use crate::error::{Result, ScanError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// A remote listing to enumerate candidates from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Unique, human-readable name
    pub name: String,
    /// Where the listing lives (URL, path, query; opaque to the core)
    pub locator: String,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Immutable input to one scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Sources to enumerate in the discovery phase
    pub sources: Vec<SourceDescriptor>,
    /// Cap on candidates taken from each source
    pub max_items_per_source: usize,
    /// Discovery pool size
    pub discovery_concurrency: usize,
    /// Analysis pool size
    pub analysis_concurrency: usize,
}

impl ScanRequest {
    /// Build a request using the pool sizing and cap from `config`
    pub fn from_config(sources: Vec<SourceDescriptor>, config: &ScannerConfig) -> Self {
        Self {
            sources,
            max_items_per_source: config.max_items_per_source,
            discovery_concurrency: config.discovery_concurrency,
            analysis_concurrency: config.analysis_concurrency,
        }
    }

    /// Reject requests a scan cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(ScanError::InvalidRequest(
                "at least one source is required".to_string(),
            ));
        }
        if self.max_items_per_source == 0 {
            return Err(ScanError::InvalidRequest(
                "max_items_per_source must be at least 1".to_string(),
            ));
        }
        if self.discovery_concurrency == 0 {
            return Err(ScanError::InvalidRequest(
                "discovery_concurrency must be at least 1".to_string(),
            ));
        }
        if self.analysis_concurrency == 0 {
            return Err(ScanError::InvalidRequest(
                "analysis_concurrency must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.name.as_str()) {
                return Err(ScanError::InvalidRequest(format!(
                    "duplicate source name: {}",
                    source.name
                )));
            }
        }
        Ok(())
    }
}

/// An identifier found during discovery, not yet fetched
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Item identifier
    pub id: String,
    /// Name of the source that produced it
    pub source: String,
}

impl CandidateItem {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for CandidateItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Raw data the fetcher returned for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub item: CandidateItem,
    pub body: serde_json::Value,
}

/// Accept/reject decision made by the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accept,
    Reject,
}

/// Analyzer output for one candidate
///
/// The payload is forwarded to the store and notifier untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub item: CandidateItem,
    pub verdict: Verdict,
    pub payload: serde_json::Value,
}

impl AnalysisResult {
    pub fn accepted(&self) -> bool {
        self.verdict == Verdict::Accept
    }
}

/// Lifecycle phase of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanPhase {
    #[default]
    Idle,
    Discovering,
    Analyzing,
    Finished,
    Cancelled,
}

impl ScanPhase {
    /// Whether the scan has stopped for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanPhase::Finished | ScanPhase::Cancelled)
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Discovering => "discovering",
            ScanPhase::Analyzing => "analyzing",
            ScanPhase::Finished => "finished",
            ScanPhase::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Final accounting for a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub scan_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub sources_total: usize,
    pub sources_failed: usize,
    /// Candidates handed to the analysis phase
    pub total_candidates: usize,
    /// Identifiers dropped because another source already reported them
    pub duplicates_dropped: usize,
    pub completed: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Candidates never started because the scan was cancelled
    pub skipped: usize,
    pub retries: u64,
    pub elapsed_secs: f64,
    /// Completed items per second
    pub throughput: f64,
    pub cancelled: bool,
}

impl ScanSummary {
    /// Wall time of the scan
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_secs.max(0.0))
    }

    /// Every candidate is accounted for exactly once
    pub fn is_balanced(&self) -> bool {
        self.completed + self.skipped == self.total_candidates
            && self.accepted + self.rejected + self.failed == self.completed
    }

    /// Whether anything went wrong along the way
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.failed == 0 && self.sources_failed == 0
    }
}
