/*!
 * Boundary traits implemented by the collaborators a scan drives
 *
 * The orchestrator only sees these narrow interfaces; what a fetch or a
 * persist actually does is up to the implementation.
 */

use crate::error::Result;
use crate::scan::types::{AnalysisResult, CandidateItem, RawItem, ScanSummary, SourceDescriptor};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Enumerates candidate items from a source
#[async_trait]
pub trait Discoverer: Send + Sync {
    /// Return up to `limit` candidates; called once per discovery attempt
    async fn discover(&self, source: &SourceDescriptor, limit: usize) -> Result<Vec<CandidateItem>>;
}

/// Turns a candidate into raw item data
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Called once per analysis attempt
    async fn fetch(&self, item: &CandidateItem) -> Result<RawItem>;
}

/// Turns raw item data into a verdict and payload
///
/// Treated as a pure function: no side effects are expected.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, raw: &RawItem) -> Result<AnalysisResult>;
}

/// Persists accepted results
///
/// Must tolerate concurrent callers and must not duplicate a record when two
/// writers race on the same identifier.
#[async_trait]
pub trait Store: Send + Sync {
    async fn persist(&self, result: &AnalysisResult) -> Result<()>;
}

/// Best-effort dispatch of accepted results
///
/// Failures are logged by the caller and never change an item's status.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, result: &AnalysisResult) -> Result<()>;

    /// Called once when a scan finishes
    async fn notify_scan_completed(&self, _summary: &ScanSummary) -> Result<()> {
        Ok(())
    }
}

/// Notifier that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _result: &AnalysisResult) -> Result<()> {
        Ok(())
    }
}

/// Everything a scan needs from the outside world
#[derive(Clone)]
pub struct Collaborators {
    pub discoverer: Arc<dyn Discoverer>,
    pub fetcher: Arc<dyn Fetcher>,
    pub analyzer: Arc<dyn Analyzer>,
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Single-writer wrapper around a [`Store`]
///
/// Every persist from every analysis worker goes through one lock, so the
/// underlying store only ever sees one write at a time.
pub struct SerializedStore {
    inner: Arc<dyn Store>,
    writer: Mutex<()>,
}

impl SerializedStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            writer: Mutex::new(()),
        }
    }

    /// Persist while holding the writer lock
    pub async fn persist(&self, result: &AnalysisResult) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.inner.persist(result).await
    }
}
