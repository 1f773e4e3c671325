/*!
 * Caller-facing surface: start a scan, watch it, cancel it
 *
 * [`Scanner::start_scan`] returns a [`ScanHandle`] right away and runs the
 * pipeline in the background. Handles are independent; the process-wide
 * default handle is an opt-in layer on top for callers that only ever run
 * one scan at a time.
 */

use crate::config::ScannerConfig;
use crate::error::{Result, ScanError};
use crate::scan::collaborators::Collaborators;
use crate::scan::pipeline::ScanPipeline;
use crate::scan::progress::{LogEntry, ProgressSnapshot, ProgressTracker};
use crate::scan::types::{ScanRequest, ScanSummary};
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Starts scans against one set of collaborators
#[derive(Debug, Clone)]
pub struct Scanner {
    config: ScannerConfig,
    collaborators: Collaborators,
}

impl Scanner {
    pub fn new(config: ScannerConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Validate `request` and run it in the background
    ///
    /// Fails only for malformed input; item and source failures show up in
    /// the summary. Must be called from within a tokio runtime.
    pub fn start_scan(&self, request: ScanRequest) -> Result<ScanHandle> {
        request.validate()?;
        self.config.validate()?;

        let scan_id = Uuid::new_v4();
        let tracker = Arc::new(
            ProgressTracker::new(self.config.log_buffer_capacity)
                .with_progress_log_interval(self.config.progress_log_interval),
        );
        let cancel = CancellationToken::new();
        let pipeline = ScanPipeline::new(
            self.config.clone(),
            self.collaborators.clone(),
            tracker.clone(),
            cancel.clone(),
        )
        .with_scan_id(scan_id);

        let (tx, rx) = watch::channel(None);
        tokio::spawn(async move {
            let summary = pipeline.run(&request).await;
            let _ = tx.send(Some(summary));
        });

        tracing::info!(scan_id = %scan_id, "scan started");
        Ok(ScanHandle {
            scan_id,
            tracker,
            cancel,
            summary: rx,
        })
    }

    /// Start a scan and make it the process-wide default
    ///
    /// Refuses to start while the current default scan is still running.
    pub fn start_default_scan(&self, request: ScanRequest) -> Result<ScanHandle> {
        let mut slot = DEFAULT_HANDLE.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = slot.as_ref() {
            if !current.is_finished() {
                return Err(ScanError::InvalidRequest(format!(
                    "scan {} is already running",
                    current.scan_id()
                )));
            }
        }
        let handle = self.start_scan(request)?;
        *slot = Some(handle.clone());
        Ok(handle)
    }
}

/// Handle to one running or finished scan
///
/// Cheap to clone; every clone observes the same scan.
#[derive(Debug, Clone)]
pub struct ScanHandle {
    scan_id: Uuid,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
    summary: watch::Receiver<Option<ScanSummary>>,
}

impl ScanHandle {
    pub fn scan_id(&self) -> Uuid {
        self.scan_id
    }

    /// Current progress; never blocks the workers
    pub fn progress(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    /// Drain up to `max` of the oldest undelivered log entries
    ///
    /// The read is destructive: an entry is returned to exactly one caller.
    pub fn recent_logs(&self, max: usize) -> Vec<LogEntry> {
        self.tracker.drain_logs(max)
    }

    /// Ask the scan to stop
    ///
    /// No new items are started; items already running finish normally.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!(scan_id = %self.scan_id, "cancellation requested");
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the summary is available
    pub fn is_finished(&self) -> bool {
        self.summary.borrow().is_some()
    }

    /// The summary, if the scan has finished
    pub fn summary(&self) -> Option<ScanSummary> {
        self.summary.borrow().clone()
    }

    /// Wait for the scan to finish and return its summary
    pub async fn wait(&self) -> Result<ScanSummary> {
        let lost = || ScanError::Panicked(format!("scan {} ended without a summary", self.scan_id));
        let mut rx = self.summary.clone();
        let summary = rx.wait_for(Option::is_some).await.map_err(|_| lost())?;
        summary.clone().ok_or_else(lost)
    }
}

static DEFAULT_HANDLE: Lazy<Mutex<Option<ScanHandle>>> = Lazy::new(|| Mutex::new(None));

/// The handle registered by [`Scanner::start_default_scan`] or [`set_default_handle`]
pub fn default_handle() -> Option<ScanHandle> {
    DEFAULT_HANDLE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Register `handle` as the process-wide default, returning the previous one
pub fn set_default_handle(handle: ScanHandle) -> Option<ScanHandle> {
    DEFAULT_HANDLE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(handle)
}

/// Forget the process-wide default handle
pub fn clear_default_handle() -> Option<ScanHandle> {
    DEFAULT_HANDLE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}
