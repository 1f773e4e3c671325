/*!
 * Thread-safe scan progress: counters plus a FIFO log stream
 *
 * Producers are the pool workers; observers poll [`ProgressTracker::snapshot`]
 * and drain [`ProgressTracker::drain_logs`]. Counters and the log stream sit
 * behind separate locks, each held only for the update itself.
 */

use crate::scan::types::ScanPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Severity of a scan log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Success => write!(f, "success"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One line of the scan log; never edited after append
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: Severity,
    pub message: String,
}

/// Point-in-time view of a scan's progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: ScanPhase,
    pub total: usize,
    pub completed: usize,
    pub accepted: usize,
    /// Completed items that were neither accepted nor failed
    pub rejected: usize,
    pub failed: usize,
    pub retries: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed: Duration,
    /// Completed items per second (0 when no time has elapsed)
    pub throughput: f64,
    /// Completed share of total, 0-100
    pub percent: f64,
    /// Log entries evicted before anyone drained them
    pub dropped_logs: u64,
}

/// How a finished item should be counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Accepted,
    Rejected,
    Failed,
}

#[derive(Debug, Default)]
struct Counters {
    phase: ScanPhase,
    total: usize,
    completed: usize,
    accepted: usize,
    failed: usize,
    retries: u64,
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    finished: Option<Instant>,
}

#[derive(Debug)]
struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    dropped: u64,
}

/// Thread-safe counters and log stream for one scan
#[derive(Debug)]
pub struct ProgressTracker {
    counters: Mutex<Counters>,
    logs: Mutex<LogBuffer>,
    progress_log_interval: usize,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(1_000)
    }
}

impl ProgressTracker {
    /// Create a tracker keeping at most `log_capacity` undrained log entries
    pub fn new(log_capacity: usize) -> Self {
        let capacity = log_capacity.max(1);
        Self {
            counters: Mutex::new(Counters::default()),
            logs: Mutex::new(LogBuffer {
                entries: VecDeque::with_capacity(capacity.min(1_024)),
                capacity,
                dropped: 0,
            }),
            progress_log_interval: 0,
        }
    }

    /// Log a progress line every `interval` completed items (0 = never)
    pub fn with_progress_log_interval(mut self, interval: usize) -> Self {
        self.progress_log_interval = interval;
        self
    }

    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn logs(&self) -> MutexGuard<'_, LogBuffer> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin counting towards `total` items; resets counters and the clock
    pub fn start(&self, total: usize) {
        let mut c = self.counters();
        c.total = total;
        c.completed = 0;
        c.accepted = 0;
        c.failed = 0;
        c.started = Some(Instant::now());
        c.started_at = Some(Utc::now());
        c.finished = None;
    }

    /// Start the clock without a total (used while discovering)
    pub fn begin_clock(&self) {
        let mut c = self.counters();
        if c.started.is_none() {
            c.started = Some(Instant::now());
            c.started_at = Some(Utc::now());
        }
    }

    /// Move to a new phase; terminal phases freeze the elapsed clock
    pub fn set_phase(&self, phase: ScanPhase) {
        let mut c = self.counters();
        c.phase = phase;
        if phase.is_terminal() && c.finished.is_none() {
            c.finished = Some(Instant::now());
        }
    }

    /// Count one more finished item; ignored once `total` is reached
    pub fn increment_completed(&self) {
        let mut c = self.counters();
        if c.completed < c.total {
            c.completed += 1;
        } else {
            tracing::debug!(total = c.total, "completed counter already at total");
        }
    }

    pub fn increment_accepted(&self) {
        self.counters().accepted += 1;
    }

    pub fn increment_failed(&self) {
        self.counters().failed += 1;
    }

    /// Add retries spent by a finished task
    pub fn add_retries(&self, retries: u32) {
        self.counters().retries += u64::from(retries);
    }

    /// Count a finished item in one step
    ///
    /// Updates `completed` and the matching status counter under a single
    /// lock acquisition, so observers never see one without the other.
    pub fn record(&self, status: ItemStatus, retries: u32) {
        let completed = {
            let mut c = self.counters();
            if c.completed >= c.total {
                tracing::debug!(total = c.total, "ignoring item beyond total");
                return;
            }
            c.completed += 1;
            match status {
                ItemStatus::Accepted => c.accepted += 1,
                ItemStatus::Failed => c.failed += 1,
                ItemStatus::Rejected => {}
            }
            c.retries += u64::from(retries);
            c.completed
        };

        if self.progress_log_interval > 0 && completed % self.progress_log_interval == 0 {
            let snap = self.snapshot();
            self.append_log(
                format!(
                    "progress: {}/{} ({:.1}%) | {:.2} items/s",
                    snap.completed, snap.total, snap.percent, snap.throughput
                ),
                Severity::Info,
            );
        }
    }

    /// Append to the log stream and mirror the entry into tracing
    ///
    /// When the buffer is full the oldest undrained entry is evicted.
    pub fn append_log(&self, message: impl Into<String>, level: Severity) {
        let message = message.into();
        match level {
            Severity::Info | Severity::Success => {
                tracing::info!(target: "prospect::scan", "{}", message)
            }
            Severity::Warning => tracing::warn!(target: "prospect::scan", "{}", message),
            Severity::Error => tracing::error!(target: "prospect::scan", "{}", message),
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        };

        let mut logs = self.logs();
        if logs.entries.len() >= logs.capacity {
            logs.entries.pop_front();
            logs.dropped += 1;
        }
        logs.entries.push_back(entry);
    }

    /// Remove and return up to `max` of the oldest entries, oldest first
    pub fn drain_logs(&self, max: usize) -> Vec<LogEntry> {
        let mut logs = self.logs();
        let n = max.min(logs.entries.len());
        logs.entries.drain(..n).collect()
    }

    /// Entries currently waiting to be drained
    pub fn pending_logs(&self) -> usize {
        self.logs().entries.len()
    }

    /// Build a fresh snapshot of the counters
    pub fn snapshot(&self) -> ProgressSnapshot {
        let (phase, total, completed, accepted, failed, retries, started, started_at, finished) = {
            let c = self.counters();
            (
                c.phase,
                c.total,
                c.completed,
                c.accepted,
                c.failed,
                c.retries,
                c.started,
                c.started_at,
                c.finished,
            )
        };
        let dropped_logs = self.logs().dropped;

        let elapsed = match (started, finished) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        };
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            completed as f64 / secs
        } else {
            0.0
        };
        let percent = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        ProgressSnapshot {
            phase,
            total,
            completed,
            accepted,
            rejected: completed.saturating_sub(accepted + failed),
            failed,
            retries,
            started_at,
            elapsed,
            throughput,
            percent,
            dropped_logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fresh_snapshot_is_zeroed() {
        let tracker = ProgressTracker::default();
        let snap = tracker.snapshot();
        assert_eq!(snap.phase, ScanPhase::Idle);
        assert_eq!(snap.total, 0);
        assert_eq!(snap.throughput, 0.0);
        assert_eq!(snap.percent, 0.0);
        assert!(snap.started_at.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let tracker = Arc::new(ProgressTracker::default());
        tracker.start(10);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker.increment_completed();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(tracker.snapshot().completed, 10);
    }

    #[test]
    fn test_threaded_stress_keeps_invariants() {
        let tracker = Arc::new(ProgressTracker::default());
        tracker.start(4_000);

        let writers: Vec<_> = (0..8)
            .map(|w| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let status = match (w + i) % 3 {
                            0 => ItemStatus::Accepted,
                            1 => ItemStatus::Rejected,
                            _ => ItemStatus::Failed,
                        };
                        tracker.record(status, 1);
                    }
                })
            })
            .collect();

        // Observe while writers run
        for _ in 0..200 {
            let snap = tracker.snapshot();
            assert!(snap.completed <= snap.total);
            assert!(snap.accepted + snap.rejected + snap.failed <= snap.completed);
        }

        for w in writers {
            w.join().unwrap();
        }

        let snap = tracker.snapshot();
        assert_eq!(snap.completed, 4_000);
        assert_eq!(snap.accepted + snap.rejected + snap.failed, 4_000);
        assert_eq!(snap.retries, 4_000);
    }

    #[test]
    fn test_completed_never_exceeds_total() {
        let tracker = ProgressTracker::default();
        tracker.start(2);
        for _ in 0..5 {
            tracker.increment_completed();
        }
        tracker.record(ItemStatus::Accepted, 0);
        let snap = tracker.snapshot();
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.accepted, 0);
        assert_eq!(snap.percent, 100.0);
    }

    #[test]
    fn test_separate_increments() {
        let tracker = ProgressTracker::default();
        tracker.start(3);
        tracker.increment_completed();
        tracker.increment_accepted();
        tracker.increment_completed();
        tracker.increment_failed();
        tracker.increment_completed();
        tracker.add_retries(2);

        let snap = tracker.snapshot();
        assert_eq!(snap.completed, 3);
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.retries, 2);
    }

    #[test]
    fn test_drain_is_fifo_and_destructive() {
        let tracker = ProgressTracker::default();
        for i in 0..5 {
            tracker.append_log(format!("line {}", i), Severity::Info);
        }

        let first = tracker.drain_logs(3);
        assert_eq!(
            first.iter().map(|e| e.message.as_str()).collect::<Vec<_>>(),
            vec!["line 0", "line 1", "line 2"]
        );

        let rest = tracker.drain_logs(100);
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].message, "line 3");
        assert!(tracker.drain_logs(10).is_empty());
    }

    #[test]
    fn test_full_buffer_evicts_oldest() {
        let tracker = ProgressTracker::new(3);
        for i in 0..5 {
            tracker.append_log(format!("line {}", i), Severity::Warning);
        }

        assert_eq!(tracker.pending_logs(), 3);
        assert_eq!(tracker.snapshot().dropped_logs, 2);
        let entries = tracker.drain_logs(10);
        assert_eq!(entries[0].message, "line 2");
        assert_eq!(entries[0].level, Severity::Warning);
    }

    #[test]
    fn test_periodic_progress_lines() {
        let tracker = ProgressTracker::default().with_progress_log_interval(10);
        tracker.start(25);
        for _ in 0..25 {
            tracker.record(ItemStatus::Rejected, 0);
        }

        let lines: Vec<_> = tracker
            .drain_logs(100)
            .into_iter()
            .filter(|e| e.message.starts_with("progress:"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].message.starts_with("progress: 10/25 (40.0%)"));
    }

    #[test]
    fn test_terminal_phase_freezes_elapsed() {
        let tracker = ProgressTracker::default();
        tracker.start(1);
        tracker.record(ItemStatus::Accepted, 0);
        tracker.set_phase(ScanPhase::Finished);

        let first = tracker.snapshot().elapsed;
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tracker.snapshot().elapsed, first);
    }
}
