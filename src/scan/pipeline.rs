/*!
 * Two-phase scan orchestration
 *
 * Phase 1 enumerates candidates from every source through a small discovery
 * pool. Phase 2 runs fetch, analyze, persist and notify for every candidate
 * through a wider analysis pool. Both phases share one retrying executor, so
 * the rate limiter and circuit breaker see every downstream call.
 *
 * Failures are isolated: a bad source is skipped, a bad item is counted as
 * failed, and only cancellation stops the scan early.
 */

use crate::config::ScannerConfig;
use crate::error::ScanError;
use crate::scan::collaborators::{Collaborators, SerializedStore};
use crate::scan::pool::WorkerPool;
use crate::scan::progress::{ItemStatus, ProgressTracker, Severity};
use crate::scan::types::{
    AnalysisResult, CandidateItem, ScanPhase, ScanRequest, ScanSummary, SourceDescriptor,
};
use prospect_core_resilience::{CircuitBreaker, RetryingExecutor, TaskOutcome};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

type DiscoveryOutcome = TaskOutcome<Vec<CandidateItem>, ScanError>;
type AnalysisOutcome = TaskOutcome<AnalysisResult, ScanError>;

/// Result of the discovery phase
#[derive(Debug, Default)]
struct Discovered {
    candidates: Vec<CandidateItem>,
    sources_failed: usize,
    duplicates_dropped: usize,
}

/// Orchestrates one scan from discovery to summary
pub struct ScanPipeline {
    scan_id: Uuid,
    config: ScannerConfig,
    collaborators: Collaborators,
    store: Arc<SerializedStore>,
    executor: RetryingExecutor,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
    notifications: TaskTracker,
}

impl ScanPipeline {
    /// Build a pipeline with resilience settings taken from `config`
    pub fn new(
        config: ScannerConfig,
        collaborators: Collaborators,
        tracker: Arc<ProgressTracker>,
        cancel: CancellationToken,
    ) -> Self {
        let mut executor =
            RetryingExecutor::new(config.retry_policy()).with_cancellation(cancel.clone());
        if let Some(limiter) = config.rate_limiter() {
            executor = executor.with_rate_limiter(Arc::new(limiter));
        }
        if let Some(breaker_config) = config.circuit_breaker_config() {
            executor = executor.with_circuit_breaker(CircuitBreaker::new(breaker_config));
        }

        Self {
            scan_id: Uuid::new_v4(),
            store: Arc::new(SerializedStore::new(collaborators.store.clone())),
            config,
            collaborators,
            executor,
            tracker,
            cancel,
            notifications: TaskTracker::new(),
        }
    }

    /// Replace the executor (custom limiter, breaker or clock)
    ///
    /// The pipeline's cancellation token is attached to the new executor.
    pub fn with_executor(mut self, executor: RetryingExecutor) -> Self {
        self.executor = executor.with_cancellation(self.cancel.clone());
        self
    }

    /// Use a caller-chosen scan identifier
    pub fn with_scan_id(mut self, scan_id: Uuid) -> Self {
        self.scan_id = scan_id;
        self
    }

    pub fn scan_id(&self) -> Uuid {
        self.scan_id
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run both phases and return the final accounting
    ///
    /// Never fails: per-source and per-item errors are counted and logged.
    pub async fn run(&self, request: &ScanRequest) -> ScanSummary {
        let started_at = chrono::Utc::now();
        self.tracker.begin_clock();
        self.tracker.set_phase(ScanPhase::Discovering);
        self.tracker.append_log(
            format!(
                "scan {} started: {} source(s), up to {} item(s) each",
                self.scan_id,
                request.sources.len(),
                request.max_items_per_source
            ),
            Severity::Info,
        );

        let discovered = self.discover(request).await;

        self.tracker.start(discovered.candidates.len());
        self.tracker.set_phase(ScanPhase::Analyzing);
        self.tracker.append_log(
            format!(
                "discovery complete: {} candidate(s), {} source(s) failed",
                discovered.candidates.len(),
                discovered.sources_failed
            ),
            Severity::Info,
        );

        let total_candidates = discovered.candidates.len();
        self.analyze(request, discovered.candidates).await;
        self.drain_notifications().await;

        let cancelled = self.cancel.is_cancelled();
        self.tracker.set_phase(if cancelled {
            ScanPhase::Cancelled
        } else {
            ScanPhase::Finished
        });

        let snap = self.tracker.snapshot();
        let summary = ScanSummary {
            scan_id: self.scan_id,
            started_at: snap.started_at.unwrap_or(started_at),
            sources_total: request.sources.len(),
            sources_failed: discovered.sources_failed,
            total_candidates,
            duplicates_dropped: discovered.duplicates_dropped,
            completed: snap.completed,
            accepted: snap.accepted,
            rejected: snap.rejected,
            failed: snap.failed,
            skipped: total_candidates.saturating_sub(snap.completed),
            retries: snap.retries,
            elapsed_secs: snap.elapsed.as_secs_f64(),
            throughput: snap.throughput,
            cancelled,
        };

        self.log_summary(&summary);

        let notifier = self.collaborators.notifier.clone();
        match tokio::time::timeout(
            self.config.notify_timeout(),
            notifier.notify_scan_completed(&summary),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.tracker.append_log(
                format!("scan completion notification failed: {}", e),
                Severity::Warning,
            ),
            Err(_) => self
                .tracker
                .append_log("scan completion notification timed out", Severity::Warning),
        }

        summary
    }

    async fn discover(&self, request: &ScanRequest) -> Discovered {
        let limit = request.max_items_per_source;
        let discoverer = self.collaborators.discoverer.clone();
        let executor = self.executor.clone();

        let pool =
            WorkerPool::new(request.discovery_concurrency).with_cancellation(self.cancel.clone());
        let outcomes: Vec<DiscoveryOutcome> = pool
            .run(request.sources.clone(), move |source: SourceDescriptor| {
                let discoverer = discoverer.clone();
                let executor = executor.clone();
                async move {
                    let outcome = executor
                        .execute(source.name.clone(), || discoverer.discover(&source, limit))
                        .await;
                    outcome.map(|mut items| {
                        items.truncate(limit);
                        items
                    })
                }
            })
            .await;

        self.merge_discovered(&request.sources, outcomes)
    }

    /// Merge per-source batches in request order so dedupe keeps the first source
    fn merge_discovered(
        &self,
        sources: &[SourceDescriptor],
        outcomes: Vec<DiscoveryOutcome>,
    ) -> Discovered {
        let order: HashMap<&str, usize> = sources
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();
        let mut outcomes = outcomes;
        outcomes.sort_by_key(|o| order.get(o.label.as_str()).copied().unwrap_or(usize::MAX));

        let mut discovered = Discovered::default();
        let mut seen = HashSet::new();

        for outcome in outcomes {
            match outcome.result {
                Ok(items) => {
                    self.tracker.append_log(
                        format!("source {}: {} candidate(s)", outcome.label, items.len()),
                        Severity::Success,
                    );
                    for item in items {
                        if self.config.dedupe_candidates && !seen.insert(item.id.clone()) {
                            discovered.duplicates_dropped += 1;
                            continue;
                        }
                        discovered.candidates.push(item);
                    }
                }
                Err(ScanError::Cancelled) if outcome.attempts == 0 => {
                    tracing::debug!(
                        source = %outcome.label,
                        "discovery skipped after cancellation"
                    );
                }
                Err(e) => {
                    discovered.sources_failed += 1;
                    self.tracker.append_log(
                        format!(
                            "source {} failed after {} attempt(s): {}",
                            outcome.label, outcome.attempts, e
                        ),
                        Severity::Error,
                    );
                }
            }
        }

        if discovered.duplicates_dropped > 0 {
            self.tracker.append_log(
                format!(
                    "dropped {} duplicate candidate(s) reported by more than one source",
                    discovered.duplicates_dropped
                ),
                Severity::Info,
            );
        }
        discovered
    }

    async fn analyze(&self, request: &ScanRequest, candidates: Vec<CandidateItem>) {
        if candidates.is_empty() {
            return;
        }

        let fetcher = self.collaborators.fetcher.clone();
        let analyzer = self.collaborators.analyzer.clone();
        let notifier = self.collaborators.notifier.clone();
        let store = self.store.clone();
        let executor = self.executor.clone();
        let notifications = self.notifications.clone();
        let tracker = self.tracker.clone();

        let work = move |item: CandidateItem| {
            let fetcher = fetcher.clone();
            let analyzer = analyzer.clone();
            let notifier = notifier.clone();
            let store = store.clone();
            let executor = executor.clone();
            let notifications = notifications.clone();
            let tracker = tracker.clone();

            async move {
                let mut outcome: AnalysisOutcome = executor
                    .execute(item.id.clone(), || {
                        let (fetcher, analyzer, item) = (&fetcher, &analyzer, &item);
                        async move {
                            let raw = fetcher.fetch(item).await?;
                            analyzer.analyze(&raw)
                        }
                    })
                    .await;

                let result = match &outcome.result {
                    Ok(result) if result.accepted() => result.clone(),
                    _ => return outcome,
                };

                if let Err(e) = store.persist(&result).await {
                    let e = match e {
                        ScanError::Persist { .. } => e,
                        other => ScanError::Persist {
                            item: item.id.clone(),
                            reason: other.to_string(),
                        },
                    };
                    outcome.result = Err(e);
                    return outcome;
                }

                notifications.spawn(async move {
                    if let Err(e) = notifier.notify(&result).await {
                        tracker.append_log(
                            format!("notification for {} failed: {}", result.item.id, e),
                            Severity::Warning,
                        );
                    }
                });
                outcome
            }
        };

        let tracker = self.tracker.clone();
        let on_complete = move |outcome: &AnalysisOutcome| record_item(&tracker, outcome);

        let pool =
            WorkerPool::new(request.analysis_concurrency).with_cancellation(self.cancel.clone());
        let outcomes = pool.run_with(candidates, work, on_complete).await;

        let skipped = outcomes.iter().filter(|o| was_skipped(o)).count();
        if skipped > 0 {
            self.tracker.append_log(
                format!("scan cancelled: {} candidate(s) not analyzed", skipped),
                Severity::Warning,
            );
        }
    }

    /// Wait for outstanding notifications, bounded by the notify timeout
    async fn drain_notifications(&self) {
        self.notifications.close();
        if tokio::time::timeout(self.config.notify_timeout(), self.notifications.wait())
            .await
            .is_err()
        {
            self.tracker.append_log(
                format!(
                    "{} notification(s) still pending after {:?}",
                    self.notifications.len(),
                    self.config.notify_timeout()
                ),
                Severity::Warning,
            );
        }
    }

    fn log_summary(&self, summary: &ScanSummary) {
        let verdict = if summary.cancelled {
            "scan cancelled"
        } else {
            "scan complete"
        };
        self.tracker.append_log(
            format!(
                "{}: {} scanned, {} accepted, {} rejected, {} failed, {} skipped",
                verdict,
                summary.completed,
                summary.accepted,
                summary.rejected,
                summary.failed,
                summary.skipped
            ),
            if summary.failed > 0 || summary.cancelled {
                Severity::Warning
            } else {
                Severity::Success
            },
        );
        self.tracker.append_log(
            format!(
                "elapsed {:.1}s, {:.2} items/s, {} retries",
                summary.elapsed_secs, summary.throughput, summary.retries
            ),
            Severity::Info,
        );
    }
}

/// Items that never reached the fetcher because the scan was cancelled
fn was_skipped(outcome: &AnalysisOutcome) -> bool {
    outcome.attempts == 0 && matches!(outcome.result, Err(ScanError::Cancelled))
}

fn record_item(tracker: &ProgressTracker, outcome: &AnalysisOutcome) {
    if was_skipped(outcome) {
        return;
    }
    let retries = outcome.retries();
    match &outcome.result {
        Ok(result) if result.accepted() => {
            tracker.record(ItemStatus::Accepted, retries);
            tracker.append_log(format!("accepted {}", result.item.id), Severity::Success);
        }
        Ok(result) => {
            tracker.record(ItemStatus::Rejected, retries);
            tracing::debug!(item = %result.item.id, "rejected");
        }
        Err(e) => {
            tracker.record(ItemStatus::Failed, retries);
            tracker.append_log(
                format!(
                    "{} failed after {} attempt(s): {}",
                    outcome.label, outcome.attempts, e
                ),
                Severity::Error,
            );
        }
    }
}
