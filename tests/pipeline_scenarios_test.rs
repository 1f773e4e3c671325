use async_trait::async_trait;
use prospect::config::ScannerConfig;
use prospect::error::{Result, ScanError};
use prospect::scan::{
    AnalysisResult, Analyzer, CandidateItem, Collaborators, Discoverer, Fetcher, Notifier,
    ProgressTracker, RawItem, ScanPipeline, ScanRequest, Scanner, SourceDescriptor, Store,
    Verdict,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Config with no rate limit and millisecond backoff so scenarios run fast
fn fast_config() -> ScannerConfig {
    ScannerConfig {
        rate_limit_per_minute: 0,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 10,
        ..ScannerConfig::default()
    }
}

fn request(sources: &[&str], analysis_concurrency: usize) -> ScanRequest {
    ScanRequest {
        sources: sources
            .iter()
            .map(|name| SourceDescriptor::new(*name, format!("listing://{}", name)))
            .collect(),
        max_items_per_source: 100,
        discovery_concurrency: 2,
        analysis_concurrency,
    }
}

struct MapDiscoverer {
    listings: HashMap<String, Vec<String>>,
}

impl MapDiscoverer {
    fn new(listings: &[(&str, Vec<String>)]) -> Self {
        Self {
            listings: listings
                .iter()
                .map(|(name, ids)| (name.to_string(), ids.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl Discoverer for MapDiscoverer {
    async fn discover(
        &self,
        source: &SourceDescriptor,
        limit: usize,
    ) -> Result<Vec<CandidateItem>> {
        let ids = self.listings.get(&source.name).ok_or_else(|| ScanError::Discovery {
            source: source.name.clone(),
            reason: "listing unavailable".to_string(),
        })?;
        Ok(ids
            .iter()
            .take(limit)
            .map(|id| CandidateItem::new(id.clone(), source.name.clone()))
            .collect())
    }
}

/// Fetcher failing the first `transient[id]` attempts and counting every call
#[derive(Default)]
struct ScriptedFetcher {
    transient: HashMap<String, usize>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedFetcher {
    fn failing(transient: &[(&str, usize)]) -> Self {
        Self {
            transient: transient.iter().map(|(id, n)| (id.to_string(), *n)).collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, item: &CandidateItem) -> Result<RawItem> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(item.id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if call <= self.transient.get(&item.id).copied().unwrap_or(0) {
            return Err(ScanError::TransientFetch {
                item: item.id.clone(),
                reason: "renderer timed out".to_string(),
            });
        }
        Ok(RawItem {
            item: item.clone(),
            body: serde_json::json!({ "id": item.id }),
        })
    }
}

/// Accepts the listed ids, refuses `broken` ones, rejects the rest
struct ListAnalyzer {
    accept: HashSet<String>,
    broken: HashSet<String>,
}

impl ListAnalyzer {
    fn new(accept: &[&str], broken: &[&str]) -> Self {
        Self {
            accept: accept.iter().map(|s| s.to_string()).collect(),
            broken: broken.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Analyzer for ListAnalyzer {
    fn analyze(&self, raw: &RawItem) -> Result<AnalysisResult> {
        if self.broken.contains(&raw.item.id) {
            return Err(ScanError::PermanentAnalysis {
                item: raw.item.id.clone(),
                reason: "unparseable data".to_string(),
            });
        }
        let verdict = if self.accept.contains(&raw.item.id) {
            Verdict::Accept
        } else {
            Verdict::Reject
        };
        Ok(AnalysisResult {
            item: raw.item.clone(),
            verdict,
            payload: raw.body.clone(),
        })
    }
}

#[derive(Default)]
struct RecordingStore {
    persisted: Mutex<Vec<String>>,
    reject: HashSet<String>,
}

#[async_trait]
impl Store for RecordingStore {
    async fn persist(&self, result: &AnalysisResult) -> Result<()> {
        if self.reject.contains(&result.item.id) {
            return Err(ScanError::Persist {
                item: result.item.id.clone(),
                reason: "disk full".to_string(),
            });
        }
        self.persisted.lock().unwrap().push(result.item.id.clone());
        Ok(())
    }
}

#[derive(Default)]
struct CountingNotifier {
    notified: Mutex<Vec<String>>,
    fail: bool,
    completed_scans: AtomicUsize,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn notify(&self, result: &AnalysisResult) -> Result<()> {
        self.notified.lock().unwrap().push(result.item.id.clone());
        if self.fail {
            return Err(ScanError::Notify("webhook returned 500".to_string()));
        }
        Ok(())
    }

    async fn notify_scan_completed(&self, _summary: &prospect::ScanSummary) -> Result<()> {
        self.completed_scans.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_transient_fetch_retried_and_accepted_items_persisted() {
    let fetcher = Arc::new(ScriptedFetcher::failing(&[("B", 1)]));
    let store = Arc::new(RecordingStore::default());
    let notifier = Arc::new(CountingNotifier::default());
    let collaborators = Collaborators {
        discoverer: Arc::new(MapDiscoverer::new(&[("catalog", ids(&["A", "B", "C"]))])),
        fetcher: fetcher.clone(),
        analyzer: Arc::new(ListAnalyzer::new(&["B", "C"], &[])),
        store: store.clone(),
        notifier: notifier.clone(),
    };

    let scanner = Scanner::new(fast_config(), collaborators);
    let handle = scanner.start_scan(request(&["catalog"], 3)).unwrap();
    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.completed, 3);
    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.retries, 1);
    assert!(summary.is_balanced());
    assert!(summary.is_clean());

    assert_eq!(fetcher.calls("B"), 2);
    let mut persisted = store.persisted.lock().unwrap().clone();
    persisted.sort();
    assert_eq!(persisted, ids(&["B", "C"]));
    assert_eq!(notifier.notified.lock().unwrap().len(), 2);
    assert_eq!(notifier.completed_scans.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failures_are_isolated_per_source_and_item() {
    let store = Arc::new(RecordingStore {
        persisted: Mutex::new(Vec::new()),
        reject: ["D".to_string()].into_iter().collect(),
    });
    let notifier = Arc::new(CountingNotifier {
        fail: true,
        ..CountingNotifier::default()
    });
    let collaborators = Collaborators {
        discoverer: Arc::new(MapDiscoverer::new(&[("good", ids(&["A", "B", "C", "D"]))])),
        fetcher: Arc::new(ScriptedFetcher::default()),
        analyzer: Arc::new(ListAnalyzer::new(&["A", "D"], &["C"])),
        store: store.clone(),
        notifier: notifier.clone(),
    };

    let scanner = Scanner::new(fast_config(), collaborators);
    let handle = scanner.start_scan(request(&["good", "offline"], 4)).unwrap();
    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.sources_failed, 1);
    assert_eq!(summary.completed, 4);
    // A accepted, B rejected, C refused by the analyzer, D lost by the store
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.failed, 2);
    assert!(summary.is_balanced());
    assert!(!summary.is_clean());

    assert_eq!(*store.persisted.lock().unwrap(), ids(&["A"]));
    // Notify failed for A but A stays accepted; D never reached notify
    assert_eq!(*notifier.notified.lock().unwrap(), ids(&["A"]));

    let logs = handle.recent_logs(1_000);
    assert!(logs.iter().any(|e| e.message.contains("source offline failed")));
    assert!(logs.iter().any(|e| e.message.contains("notification for A failed")));
    assert!(logs.iter().any(|e| e.message.contains("Failed to persist D")));
}

#[tokio::test]
async fn test_open_circuit_stops_calling_fetcher() {
    let config = ScannerConfig {
        max_retries: 0,
        failure_threshold: 2,
        circuit_timeout_secs: 600,
        ..fast_config()
    };
    let items: Vec<String> = (0..6).map(|i| format!("item-{}", i)).collect();
    let transient: Vec<(&str, usize)> = items.iter().map(|id| (id.as_str(), usize::MAX)).collect();
    let fetcher = Arc::new(ScriptedFetcher::failing(&transient));

    let collaborators = Collaborators {
        discoverer: Arc::new(MapDiscoverer::new(&[("flaky", items.clone())])),
        fetcher: fetcher.clone(),
        analyzer: Arc::new(ListAnalyzer::new(&[], &[])),
        store: Arc::new(RecordingStore::default()),
        notifier: Arc::new(CountingNotifier::default()),
    };

    let scanner = Scanner::new(config, collaborators);
    let handle = scanner.start_scan(request(&["flaky"], 1)).unwrap();
    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.completed, 6);
    assert_eq!(summary.failed, 6);
    assert_eq!(fetcher.total_calls(), 2);

    let logs = handle.recent_logs(1_000);
    let short_circuited = logs
        .iter()
        .filter(|e| e.message.contains("Circuit breaker is open"))
        .count();
    assert_eq!(short_circuited, 4);
}

/// Fetcher that cancels the scan when the fifth fetch starts
struct CancellingFetcher {
    cancel: CancellationToken,
    started: AtomicUsize,
    after_cancel: AtomicUsize,
}

#[async_trait]
impl Fetcher for CancellingFetcher {
    async fn fetch(&self, item: &CandidateItem) -> Result<RawItem> {
        if self.cancel.is_cancelled() {
            self.after_cancel.fetch_add(1, Ordering::SeqCst);
        }
        if self.started.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
            self.cancel.cancel();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(RawItem {
            item: item.clone(),
            body: serde_json::Value::Null,
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancellation_lets_in_flight_items_finish() {
    let analysis_concurrency = 5;
    let cancel = CancellationToken::new();
    let fetcher = Arc::new(CancellingFetcher {
        cancel: cancel.clone(),
        started: AtomicUsize::new(0),
        after_cancel: AtomicUsize::new(0),
    });
    let store = Arc::new(RecordingStore::default());
    let items: Vec<String> = (0..20).map(|i| format!("item-{:02}", i)).collect();

    let collaborators = Collaborators {
        discoverer: Arc::new(MapDiscoverer::new(&[("catalog", items.clone())])),
        fetcher: fetcher.clone(),
        analyzer: Arc::new(ListAnalyzer::new(
            &items.iter().map(String::as_str).collect::<Vec<_>>(),
            &[],
        )),
        store: store.clone(),
        notifier: Arc::new(CountingNotifier::default()),
    };

    let tracker = Arc::new(ProgressTracker::default());
    let pipeline = ScanPipeline::new(fast_config(), collaborators, tracker.clone(), cancel);
    let summary = pipeline.run(&request(&["catalog"], analysis_concurrency)).await;

    assert!(summary.cancelled);
    assert_eq!(summary.total_candidates, 20);
    assert!(summary.completed >= 5);
    assert!(summary.completed <= analysis_concurrency);
    assert_eq!(summary.skipped, 20 - summary.completed);
    assert!(summary.is_balanced());
    assert_eq!(fetcher.after_cancel.load(Ordering::SeqCst), 0);

    // Every finished item was persisted in full
    assert_eq!(store.persisted.lock().unwrap().len(), summary.completed);
    assert_eq!(tracker.snapshot().phase, prospect::scan::ScanPhase::Cancelled);
}
