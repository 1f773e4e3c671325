use async_trait::async_trait;
use prospect::config::ScannerConfig;
use prospect::error::{Result, ScanError};
use prospect::scan::{
    self, AnalysisResult, Analyzer, CandidateItem, Collaborators, Discoverer, Fetcher,
    NoopNotifier, RawItem, ScanPhase, ScanRequest, Scanner, Severity, SourceDescriptor, Store,
    Verdict,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Discovers `count` items per source
struct CountDiscoverer(usize);

#[async_trait]
impl Discoverer for CountDiscoverer {
    async fn discover(
        &self,
        source: &SourceDescriptor,
        limit: usize,
    ) -> Result<Vec<CandidateItem>> {
        Ok((0..self.0.min(limit))
            .map(|i| CandidateItem::new(format!("{}-{}", source.name, i), source.name.clone()))
            .collect())
    }
}

/// Fetcher that holds every fetch until released
struct GatedFetcher {
    gate: Arc<Notify>,
    gated: bool,
}

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn fetch(&self, item: &CandidateItem) -> Result<RawItem> {
        if self.gated {
            self.gate.notified().await;
        }
        Ok(RawItem {
            item: item.clone(),
            body: serde_json::json!({ "id": item.id }),
        })
    }
}

struct AcceptEven;

impl Analyzer for AcceptEven {
    fn analyze(&self, raw: &RawItem) -> Result<AnalysisResult> {
        let even = raw
            .item
            .id
            .rsplit('-')
            .next()
            .and_then(|n| n.parse::<usize>().ok())
            .is_some_and(|n| n % 2 == 0);
        Ok(AnalysisResult {
            item: raw.item.clone(),
            verdict: if even { Verdict::Accept } else { Verdict::Reject },
            payload: raw.body.clone(),
        })
    }
}

struct NullStore;

#[async_trait]
impl Store for NullStore {
    async fn persist(&self, _result: &AnalysisResult) -> Result<()> {
        Ok(())
    }
}

fn scanner(items_per_source: usize, gate: Option<Arc<Notify>>) -> Scanner {
    let config = ScannerConfig {
        rate_limit_per_minute: 0,
        progress_log_interval: 0,
        ..ScannerConfig::default()
    };
    let collaborators = Collaborators {
        discoverer: Arc::new(CountDiscoverer(items_per_source)),
        fetcher: Arc::new(GatedFetcher {
            gated: gate.is_some(),
            gate: gate.unwrap_or_default(),
        }),
        analyzer: Arc::new(AcceptEven),
        store: Arc::new(NullStore),
        notifier: Arc::new(NoopNotifier),
    };
    Scanner::new(config, collaborators)
}

fn request(names: &[&str]) -> ScanRequest {
    ScanRequest {
        sources: names.iter().map(|n| SourceDescriptor::new(*n, "")).collect(),
        max_items_per_source: 10,
        discovery_concurrency: 2,
        analysis_concurrency: 4,
    }
}

#[tokio::test]
async fn test_malformed_requests_fail_fast() {
    let scanner = scanner(3, None);

    let empty = ScanRequest {
        sources: Vec::new(),
        ..request(&["a"])
    };
    assert!(matches!(scanner.start_scan(empty), Err(ScanError::InvalidRequest(_))));

    let zero = ScanRequest {
        analysis_concurrency: 0,
        ..request(&["a"])
    };
    let err = scanner.start_scan(zero).unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_handle_reports_progress_and_logs() {
    let scanner = scanner(4, None);
    let handle = scanner.start_scan(request(&["kitchen", "garden"])).unwrap();
    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.scan_id, handle.scan_id());
    assert_eq!(summary.total_candidates, 8);
    assert_eq!(summary.accepted, 4);
    assert_eq!(summary.rejected, 4);
    assert!(handle.is_finished());

    let snap = handle.progress();
    assert_eq!(snap.phase, ScanPhase::Finished);
    assert_eq!(snap.completed, 8);
    assert_eq!(snap.percent, 100.0);

    let first = handle.recent_logs(2);
    assert_eq!(first.len(), 2);
    assert!(first[0].message.contains("started"));
    let rest = handle.recent_logs(1_000);
    assert!(rest.iter().any(|e| e.level == Severity::Success));
    assert!(handle.recent_logs(10).is_empty(), "logs are drained once");
}

#[tokio::test]
async fn test_independent_handles_do_not_share_state() {
    let gate = Arc::new(Notify::new());
    let slow = scanner(2, Some(gate.clone()));
    let fast = scanner(3, None);

    let blocked = slow.start_scan(request(&["slow"])).unwrap();
    let finished = fast.start_scan(request(&["fast"])).unwrap();

    let summary = finished.wait().await.unwrap();
    assert_eq!(summary.completed, 3);
    assert!(!blocked.is_finished());
    assert_ne!(blocked.scan_id(), finished.scan_id());

    blocked.cancel();
    gate.notify_waiters();
    // Fetches that were already parked get released one by one
    for _ in 0..10 {
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let summary = blocked.wait().await.unwrap();
    assert!(summary.cancelled);
    assert!(summary.is_balanced());
    assert_eq!(blocked.progress().phase, ScanPhase::Cancelled);
}

#[tokio::test]
async fn test_default_handle_registry() {
    scan::clear_default_handle();
    assert!(scan::default_handle().is_none());

    let gate = Arc::new(Notify::new());
    let scanner = scanner(1, Some(gate.clone()));

    let first = scanner.start_default_scan(request(&["only"])).unwrap();
    assert_eq!(scan::default_handle().map(|h| h.scan_id()), Some(first.scan_id()));

    // A second default scan is refused while the first is running
    let err = scanner.start_default_scan(request(&["only"])).unwrap_err();
    assert!(matches!(err, ScanError::InvalidRequest(_)));

    while !first.is_finished() {
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    first.wait().await.unwrap();

    let second = scanner.start_default_scan(request(&["only"])).unwrap();
    assert_ne!(second.scan_id(), first.scan_id());
    assert_eq!(scan::default_handle().map(|h| h.scan_id()), Some(second.scan_id()));
    second.cancel();
    gate.notify_one();

    let previous = scan::clear_default_handle();
    assert_eq!(previous.map(|h| h.scan_id()), Some(second.scan_id()));
}
