/*!
 * File-backed collaborators for running scans from the command line
 *
 * A fixture is a JSON document listing sources, the item identifiers each
 * source reports, and the raw body the fetcher returns for every item:
 *
 * ```json
 * {
 *   "sources": [{ "name": "kitchen", "locator": "listing://kitchen", "items": ["A", "B"] }],
 *   "items": {
 *     "A": { "body": { "score": 12.5 } },
 *     "B": { "body": { "score": 3.0 }, "transient_failures": 1 }
 *   }
 * }
 * ```
 *
 * `transient_failures` makes the fetcher fail that many times before it
 * succeeds, which exercises the retry and breaker paths without a network.
 */

use crate::error::{Result, ScanError};
use crate::scan::collaborators::{Analyzer, Collaborators, Discoverer, Fetcher, Notifier, Store};
use crate::scan::types::{
    AnalysisResult, CandidateItem, RawItem, ScanSummary, SourceDescriptor, Verdict,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// One source in a fixture file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureSource {
    pub name: String,
    #[serde(default)]
    pub locator: String,
    #[serde(default)]
    pub items: Vec<String>,
    /// Fail discovery for this source outright
    #[serde(default)]
    pub unavailable: bool,
}

/// Raw data for one item in a fixture file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureItem {
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default)]
    pub transient_failures: u32,
}

/// Parsed fixture document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub sources: Vec<FixtureSource>,
    #[serde(default)]
    pub items: HashMap<String, FixtureItem>,
}

impl Fixture {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Source descriptors in file order
    pub fn source_descriptors(&self) -> Vec<SourceDescriptor> {
        self.sources
            .iter()
            .map(|s| SourceDescriptor::new(s.name.clone(), s.locator.clone()))
            .collect()
    }

    fn source(&self, name: &str) -> Option<&FixtureSource> {
        self.sources.iter().find(|s| s.name == name)
    }
}

/// Lists a fixture source's items
#[derive(Debug, Clone)]
pub struct FixtureDiscoverer {
    fixture: Arc<Fixture>,
}

impl FixtureDiscoverer {
    pub fn new(fixture: Arc<Fixture>) -> Self {
        Self { fixture }
    }
}

#[async_trait]
impl Discoverer for FixtureDiscoverer {
    async fn discover(
        &self,
        source: &SourceDescriptor,
        limit: usize,
    ) -> Result<Vec<CandidateItem>> {
        let entry = self.fixture.source(&source.name).ok_or_else(|| ScanError::Discovery {
            source: source.name.clone(),
            reason: "not present in fixture".to_string(),
        })?;
        if entry.unavailable {
            return Err(ScanError::Discovery {
                source: source.name.clone(),
                reason: "listing unavailable".to_string(),
            });
        }

        Ok(entry
            .items
            .iter()
            .take(limit)
            .map(|id| CandidateItem::new(id.clone(), source.name.clone()))
            .collect())
    }
}

/// Returns fixture bodies, failing transiently as configured per item
#[derive(Debug)]
pub struct FixtureFetcher {
    fixture: Arc<Fixture>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl FixtureFetcher {
    pub fn new(fixture: Arc<Fixture>) -> Self {
        Self {
            fixture,
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Fetcher for FixtureFetcher {
    async fn fetch(&self, item: &CandidateItem) -> Result<RawItem> {
        let entry = self
            .fixture
            .items
            .get(&item.id)
            .ok_or_else(|| ScanError::PermanentAnalysis {
                item: item.id.clone(),
                reason: "no data for item".to_string(),
            })?;

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
            let count = attempts.entry(item.id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempt <= entry.transient_failures {
            return Err(ScanError::TransientFetch {
                item: item.id.clone(),
                reason: format!("simulated failure {} of {}", attempt, entry.transient_failures),
            });
        }

        Ok(RawItem {
            item: item.clone(),
            body: entry.body.clone(),
        })
    }
}

/// Accepts items whose numeric `field` is at least `min_value`
///
/// With no field configured every item is accepted.
#[derive(Debug, Clone, Default)]
pub struct ThresholdAnalyzer {
    field: Option<String>,
    min_value: f64,
}

impl ThresholdAnalyzer {
    pub fn accept_all() -> Self {
        Self::default()
    }

    pub fn new(field: impl Into<String>, min_value: f64) -> Self {
        Self {
            field: Some(field.into()),
            min_value,
        }
    }
}

impl Analyzer for ThresholdAnalyzer {
    fn analyze(&self, raw: &RawItem) -> Result<AnalysisResult> {
        let verdict = match &self.field {
            None => Verdict::Accept,
            Some(field) => {
                let value = raw
                    .body
                    .get(field)
                    .and_then(serde_json::Value::as_f64)
                    .ok_or_else(|| ScanError::PermanentAnalysis {
                        item: raw.item.id.clone(),
                        reason: format!("missing numeric field '{}'", field),
                    })?;
                if value >= self.min_value {
                    Verdict::Accept
                } else {
                    Verdict::Reject
                }
            }
        };

        Ok(AnalysisResult {
            item: raw.item.clone(),
            verdict,
            payload: raw.body.clone(),
        })
    }
}

/// One persisted line in a JSON-lines store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub source: String,
    pub payload: serde_json::Value,
}

/// JSON-lines file keyed by item id
///
/// A second persist for the same id replaces the first, so the file never
/// holds duplicates. Every persist writes the full contents to a sibling temp
/// file and renames it over the target, and the in-memory map only changes
/// once that rename succeeds.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    records: tokio::sync::Mutex<BTreeMap<String, StoredRecord>>,
}

impl JsonLinesStore {
    /// Open `path`, loading any records already in it
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut records = BTreeMap::new();
        if path.is_file() {
            let contents = std::fs::read_to_string(&path)?;
            for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                let record: StoredRecord = serde_json::from_str(line)?;
                records.insert(record.id.clone(), record);
            }
        }
        Ok(Self {
            path,
            records: tokio::sync::Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of everything persisted so far, ordered by id
    pub async fn records(&self) -> Vec<StoredRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store.jsonl".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    /// Replace the target file with `contents` via write-then-rename
    async fn replace_file(&self, contents: String) -> std::io::Result<()> {
        let temp = self.temp_path();
        tokio::fs::write(&temp, contents).await?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
                tracing::debug!(path = %temp.display(), error = %cleanup, "temp file left behind");
            }
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl Store for JsonLinesStore {
    async fn persist(&self, result: &AnalysisResult) -> Result<()> {
        let persist_error = |reason: String| ScanError::Persist {
            item: result.item.id.clone(),
            reason,
        };

        let mut records = self.records.lock().await;
        let mut next = records.clone();
        next.insert(
            result.item.id.clone(),
            StoredRecord {
                id: result.item.id.clone(),
                source: result.item.source.clone(),
                payload: result.payload.clone(),
            },
        );

        let mut contents = String::new();
        for record in next.values() {
            let line = serde_json::to_string(record).map_err(|e| persist_error(e.to_string()))?;
            contents.push_str(&line);
            contents.push('\n');
        }
        self.replace_file(contents)
            .await
            .map_err(|e| persist_error(format!("{}: {}", self.path.display(), e)))?;

        *records = next;
        Ok(())
    }
}

/// Store that keeps results in memory only
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: tokio::sync::Mutex<BTreeMap<String, AnalysisResult>>,
}

impl MemoryStore {
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn persist(&self, result: &AnalysisResult) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(result.item.id.clone(), result.clone());
        Ok(())
    }
}

/// Notifier that writes accepted items and scan summaries to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, result: &AnalysisResult) -> Result<()> {
        tracing::info!(item = %result.item.id, source = %result.item.source, "accepted item");
        Ok(())
    }

    async fn notify_scan_completed(&self, summary: &ScanSummary) -> Result<()> {
        tracing::info!(
            scan_id = %summary.scan_id,
            accepted = summary.accepted,
            failed = summary.failed,
            "scan completed"
        );
        Ok(())
    }
}

/// Wire a fixture to the scan collaborator bundle
pub fn collaborators(
    fixture: Arc<Fixture>,
    analyzer: ThresholdAnalyzer,
    store: Arc<dyn Store>,
) -> Collaborators {
    Collaborators {
        discoverer: Arc::new(FixtureDiscoverer::new(fixture.clone())),
        fetcher: Arc::new(FixtureFetcher::new(fixture)),
        analyzer: Arc::new(analyzer),
        store,
        notifier: Arc::new(LogNotifier),
    }
}
