/*!
 * Scan orchestration: discovery, analysis and progress reporting
 */

pub mod collaborators;
pub mod handle;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod types;

pub use collaborators::{
    Analyzer, Collaborators, Discoverer, Fetcher, NoopNotifier, Notifier, SerializedStore, Store,
};
pub use handle::{
    clear_default_handle, default_handle, set_default_handle, ScanHandle, Scanner,
};
pub use pipeline::ScanPipeline;
pub use pool::{TaskLabel, WorkerPool};
pub use progress::{ItemStatus, LogEntry, ProgressSnapshot, ProgressTracker, Severity};
pub use types::{
    AnalysisResult, CandidateItem, RawItem, ScanPhase, ScanRequest, ScanSummary,
    SourceDescriptor, Verdict,
};
