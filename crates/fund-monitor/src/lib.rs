//! Fund monitor: discovery, batch extraction and monthly change detection for a fund catalog site.

pub mod archive;
pub mod batch;
pub mod config;
pub mod detector;
pub mod discovery;
pub mod identifiers;
pub mod journal;
pub mod progress;
pub mod session;
pub mod snapshot;
pub mod tracker;
pub mod types;

pub use archive::{ComparisonStatus, MonthlyArchiver, MonthlyComparison, PeriodLabel};
pub use batch::{
    partition, worker_count, BatchConfig, BatchOutcome, BatchScrapeCoordinator, BatchStatus,
    ChunkResult, CoverageSummary, ResourceProbe,
};
pub use config::{credentials_from_env, MonitorConfig};
pub use detector::{ChangeDetector, DetectionSummary, Ledger, LedgerArtifacts};
pub use discovery::{
    DiscoveryOrchestrator, DiscoveryReport, DiscoveryState, DiscoveryStrategy,
    ServiceProviderRoster,
};
pub use identifiers::{merge_identifiers, read_identifiers, window, write_identifiers};
pub use journal::{JournalEntry, RunJournal};
pub use progress::{ProgressEmitter, ProgressEvent, ProgressEventKind};
pub use session::{BrowserSession, SearchCriteria, SessionFactory};
pub use snapshot::{Snapshot, SnapshotLoader, SnapshotWriter};
pub use tracker::{StrategyAnalytics, StrategyMetrics, StrategyTracker};
pub use types::*;

/// A fresh identifier for one pipeline run.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
