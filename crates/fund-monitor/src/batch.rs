//! Batch extraction of fund records across one or more browser sessions.
//!
//! The identifier list is split into fixed-size chunks up front. A pool of
//! workers pulls chunks from a shared channel; each worker opens its own
//! session per chunk, logs in once, re-authenticates every `relogin_every`
//! records and sends a [`ChunkResult`] back. The supervisor (the caller of
//! [`BatchScrapeCoordinator::run`]) writes a cumulative checkpoint after each
//! chunk and a consolidated snapshot at the end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tokio::sync::{mpsc, Mutex};

use crate::archive::stamp;
use crate::progress::{ProgressEmitter, ProgressEventKind};
use crate::session::SessionFactory;
use crate::snapshot::SnapshotWriter;
use crate::types::{has_value, Credentials, MonitorResult, Record};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Re-authenticate after this many extractions within a chunk. 0 disables.
    pub relogin_every: usize,
    pub extract_delay: Duration,
    /// Pause between chunks when running with a single worker.
    pub batch_pause: Duration,
    pub session_memory_gb: f64,
    pub parallel: bool,
    pub max_workers: Option<usize>,
    pub output_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            relogin_every: 20,
            extract_delay: Duration::from_secs(2),
            batch_pause: Duration::from_secs(5),
            session_memory_gb: 2.0,
            parallel: false,
            max_workers: None,
            output_dir: PathBuf::from("output"),
        }
    }
}

/// A contiguous slice of the identifier list. `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub identifiers: Vec<String>,
}

/// Split `identifiers` into chunks of at most `batch_size` (minimum 1).
pub fn partition(identifiers: &[String], batch_size: usize) -> Vec<Chunk> {
    identifiers
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(i, ids)| Chunk {
            index: i + 1,
            identifiers: ids.to_vec(),
        })
        .collect()
}

/// `max(1, min(floor(memory / per_session), cpus, chunks))`.
pub fn worker_count(
    total_memory_gb: f64,
    per_session_gb: f64,
    cpu_count: usize,
    chunk_count: usize,
) -> usize {
    let memory_bound = if per_session_gb > 0.0 {
        (total_memory_gb / per_session_gb).floor().max(0.0) as usize
    } else {
        usize::MAX
    };
    memory_bound.min(cpu_count).min(chunk_count).max(1)
}

/// Host resources used to size the worker pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceProbe {
    pub total_memory_gb: f64,
    pub cpu_count: usize,
}

impl ResourceProbe {
    pub fn detect() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_all();
        let cpu_count = match system.cpus().len() {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };
        Self {
            total_memory_gb: system.total_memory() as f64 / BYTES_PER_GB,
            cpu_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedExtraction {
    pub identifier: String,
    pub reason: String,
}

/// What happened to one chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkResult {
    pub index: usize,
    pub worker: usize,
    pub records: Vec<Record>,
    pub failed: Vec<FailedExtraction>,
    /// Identifiers never attempted because the session was lost.
    pub skipped: Vec<String>,
    /// Set when login, re-authentication or the session itself failed.
    pub session_error: Option<String>,
}

impl ChunkResult {
    fn aborted(chunk: &Chunk, worker: usize, reason: String) -> Self {
        Self {
            index: chunk.index,
            worker,
            skipped: chunk.identifiers.clone(),
            session_error: Some(reason),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Complete,
    Partial,
    Failed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// Field coverage of the extracted records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub total: usize,
    pub with_isin: usize,
    pub with_nav: usize,
    pub with_creation_date: usize,
    pub with_administrator: usize,
    pub with_auditor: usize,
}

impl CoverageSummary {
    pub fn from_records(records: &[Record]) -> Self {
        let count = |get: fn(&Record) -> &str| records.iter().filter(|r| has_value(get(r))).count();
        Self {
            total: records.len(),
            with_isin: count(|r| r.secondary_id.as_str()),
            with_nav: count(|r| r.last_valuation.as_str()),
            with_creation_date: count(|r| r.creation_date.as_str()),
            with_administrator: count(|r| r.administrator.as_str()),
            with_auditor: count(|r| r.auditor.as_str()),
        }
    }

    /// Share of records with a value, in percent. 0 when empty.
    pub fn percent(&self, count: usize) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        count as f64 / self.total as f64 * 100.0
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub run_id: String,
    pub status: BatchStatus,
    pub workers: usize,
    pub total_identifiers: usize,
    /// Per-chunk results ordered by chunk index.
    pub chunks: Vec<ChunkResult>,
    pub checkpoints: Vec<PathBuf>,
    pub final_snapshot: Option<PathBuf>,
    pub coverage: CoverageSummary,
    /// Checkpoint and final snapshot writes that failed. The records stay in
    /// `chunks` either way.
    pub checkpoint_errors: Vec<String>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> usize {
        self.chunks.iter().map(|c| c.records.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.chunks.iter().map(|c| c.failed.len()).sum()
    }

    pub fn skipped(&self) -> usize {
        self.chunks.iter().map(|c| c.skipped.len()).sum()
    }

    /// All extracted records in chunk order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.chunks.iter().flat_map(|c| c.records.iter())
    }
}

pub struct BatchScrapeCoordinator {
    factory: Arc<dyn SessionFactory>,
    credentials: Credentials,
    config: BatchConfig,
    progress: ProgressEmitter,
}

impl BatchScrapeCoordinator {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        credentials: Credentials,
        config: BatchConfig,
    ) -> Self {
        Self {
            factory,
            credentials,
            config,
            progress: ProgressEmitter::disabled(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressEmitter) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn plan_workers(&self, chunk_count: usize) -> usize {
        if !self.config.parallel {
            return 1;
        }
        let probe = ResourceProbe::detect();
        let workers = worker_count(
            probe.total_memory_gb,
            self.config.session_memory_gb,
            probe.cpu_count,
            chunk_count,
        );
        let workers = self.config.max_workers.map_or(workers, |m| workers.min(m.max(1)));
        tracing::info!(
            "Using {workers} workers ({:.1} GB memory, {} CPUs, {chunk_count} chunks)",
            probe.total_memory_gb,
            probe.cpu_count
        );
        workers
    }

    /// Scrape every identifier. Per-item and per-chunk failures are folded
    /// into the outcome, and so are failed snapshot writes, which land in
    /// `checkpoint_errors` while the run keeps collecting results.
    pub async fn run(&mut self, identifiers: &[String]) -> MonitorResult<BatchOutcome> {
        let run_stamp = stamp(chrono::Local::now().naive_local());
        let chunks = partition(identifiers, self.config.batch_size);
        let workers = self.plan_workers(chunks.len());
        tracing::info!(
            "Scraping {} identifiers in {} chunks of up to {}",
            identifiers.len(),
            chunks.len(),
            self.config.batch_size
        );

        let (task_tx, task_rx) = mpsc::channel::<Chunk>(chunks.len().max(1));
        for chunk in &chunks {
            // Capacity covers every chunk, so this never waits.
            let _ = task_tx.send(chunk.clone()).await;
        }
        drop(task_tx);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<ChunkResult>();

        let shared = Arc::new(WorkerContext {
            factory: Arc::clone(&self.factory),
            credentials: self.credentials.clone(),
            config: self.config.clone(),
            sequential: workers == 1,
        });
        let mut handles = Vec::with_capacity(workers);
        for worker in 1..=workers {
            let ctx = Arc::clone(&shared);
            let tasks = Arc::clone(&task_rx);
            let results = result_tx.clone();
            let progress = self.progress.clone();
            handles.push(tokio::spawn(async move {
                ctx.work(worker, tasks, results, progress).await;
            }));
        }
        drop(result_tx);

        let mut completed: Vec<ChunkResult> = Vec::with_capacity(chunks.len());
        let mut gathered: Vec<Record> = Vec::new();
        let mut checkpoints = Vec::new();
        let mut checkpoint_errors = Vec::new();
        while let Some(result) = result_rx.recv().await {
            tracing::info!(
                "Chunk {} finished: {} ok, {} failed, {} skipped",
                result.index,
                result.records.len(),
                result.failed.len(),
                result.skipped.len()
            );
            gathered.extend(result.records.iter().cloned());
            completed.push(result);

            if !gathered.is_empty() {
                let path = self
                    .config
                    .output_dir
                    .join(format!("batch_{}_{run_stamp}.csv", completed.len()));
                match SnapshotWriter::write(&path, &gathered) {
                    Ok(()) => {
                        self.progress.emit(ProgressEventKind::CheckpointWritten {
                            path: path.display().to_string(),
                            records: gathered.len(),
                        });
                        checkpoints.push(path);
                    }
                    Err(e) => {
                        tracing::error!("Checkpoint {} not written: {e}", path.display());
                        self.progress.emit(ProgressEventKind::Warning {
                            message: format!("checkpoint {} not written: {e}", path.display()),
                        });
                        checkpoint_errors.push(format!("{}: {e}", path.display()));
                    }
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Scrape worker terminated abnormally: {e}");
            }
        }

        for chunk in &chunks {
            if !completed.iter().any(|c| c.index == chunk.index) {
                completed.push(ChunkResult::aborted(
                    chunk,
                    0,
                    "worker terminated before reporting".to_string(),
                ));
            }
        }
        completed.sort_by_key(|c| c.index);

        let mut outcome = BatchOutcome {
            run_id: self.progress.run_id().to_string(),
            status: BatchStatus::Complete,
            workers,
            total_identifiers: identifiers.len(),
            chunks: completed,
            checkpoints,
            final_snapshot: None,
            coverage: CoverageSummary::default(),
            checkpoint_errors,
        };
        let records: Vec<Record> = outcome.records().cloned().collect();
        outcome.coverage = CoverageSummary::from_records(&records);
        outcome.status = if outcome.succeeded() == identifiers.len() {
            BatchStatus::Complete
        } else if outcome.succeeded() == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        };

        if !records.is_empty() {
            let path = self
                .config
                .output_dir
                .join(format!("scrape_complete_{run_stamp}.csv"));
            match SnapshotWriter::write(&path, &records) {
                Ok(()) => {
                    tracing::info!("Final snapshot saved: {}", path.display());
                    outcome.final_snapshot = Some(path);
                }
                Err(e) => {
                    tracing::error!("Final snapshot {} not written: {e}", path.display());
                    outcome
                        .checkpoint_errors
                        .push(format!("{}: {e}", path.display()));
                }
            }
        }

        match outcome.status {
            BatchStatus::Complete => tracing::info!(
                "Scrape complete: {} records",
                outcome.succeeded()
            ),
            BatchStatus::Partial => tracing::warn!(
                "Scrape partial: {} of {} records ({} failed, {} skipped)",
                outcome.succeeded(),
                identifiers.len(),
                outcome.failed(),
                outcome.skipped()
            ),
            BatchStatus::Failed => tracing::error!(
                "Scrape failed: no records extracted from {} identifiers",
                identifiers.len()
            ),
        }
        Ok(outcome)
    }
}

struct WorkerContext {
    factory: Arc<dyn SessionFactory>,
    credentials: Credentials,
    config: BatchConfig,
    sequential: bool,
}

impl WorkerContext {
    async fn work(
        &self,
        worker: usize,
        tasks: Arc<Mutex<mpsc::Receiver<Chunk>>>,
        results: mpsc::UnboundedSender<ChunkResult>,
        mut progress: ProgressEmitter,
    ) {
        let mut first = true;
        loop {
            let next = tasks.lock().await.recv().await;
            let Some(chunk) = next else {
                break;
            };
            if self.sequential && !first && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
            first = false;

            let result = self.scrape_chunk(worker, &chunk, &mut progress).await;
            progress.emit(ProgressEventKind::ChunkCompleted {
                chunk: result.index,
                succeeded: result.records.len(),
                failed: result.failed.len(),
                skipped: result.skipped.len(),
            });
            if results.send(result).is_err() {
                break;
            }
        }
        tracing::debug!("Worker {worker} finished");
    }

    async fn scrape_chunk(
        &self,
        worker: usize,
        chunk: &Chunk,
        progress: &mut ProgressEmitter,
    ) -> ChunkResult {
        progress.emit(ProgressEventKind::ChunkStarted {
            chunk: chunk.index,
            worker,
            size: chunk.identifiers.len(),
        });

        let mut session = match self.factory.open().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Chunk {}: could not open session: {e}", chunk.index);
                return ChunkResult::aborted(chunk, worker, e.to_string());
            }
        };
        match session.submit_credentials(&self.credentials).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!("Chunk {}: login rejected", chunk.index);
                let _ = session.close().await;
                return ChunkResult::aborted(chunk, worker, "login rejected".to_string());
            }
            Err(e) => {
                tracing::error!("Chunk {}: login failed: {e}", chunk.index);
                let _ = session.close().await;
                return ChunkResult::aborted(chunk, worker, e.to_string());
            }
        }

        let mut result = ChunkResult {
            index: chunk.index,
            worker,
            ..ChunkResult::default()
        };
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        let total = chunk.identifiers.len();

        for (i, identifier) in chunk.identifiers.iter().enumerate() {
            if i > 0 && self.config.relogin_every > 0 && i % self.config.relogin_every == 0 {
                tracing::info!("Chunk {}: re-authenticating after {i} records", chunk.index);
                let reason = match session.submit_credentials(&self.credentials).await {
                    Ok(true) => None,
                    Ok(false) => Some("re-authentication rejected".to_string()),
                    Err(e) => Some(format!("re-authentication failed: {e}")),
                };
                if let Some(reason) = reason {
                    tracing::warn!(
                        "Chunk {}: {reason}; skipping {} remaining identifiers",
                        chunk.index,
                        total - i
                    );
                    result.skipped = chunk.identifiers[i..].to_vec();
                    result.session_error = Some(reason);
                    break;
                }
            }

            let ok = match session.extract_record(identifier).await {
                Ok(mut record) => {
                    if !has_value(&record.primary_id) {
                        record.primary_id = identifier.clone();
                    }
                    if !has_value(&record.extraction_date) {
                        record.extraction_date = today.clone();
                    }
                    tracing::debug!("Extracted {} ({})", record.primary_id, record.name);
                    result.records.push(record);
                    true
                }
                Err(e) => {
                    tracing::warn!("Failed to extract {identifier}: {e}");
                    result.failed.push(FailedExtraction {
                        identifier: identifier.clone(),
                        reason: e.to_string(),
                    });
                    false
                }
            };
            progress.emit(ProgressEventKind::RecordExtracted {
                chunk: chunk.index,
                identifier: identifier.clone(),
                ok,
            });

            if i + 1 < total && !self.config.extract_delay.is_zero() {
                tokio::time::sleep(self.config.extract_delay).await;
            }
        }

        if let Err(e) = session.close().await {
            tracing::warn!("Chunk {}: error closing session: {e}", chunk.index);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("u{i}")).collect()
    }

    #[test]
    fn test_partition_sizes() {
        let chunks = partition(&ids(120), 50);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].index, 1);
        assert_eq!(chunks[2].identifiers.len(), 20);
        assert_eq!(chunks[2].identifiers[0], "u101");
        assert!(partition(&[], 50).is_empty());
        assert_eq!(partition(&ids(3), 0).len(), 3);
    }

    #[test]
    fn test_worker_count_bounds() {
        assert_eq!(worker_count(16.0, 2.0, 4, 10), 4);
        assert_eq!(worker_count(16.0, 2.0, 32, 10), 8);
        assert_eq!(worker_count(16.0, 2.0, 32, 3), 3);
        assert_eq!(worker_count(1.0, 2.0, 8, 10), 1);
        assert_eq!(worker_count(16.0, 2.0, 8, 0), 1);
        assert_eq!(worker_count(16.0, 0.0, 6, 10), 6);
    }

    #[test]
    fn test_coverage_ignores_sentinels() {
        let mut a = Record::new("u1");
        a.secondary_id = "LU1".into();
        a.auditor = "-".into();
        a.last_valuation = "12.3".into();
        let mut b = Record::new("u2");
        b.secondary_id = "nan".into();
        b.auditor = "Audit Co".into();

        let cov = CoverageSummary::from_records(&[a, b]);
        assert_eq!(cov.total, 2);
        assert_eq!(cov.with_isin, 1);
        assert_eq!(cov.with_auditor, 1);
        assert_eq!(cov.with_nav, 1);
        assert_eq!(cov.with_administrator, 0);
        assert!((cov.percent(cov.with_isin) - 50.0).abs() < 1e-9);
        assert_eq!(CoverageSummary::default().percent(0), 0.0);
    }

    #[test]
    fn test_probe_reports_at_least_one_cpu() {
        let probe = ResourceProbe::detect();
        assert!(probe.cpu_count >= 1);
        assert!(probe.total_memory_gb >= 0.0);
    }
}
