//! Progress events and broadcast channel for pipeline telemetry.
//!
//! Discovery and batch scraping emit `ProgressEvent`s through a
//! `tokio::sync::broadcast` channel to whoever listens (progress bars, logs).
//! When nobody listens, events are dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A progress event emitted during a discovery or scrape run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The run this event belongs to.
    pub run_id: String,
    /// Increasing sequence number, shared by every clone of the emitter.
    pub seq: u64,
    pub event: ProgressEventKind,
}

/// The specific kind of progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEventKind {
    /// A discovery strategy started iterating its candidates.
    StrategyStarted { strategy: String, candidates: usize },
    /// One search candidate finished.
    CandidateSearched {
        strategy: String,
        candidate: String,
        returned: usize,
        new_unique: usize,
        failed: bool,
    },
    /// A discovery strategy finished all candidates.
    StrategyCompleted {
        strategy: String,
        new_unique: usize,
        elapsed_ms: u64,
    },
    /// A scrape chunk was picked up by a worker.
    ChunkStarted {
        chunk: usize,
        worker: usize,
        size: usize,
    },
    /// One identifier was processed inside a chunk.
    RecordExtracted {
        chunk: usize,
        identifier: String,
        ok: bool,
    },
    /// A scrape chunk finished (possibly aborted early).
    ChunkCompleted {
        chunk: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },
    /// A cumulative checkpoint file was written.
    CheckpointWritten { path: String, records: usize },
    /// A non-fatal warning.
    Warning { message: String },
}

pub type ProgressSender = tokio::sync::broadcast::Sender<ProgressEvent>;

pub type ProgressReceiver = tokio::sync::broadcast::Receiver<ProgressEvent>;

/// Create a new progress channel with a bounded buffer.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    tokio::sync::broadcast::channel(1024)
}

/// Per-run emitter that stamps run id and sequence numbers. Clones handed to
/// workers draw from the same counter.
#[derive(Debug, Clone)]
pub struct ProgressEmitter {
    tx: Option<ProgressSender>,
    run_id: String,
    seq: Arc<AtomicU64>,
}

impl ProgressEmitter {
    pub fn new(tx: Option<ProgressSender>, run_id: impl Into<String>) -> Self {
        Self {
            tx,
            run_id: run_id.into(),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// An emitter that drops everything.
    pub fn disabled() -> Self {
        Self::new(None, "")
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Emit an event, ignoring send errors (no receivers).
    pub fn emit(&mut self, event: ProgressEventKind) {
        if let Some(ref sender) = self.tx {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
            let _ = sender.send(ProgressEvent {
                run_id: self.run_id.clone(),
                seq,
                event,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ProgressEvent {
            run_id: "run-1".to_string(),
            seq: 3,
            event: ProgressEventKind::ChunkCompleted {
                chunk: 2,
                succeeded: 18,
                failed: 1,
                skipped: 1,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"ChunkCompleted\""));

        let parsed: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.run_id, "run-1");
        assert_eq!(parsed.seq, 3);
    }

    #[test]
    fn test_emit_without_receivers_does_not_panic() {
        let (tx, rx) = channel();
        drop(rx);
        let mut emitter = ProgressEmitter::new(Some(tx), "run");
        emitter.emit(ProgressEventKind::Warning {
            message: "nobody listening".to_string(),
        });
    }

    #[test]
    fn test_disabled_emitter_is_noop() {
        let mut emitter = ProgressEmitter::disabled();
        emitter.emit(ProgressEventKind::Warning {
            message: "dropped".to_string(),
        });
        assert_eq!(emitter.seq.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let (tx, mut rx) = channel();
        let mut emitter = ProgressEmitter::new(Some(tx), "run-7");
        emitter.emit(ProgressEventKind::StrategyStarted {
            strategy: "S".into(),
            candidates: 2,
        });
        emitter.emit(ProgressEventKind::StrategyCompleted {
            strategy: "S".into(),
            new_unique: 0,
            elapsed_ms: 5,
        });
        assert_eq!(rx.try_recv().unwrap().seq, 1);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.seq, 2);
        assert_eq!(second.run_id, "run-7");
    }

    #[tokio::test]
    async fn test_cloned_emitters_share_sequence() {
        let (tx, mut rx) = channel();
        let emitter = ProgressEmitter::new(Some(tx), "run-9");
        let mut handles = Vec::new();
        for worker in 0..4 {
            let mut emitter = emitter.clone();
            handles.push(tokio::spawn(async move {
                for chunk in 0..5 {
                    emitter.emit(ProgressEventKind::ChunkStarted {
                        chunk,
                        worker,
                        size: 1,
                    });
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut seqs = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seqs.push(event.seq);
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=20).collect::<Vec<u64>>());
    }
}
