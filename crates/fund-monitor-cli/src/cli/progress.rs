//! Terminal progress bars driven by pipeline progress events.

use std::time::Duration;

use fund_monitor::progress::{self, ProgressReceiver, ProgressSender};
use fund_monitor::{ProgressEmitter, ProgressEventKind};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::output;

/// A progress channel plus the task rendering it.
pub struct ProgressView {
    tx: ProgressSender,
    task: JoinHandle<()>,
}

impl ProgressView {
    /// Bar over discovery searches. The length grows as strategies start.
    pub fn discovery() -> Self {
        Self::spawn(0, "searching")
    }

    /// Bar over `total` identifiers being scraped.
    pub fn scrape(total: usize) -> Self {
        Self::spawn(total as u64, "scraping")
    }

    fn spawn(total: u64, label: &'static str) -> Self {
        let (tx, rx) = progress::channel();
        let bar = new_bar(total, label);
        let task = tokio::spawn(render(rx, bar));
        Self { tx, task }
    }

    /// An emitter stamping events with `run_id`.
    pub fn emitter(&self, run_id: &str) -> ProgressEmitter {
        ProgressEmitter::new(Some(self.tx.clone()), run_id)
    }

    /// Close the channel and wait for the bar to finish drawing.
    pub async fn finish(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

fn new_bar(total: u64, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if output::is_json() || output::is_quiet() {
        bar.set_draw_target(ProgressDrawTarget::hidden());
        return bar;
    }
    let style = ProgressStyle::with_template(
        "{spinner} {prefix:>9} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar.set_prefix(label.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

async fn render(mut rx: ProgressReceiver, bar: ProgressBar) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                tracing::debug!("Progress view skipped {missed} events");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event.event {
            ProgressEventKind::StrategyStarted {
                strategy,
                candidates,
            } => {
                bar.inc_length(candidates as u64);
                bar.set_message(strategy);
            }
            ProgressEventKind::CandidateSearched {
                candidate, failed, ..
            } => {
                bar.inc(1);
                if failed {
                    bar.println(format!("  [!!] search failed: {candidate}"));
                }
            }
            ProgressEventKind::StrategyCompleted {
                strategy,
                new_unique,
                ..
            } => {
                bar.println(format!("  [OK] {strategy}: {new_unique} new"));
            }
            ProgressEventKind::ChunkStarted { chunk, worker, .. } => {
                bar.set_message(format!("chunk {chunk} (worker {worker})"));
            }
            ProgressEventKind::RecordExtracted { .. } => bar.inc(1),
            ProgressEventKind::ChunkCompleted {
                chunk,
                succeeded,
                failed,
                skipped,
            } => {
                bar.inc(skipped as u64);
                bar.println(format!(
                    "  [{}] chunk {chunk}: {succeeded} ok, {failed} failed, {skipped} skipped",
                    if failed + skipped == 0 { "OK" } else { "!!" }
                ));
            }
            ProgressEventKind::CheckpointWritten { path, records } => {
                bar.set_message(format!("checkpoint {records} records -> {path}"));
            }
            ProgressEventKind::Warning { message } => {
                bar.println(format!("  [!!] {message}"));
            }
        }
    }
    bar.finish_and_clear();
}
