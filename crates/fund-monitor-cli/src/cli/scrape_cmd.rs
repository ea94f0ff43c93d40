//! `fund-monitor scrape`: extract records for a list of fund identifiers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use fund_monitor::{
    credentials_from_env, merge_identifiers, read_identifiers, window, BatchOutcome,
    BatchScrapeCoordinator, BatchStatus, JournalEntry, MonitorConfig, MonthlyArchiver,
    SessionFactory,
};
use serde_json::json;

use super::discover_cmd::{self, DiscoverOptions};
use super::progress::ProgressView;
use super::{monthly_cmd, output};

#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    /// Seed identifier list.
    pub urls: Option<PathBuf>,
    /// Run discovery first and merge its results with the seed list.
    pub discover: bool,
    pub discover_options: DiscoverOptions,
    pub start_index: usize,
    pub max_items: Option<usize>,
    pub parallel: bool,
    pub max_workers: Option<usize>,
    /// Archive the final snapshot and compare it with the previous month.
    pub monthly: bool,
}

/// Entry point for the `scrape` subcommand.
pub async fn run(config: &MonitorConfig, options: &ScrapeOptions) -> Result<()> {
    let started = Instant::now();
    let run_id = fund_monitor::new_run_id();
    let credentials = credentials_from_env()?;
    let factory: Arc<dyn SessionFactory> = Arc::new(super::session_factory(config)?);

    let seed = match &options.urls {
        Some(path) => read_identifiers(path)
            .with_context(|| format!("could not read identifier list {}", path.display()))?,
        None => Vec::new(),
    };
    let discovered = if options.discover {
        let (report, _) = discover_cmd::discover(
            config,
            Arc::clone(&factory),
            &credentials,
            &options.discover_options,
            &run_id,
        )
        .await?;
        report.identifiers
    } else {
        Vec::new()
    };

    let merged = merge_identifiers(&seed, &discovered);
    if merged.is_empty() {
        bail!("no identifiers to scrape (pass --urls and/or --discover)");
    }
    let identifiers = window(&merged, options.start_index, options.max_items);
    tracing::info!(
        "Scrape plan: {} seed + {} discovered = {} unique, {} selected from index {}",
        seed.len(),
        discovered.len(),
        merged.len(),
        identifiers.len(),
        options.start_index
    );

    let mut batch = config.batch_config();
    batch.parallel = options.parallel;
    batch.max_workers = options.max_workers;

    let view = ProgressView::scrape(identifiers.len());
    let mut coordinator = BatchScrapeCoordinator::new(factory, credentials, batch)
        .with_progress(view.emitter(&run_id));
    let outcome = coordinator.run(&identifiers).await;
    view.finish().await;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            super::record_run(
                &config.output_dir,
                &JournalEntry::new(&run_id, "scrape", "failed", super::elapsed_ms(started))
                    .with_detail(format!("{e:#}")),
            );
            return Err(e.into());
        }
    };

    super::record_run(
        &config.output_dir,
        &JournalEntry::new(
            &run_id,
            "scrape",
            outcome.status.as_str(),
            super::elapsed_ms(started),
        )
        .with_counts(outcome.succeeded(), outcome.failed() + outcome.skipped())
        .with_detail(format!("{} workers, {} chunks", outcome.workers, outcome.chunks.len())),
    );
    print_outcome(&outcome);

    if outcome.status == BatchStatus::Failed {
        bail!(
            "scrape failed: none of {} identifiers could be extracted",
            outcome.total_identifiers
        );
    }

    if options.monthly {
        if let Some(snapshot) = &outcome.final_snapshot {
            let archiver = MonthlyArchiver::new(&config.archive_dir);
            monthly_cmd::compare_and_report(config, &archiver, snapshot, None)?;
        }
    }
    Ok(())
}

fn print_outcome(outcome: &BatchOutcome) {
    let coverage = &outcome.coverage;
    if output::is_json() {
        let chunks: Vec<_> = outcome
            .chunks
            .iter()
            .map(|c| {
                json!({
                    "index": c.index,
                    "worker": c.worker,
                    "succeeded": c.records.len(),
                    "failed": c.failed,
                    "skipped": c.skipped.len(),
                    "session_error": c.session_error,
                })
            })
            .collect();
        output::print_json(&json!({
            "run_id": outcome.run_id,
            "status": outcome.status,
            "workers": outcome.workers,
            "total_identifiers": outcome.total_identifiers,
            "succeeded": outcome.succeeded(),
            "failed": outcome.failed(),
            "skipped": outcome.skipped(),
            "chunks": chunks,
            "checkpoints": outcome.checkpoints,
            "final_snapshot": outcome.final_snapshot,
            "checkpoint_errors": outcome.checkpoint_errors,
            "coverage": coverage,
        }));
        return;
    }

    output::heading(&format!("Scrape {}", outcome.status.as_str()));
    output::field("Identifiers", outcome.total_identifiers);
    output::field("Workers", outcome.workers);
    output::field("Succeeded", outcome.succeeded());
    output::field("Failed", outcome.failed());
    output::field("Skipped", outcome.skipped());
    for chunk in outcome.chunks.iter().filter(|c| c.session_error.is_some()) {
        output::line(format!(
            "  [!!] chunk {}: {}",
            chunk.index,
            chunk.session_error.as_deref().unwrap_or_default()
        ));
    }
    for error in &outcome.checkpoint_errors {
        output::line(format!("  [!!] snapshot not written: {error}"));
    }
    output::line("");
    output::line("Coverage:");
    for (label, count) in [
        ("ISIN", coverage.with_isin),
        ("Last NAV", coverage.with_nav),
        ("Fund creation date", coverage.with_creation_date),
        ("Central administration", coverage.with_administrator),
        ("Auditor", coverage.with_auditor),
    ] {
        output::field(
            label,
            format!("{count}/{} ({:.1}%)", coverage.total, coverage.percent(count)),
        );
    }
    if let Some(path) = &outcome.final_snapshot {
        output::line("");
        output::field("Snapshot", path.display());
    }
}
