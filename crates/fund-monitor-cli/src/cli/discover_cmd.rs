//! `fund-monitor discover`: find fund identifiers through catalog searches.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use fund_monitor::discovery::{
    DiscoveryArtifacts, ISIN_PATTERN_STRATEGY, LEGAL_STRUCTURE_STRATEGY,
};
use fund_monitor::{
    credentials_from_env, Credentials, DiscoveryOrchestrator, DiscoveryReport, DiscoveryStrategy,
    JournalEntry, MonitorConfig, ServiceProviderRoster, SessionFactory,
};
use serde_json::json;

use super::output;
use super::progress::ProgressView;

/// Which strategies a discovery run uses.
#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    /// Service provider roster (`Category`, `Value`, `Text`).
    pub roster: Option<PathBuf>,
    pub skip_isin_patterns: bool,
    pub skip_legal_structures: bool,
}

/// Build the strategy list. An unreadable roster only disables the
/// service-provider strategies.
pub fn plan_strategies(options: &DiscoverOptions) -> Vec<DiscoveryStrategy> {
    let roster = options.roster.as_deref().and_then(|path| {
        match ServiceProviderRoster::load(path) {
            Ok(roster) if roster.is_empty() => {
                tracing::warn!("Service provider roster {} is empty", path.display());
                None
            }
            Ok(roster) => Some(roster),
            Err(e) => {
                tracing::warn!("Could not load service provider roster: {e}");
                None
            }
        }
    });

    DiscoveryStrategy::default_catalogue(roster.as_ref())
        .into_iter()
        .filter(|s| !(options.skip_isin_patterns && s.name == ISIN_PATTERN_STRATEGY))
        .filter(|s| !(options.skip_legal_structures && s.name == LEGAL_STRUCTURE_STRATEGY))
        .collect()
}

/// Run a full discovery: login, every strategy, persist the results.
/// The browser session is always closed.
pub async fn discover(
    config: &MonitorConfig,
    factory: Arc<dyn SessionFactory>,
    credentials: &Credentials,
    options: &DiscoverOptions,
    run_id: &str,
) -> Result<(DiscoveryReport, DiscoveryArtifacts)> {
    let strategies = plan_strategies(options);
    tracing::info!("Starting discovery with {} strategies", strategies.len());

    let session = factory.open().await.context("could not open browser session")?;
    let view = ProgressView::discovery();
    let mut orchestrator = DiscoveryOrchestrator::new(session, config.request_delay)
        .with_progress(view.emitter(run_id));

    let outcome = drive(
        &mut orchestrator,
        credentials,
        &strategies,
        &config.output_dir,
    )
    .await;
    view.finish().await;

    if let Err(e) = orchestrator.close().await {
        tracing::warn!("Failed to close browser session: {e}");
    }
    outcome
}

async fn drive(
    orchestrator: &mut DiscoveryOrchestrator,
    credentials: &Credentials,
    strategies: &[DiscoveryStrategy],
    output_dir: &Path,
) -> Result<(DiscoveryReport, DiscoveryArtifacts)> {
    orchestrator
        .establish_session(credentials)
        .await
        .context("login failed")?;
    orchestrator.run(strategies).await?;
    let report = orchestrator.finalize()?;
    let artifacts = orchestrator.persist(output_dir, &super::now_stamp())?;
    Ok((report, artifacts))
}

/// Entry point for the `discover` subcommand.
pub async fn run(config: &MonitorConfig, options: &DiscoverOptions) -> Result<()> {
    let started = Instant::now();
    let run_id = fund_monitor::new_run_id();
    let credentials = credentials_from_env()?;
    let factory: Arc<dyn SessionFactory> = Arc::new(super::session_factory(config)?);

    let result = discover(config, factory, &credentials, options, &run_id).await;
    let (report, artifacts) = match result {
        Ok(done) => done,
        Err(e) => {
            super::record_run(
                &config.output_dir,
                &JournalEntry::new(&run_id, "discover", "failed", super::elapsed_ms(started))
                    .with_detail(format!("{e:#}")),
            );
            return Err(e);
        }
    };

    super::record_run(
        &config.output_dir,
        &JournalEntry::new(&run_id, "discover", "complete", super::elapsed_ms(started))
            .with_counts(report.identifiers.len(), 0)
            .with_detail(format!("{} duplicates saved", report.duplicates_saved)),
    );
    print_report(&report, &artifacts);
    Ok(())
}

fn print_report(report: &DiscoveryReport, artifacts: &DiscoveryArtifacts) {
    if output::is_json() {
        output::print_json(&json!({
            "run_id": report.run_id,
            "status": "complete",
            "unique_identifiers": report.identifiers.len(),
            "total_found": report.total_found,
            "duplicates_saved": report.duplicates_saved,
            "analytics": report.analytics,
            "files": {
                "identifiers": artifacts.identifiers,
                "analytics_json": artifacts.analytics_json,
                "analytics_csv": artifacts.analytics_csv,
            },
        }));
        return;
    }

    output::heading("Discovery complete");
    output::field("Unique identifiers", report.identifiers.len());
    output::field("Total found", report.total_found);
    output::field("Duplicates saved", report.duplicates_saved);
    output::line("");
    for (name, a) in &report.analytics {
        output::line(format!(
            "  {name:<32} {:>6} found {:>6} new {:>4} attempts {:>7.1}%",
            a.total_urls_found, a.total_success_count, a.total_attempts, a.success_rate
        ));
    }
    output::line("");
    output::field("Identifiers", artifacts.identifiers.display());
    output::field("Analytics", artifacts.analytics_json.display());
}
