//! `fund-monitor monthly`: archive a snapshot and compare it with last month.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use fund_monitor::{
    ComparisonStatus, JournalEntry, MonitorConfig, MonthlyArchiver, MonthlyComparison,
    PeriodLabel,
};
use serde_json::json;

use super::compare_cmd::print_summary;
use super::output;

/// Entry point for the `monthly` subcommand.
pub async fn run(
    config: &MonitorConfig,
    snapshot: &Path,
    period: Option<&str>,
) -> Result<()> {
    let period = period
        .map(str::parse::<PeriodLabel>)
        .transpose()
        .context("invalid --period")?;
    let archiver = MonthlyArchiver::new(&config.archive_dir);
    compare_and_report(config, &archiver, snapshot, period)?;
    Ok(())
}

/// Archive `snapshot`, compare against the previous period, journal and print.
pub fn compare_and_report(
    config: &MonitorConfig,
    archiver: &MonthlyArchiver,
    snapshot: &Path,
    period: Option<PeriodLabel>,
) -> Result<MonthlyComparison> {
    let started = Instant::now();
    let run_id = fund_monitor::new_run_id();
    let period = period.unwrap_or_else(PeriodLabel::current);

    let comparison = match archiver.run_monthly_comparison_for(snapshot, period) {
        Ok(comparison) => comparison,
        Err(e) => {
            super::record_run(
                &config.output_dir,
                &JournalEntry::new(&run_id, "monthly", "failed", super::elapsed_ms(started))
                    .with_detail(format!("{period}: {e}")),
            );
            return Err(e).context("monthly comparison failed");
        }
    };

    super::record_run(
        &config.output_dir,
        &JournalEntry::new(
            &run_id,
            "monthly",
            comparison.status.as_str(),
            super::elapsed_ms(started),
        )
        .with_counts(comparison.ledger.len(), 0)
        .with_detail(period.to_string()),
    );
    print_comparison(&comparison);
    Ok(comparison)
}

fn print_comparison(comparison: &MonthlyComparison) {
    if output::is_json() {
        output::print_json(&json!({
            "period": comparison.period.to_string(),
            "status": comparison.status,
            "archived": comparison.archived,
            "previous": comparison.previous,
            "summary": comparison.ledger.summary(),
            "reports": comparison.reports.as_ref().map(|r| json!({
                "summary_report": r.summary_report,
                "detailed_csv": r.detailed_csv,
                "by_kind": r.by_kind,
            })),
        }));
        return;
    }

    output::heading(&format!("Monthly comparison {}", comparison.period));
    output::field("Archived", comparison.archived.display());
    match comparison.status {
        ComparisonStatus::NoBaseline => {
            output::line("  No previous period found. This snapshot is the new baseline.");
        }
        ComparisonStatus::Compared => {
            if let Some(previous) = &comparison.previous {
                output::field("Compared against", previous.display());
            }
            print_summary(&comparison.ledger);
            if let Some(reports) = &comparison.reports {
                output::field("Summary report", reports.summary_report.display());
                if let Some(detailed) = &reports.detailed_csv {
                    output::field("Detailed changes", detailed.display());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fund_monitor::{Record, RunJournal, SnapshotWriter};

    fn config_in(dir: &Path) -> MonitorConfig {
        MonitorConfig {
            output_dir: dir.join("output"),
            archive_dir: dir.join("archive"),
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn test_baseline_then_compared_are_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let archiver = MonthlyArchiver::new(&config.archive_dir);

        let mut fund = Record::new("https://fs.test/1");
        fund.auditor = "Audit One".into();
        let first = dir.path().join("first.csv");
        SnapshotWriter::write(&first, &[fund.clone()]).unwrap();
        let baseline =
            compare_and_report(&config, &archiver, &first, Some(PeriodLabel::new(2024, 12).unwrap()))
                .unwrap();
        assert_eq!(baseline.status, ComparisonStatus::NoBaseline);

        fund.auditor = "Audit Two".into();
        let second = dir.path().join("second.csv");
        SnapshotWriter::write(&second, &[fund]).unwrap();
        let compared =
            compare_and_report(&config, &archiver, &second, Some(PeriodLabel::new(2025, 1).unwrap()))
                .unwrap();
        assert_eq!(compared.status, ComparisonStatus::Compared);
        assert_eq!(compared.ledger.len(), 1);

        let entries = RunJournal::read_entries(&super::super::journal_path(&config.output_dir))
            .unwrap();
        let statuses: Vec<_> = entries.iter().map(|e| e.status.as_str()).collect();
        assert_eq!(statuses, vec!["no_baseline", "compared"]);
    }

    #[test]
    fn test_missing_snapshot_is_journaled_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let archiver = MonthlyArchiver::new(&config.archive_dir);
        let result = compare_and_report(
            &config,
            &archiver,
            &dir.path().join("missing.csv"),
            Some(PeriodLabel::new(2025, 3).unwrap()),
        );
        assert!(result.is_err());
        let entries = RunJournal::read_entries(&super::super::journal_path(&config.output_dir))
            .unwrap();
        assert_eq!(entries[0].status, "failed");
    }
}
