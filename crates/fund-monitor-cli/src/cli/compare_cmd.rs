//! `fund-monitor compare <current> <previous>`: diff two snapshots.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use fund_monitor::{ChangeDetector, JournalEntry, Ledger, MonitorConfig, SnapshotLoader};
use serde_json::json;

use super::output;

/// Entry point for the `compare` subcommand. Reports go to `report_dir`
/// or the configured output directory.
pub async fn run(
    config: &MonitorConfig,
    current: &Path,
    previous: &Path,
    report_dir: Option<PathBuf>,
) -> Result<()> {
    let started = Instant::now();
    let run_id = fund_monitor::new_run_id();
    let report_dir = report_dir.unwrap_or_else(|| config.output_dir.join("changes"));

    let result = detect(current, previous, &report_dir);
    let (ledger, artifacts) = match result {
        Ok(done) => done,
        Err(e) => {
            super::record_run(
                &config.output_dir,
                &JournalEntry::new(&run_id, "compare", "failed", super::elapsed_ms(started))
                    .with_detail(format!("{e:#}")),
            );
            return Err(e);
        }
    };

    super::record_run(
        &config.output_dir,
        &JournalEntry::new(&run_id, "compare", "compared", super::elapsed_ms(started))
            .with_counts(ledger.len(), 0),
    );

    if output::is_json() {
        output::print_json(&json!({
            "run_id": run_id,
            "status": "compared",
            "summary": ledger.summary(),
            "reports": {
                "summary_report": artifacts.summary_report,
                "detailed_csv": artifacts.detailed_csv,
                "by_kind": artifacts.by_kind,
            },
        }));
        return Ok(());
    }

    output::heading("Snapshot comparison");
    output::field("Current", current.display());
    output::field("Previous", previous.display());
    print_summary(&ledger);
    output::field("Summary report", artifacts.summary_report.display());
    if let Some(detailed) = &artifacts.detailed_csv {
        output::field("Detailed changes", detailed.display());
    }
    Ok(())
}

fn detect(
    current: &Path,
    previous: &Path,
    report_dir: &Path,
) -> Result<(Ledger, fund_monitor::LedgerArtifacts)> {
    let current = SnapshotLoader::load(current).context("could not load current snapshot")?;
    let previous = SnapshotLoader::load(previous).context("could not load previous snapshot")?;
    let ledger = ChangeDetector::from_snapshots(current, previous).run_detection();
    let artifacts = ledger.export(report_dir, &super::now_stamp())?;
    Ok((ledger, artifacts))
}

/// Counter block shared by `compare` and `monthly`.
pub fn print_summary(ledger: &Ledger) {
    let s = ledger.summary();
    output::field("Current records", s.current_records);
    output::field("Previous records", s.previous_records);
    output::field("Total changes", s.total_changes);
    output::field(
        "New / removed (URL)",
        format!("{} / {}", s.new_by_primary, s.removed_by_primary),
    );
    output::field(
        "New / removed (ISIN)",
        format!("{} / {}", s.new_by_secondary, s.removed_by_secondary),
    );
    output::field("Service providers", s.service_provider_changes);
    output::field("Other data", s.other_data_changes);
    if s.suppressed_transitions > 0 {
        output::field("Empty transitions", s.suppressed_transitions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fund_monitor::{ChangeKind, Record, SnapshotWriter};

    #[test]
    fn test_detect_writes_reports() {
        let dir = tempfile::tempdir().unwrap();
        let mut kept = Record::new("https://fs.test/1");
        kept.secondary_id = "LU0000000001".into();
        kept.custodian = "Old Bank".into();
        let previous = dir.path().join("previous.csv");
        SnapshotWriter::write(&previous, &[kept.clone()]).unwrap();

        kept.custodian = "New Bank".into();
        let mut added = Record::new("https://fs.test/2");
        added.secondary_id = "LU0000000002".into();
        let current = dir.path().join("current.csv");
        SnapshotWriter::write(&current, &[kept, added]).unwrap();

        let reports = dir.path().join("reports");
        let (ledger, artifacts) = detect(&current, &previous, &reports).unwrap();
        assert_eq!(ledger.summary().new_by_primary, 1);
        assert_eq!(ledger.summary().new_by_secondary, 1);
        assert_eq!(ledger.summary().service_provider_changes, 1);
        assert_eq!(ledger.of_kind(ChangeKind::FieldChanged).count(), 1);
        assert!(artifacts.summary_report.exists());
        assert!(artifacts.detailed_csv.is_some());
    }

    #[test]
    fn test_detect_rejects_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("snapshot.parquet");
        std::fs::write(&bogus, b"not tabular").unwrap();
        assert!(detect(&bogus, &bogus, dir.path()).is_err());
    }
}
