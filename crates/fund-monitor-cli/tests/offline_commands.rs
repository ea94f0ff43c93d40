//! Commands that work without a browser: compare, monthly, previous-period.

use std::path::Path;

use fund_monitor::{MonitorConfig, Record, RunJournal, SnapshotWriter};
use fund_monitor_cli::cli::{self, compare_cmd, monthly_cmd, previous_cmd};

// ─────────────────────── helpers ───────────────────────

fn config_in(dir: &Path) -> MonitorConfig {
    MonitorConfig {
        output_dir: dir.join("output"),
        archive_dir: dir.join("monthly_monitoring"),
        ..MonitorConfig::default()
    }
}

fn fund(url: &str, isin: &str, administrator: &str) -> Record {
    let mut record = Record::new(url);
    record.secondary_id = isin.to_string();
    record.name = format!("Fund {isin}");
    record.administrator = administrator.to_string();
    record
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ─────────────────────── compare ───────────────────────

#[tokio::test]
async fn test_compare_writes_reports_and_journal() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    let previous = dir.path().join("previous.csv");
    SnapshotWriter::write(
        &previous,
        &[
            fund("https://fs.test/1", "LU0000000001", "Admin A"),
            fund("https://fs.test/2", "LU0000000002", "Admin A"),
        ],
    )
    .unwrap();
    let current = dir.path().join("current.csv");
    SnapshotWriter::write(
        &current,
        &[fund("https://fs.test/1", "LU0000000001", "Admin B")],
    )
    .unwrap();

    let reports = dir.path().join("reports");
    compare_cmd::run(&config, &current, &previous, Some(reports.clone()))
        .await
        .unwrap();

    let names = files_in(&reports);
    assert!(names.iter().any(|n| n.starts_with("change_summary_")));
    assert!(names.iter().any(|n| n.starts_with("detailed_changes_")));
    assert!(names.iter().any(|n| n.starts_with("changes_REMOVED_")));
    assert!(names.iter().any(|n| n.starts_with("changes_FIELD_CHANGED_")));
    assert!(!names.iter().any(|n| n.starts_with("changes_NEW_")));

    let entries = RunJournal::read_entries(&cli::journal_path(&config.output_dir)).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, "compare");
    assert_eq!(entries[0].status, "compared");
    // removed by URL, removed by ISIN, administrator change
    assert_eq!(entries[0].items, 3);
}

#[tokio::test]
async fn test_compare_missing_file_fails_and_is_journaled() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let missing = dir.path().join("missing.csv");

    let err = compare_cmd::run(&config, &missing, &missing, None)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("current snapshot"));

    let entries = RunJournal::read_entries(&cli::journal_path(&config.output_dir)).unwrap();
    assert_eq!(entries[0].status, "failed");
}

// ─────────────────────── monthly ───────────────────────

#[tokio::test]
async fn test_monthly_rejects_bad_period() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let snapshot = dir.path().join("snap.csv");
    SnapshotWriter::write(&snapshot, &[fund("https://fs.test/1", "LU1", "A")]).unwrap();

    assert!(monthly_cmd::run(&config, &snapshot, Some("2025-07")).await.is_err());
    assert!(monthly_cmd::run(&config, &snapshot, Some("2025_13")).await.is_err());
    assert!(!config.archive_dir.exists());
}

#[tokio::test]
async fn test_monthly_archives_under_period() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let snapshot = dir.path().join("scrape_complete_20250601_080000.csv");
    SnapshotWriter::write(&snapshot, &[fund("https://fs.test/1", "LU1", "A")]).unwrap();

    monthly_cmd::run(&config, &snapshot, Some("2025_06"))
        .await
        .unwrap();
    assert!(config
        .archive_dir
        .join("2025_06")
        .join("scrape_complete_20250601_080000.csv")
        .exists());

    let entries = RunJournal::read_entries(&cli::journal_path(&config.output_dir)).unwrap();
    assert_eq!(entries[0].status, "no_baseline");
}

// ─────────────────────── previous-period ───────────────────────

#[tokio::test]
async fn test_previous_period_with_and_without_archive() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    previous_cmd::run(&config, Some("2025_01")).await.unwrap();

    let december = config.archive_dir.join("2024_12");
    std::fs::create_dir_all(&december).unwrap();
    SnapshotWriter::write(
        &december.join("scrape.csv"),
        &[fund("https://fs.test/1", "LU1", "A")],
    )
    .unwrap();
    previous_cmd::run(&config, Some("2025_01")).await.unwrap();
    assert!(previous_cmd::run(&config, Some("January")).await.is_err());
}
