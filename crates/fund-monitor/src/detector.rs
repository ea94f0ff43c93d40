//! Change detection between two fund snapshots.
//!
//! A detection run appends to one ledger in four passes:
//! 1. primary-key additions and removals,
//! 2. secondary-key (ISIN) additions and removals,
//! 3. service-provider field changes on funds present in both snapshots,
//! 4. other-data field changes on funds present in both snapshots.
//!
//! Keys are visited in sorted order, so two runs over the same inputs produce
//! the same ledger. A field change is only reported when both the old and the
//! new value are present; transitions to or from an empty value are counted
//! as suppressed and logged at debug level. Swapping one empty placeholder for
//! another (`-` to blank, say) is neither reported nor counted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;
use crate::types::{
    has_value, ChangeKind, ChangeRecord, FieldName, KeyKind, MonitorResult, Record,
};

/// Timestamp format used in ledger rows and reports.
pub const DETECTION_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Counters for one detection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub total_changes: usize,
    pub new_by_primary: usize,
    pub removed_by_primary: usize,
    pub new_by_secondary: usize,
    pub removed_by_secondary: usize,
    pub service_provider_changes: usize,
    pub other_data_changes: usize,
    /// Field differences not reported because one side was empty.
    pub suppressed_transitions: usize,
    pub current_records: usize,
    pub previous_records: usize,
}

/// The ordered result of one detection run.
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    entries: Vec<ChangeRecord>,
    summary: DetectionSummary,
    generated_at: NaiveDateTime,
}

/// Files written by [`Ledger::export`].
#[derive(Debug, Clone, Default)]
pub struct LedgerArtifacts {
    pub summary_report: PathBuf,
    pub detailed_csv: Option<PathBuf>,
    pub by_kind: Vec<PathBuf>,
}

impl Ledger {
    /// An empty ledger, used when there is no baseline to compare against.
    pub fn empty(generated_at: NaiveDateTime) -> Self {
        Self {
            entries: Vec::new(),
            summary: DetectionSummary::default(),
            generated_at,
        }
    }

    pub fn entries(&self) -> &[ChangeRecord] {
        &self.entries
    }

    pub fn summary(&self) -> &DetectionSummary {
        &self.summary
    }

    pub fn generated_at(&self) -> NaiveDateTime {
        self.generated_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn of_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &ChangeRecord> {
        self.entries.iter().filter(move |c| c.kind() == kind)
    }

    /// Write ledger rows (`Change_Type, Fund_Identifier, Field_Name, Old_Value, New_Value, Detection_Date`).
    pub fn write_csv(&self, path: &Path) -> MonitorResult<()> {
        write_change_rows(path, self.entries.iter())
    }

    /// Human-readable summary report.
    pub fn summary_report(&self) -> String {
        let s = &self.summary;
        let rule = "=".repeat(50);
        let sub = "-".repeat(30);
        [
            "FUND CHANGE DETECTION SUMMARY".to_string(),
            rule.clone(),
            format!(
                "Analysis Date: {}",
                self.generated_at.format(DETECTION_DATE_FORMAT)
            ),
            format!("Current Funds: {}", s.current_records),
            format!("Previous Funds: {}", s.previous_records),
            String::new(),
            "CHANGE SUMMARY:".to_string(),
            sub,
            format!("Total Changes Detected: {}", s.total_changes),
            String::new(),
            "URL-Based Analysis:".to_string(),
            format!("  New Funds: {}", s.new_by_primary),
            format!("  Removed Funds: {}", s.removed_by_primary),
            String::new(),
            "ISIN-Based Analysis:".to_string(),
            format!("  New Funds: {}", s.new_by_secondary),
            format!("  Removed Funds: {}", s.removed_by_secondary),
            String::new(),
            format!("Service Provider Changes: {}", s.service_provider_changes),
            format!("Other Data Changes: {}", s.other_data_changes),
            format!(
                "Suppressed Empty-Value Transitions: {}",
                s.suppressed_transitions
            ),
            String::new(),
            rule,
        ]
        .join("\n")
    }

    /// Write the summary report, and when there are changes the detailed
    /// ledger plus one file per change kind.
    pub fn export(&self, output_dir: &Path, stamp: &str) -> MonitorResult<LedgerArtifacts> {
        std::fs::create_dir_all(output_dir)?;

        let summary_report = output_dir.join(format!("change_summary_{stamp}.txt"));
        std::fs::write(&summary_report, self.summary_report())?;

        let mut artifacts = LedgerArtifacts {
            summary_report,
            ..LedgerArtifacts::default()
        };
        if self.entries.is_empty() {
            return Ok(artifacts);
        }

        let detailed = output_dir.join(format!("detailed_changes_{stamp}.csv"));
        self.write_csv(&detailed)?;
        artifacts.detailed_csv = Some(detailed);

        for kind in [ChangeKind::New, ChangeKind::Removed, ChangeKind::FieldChanged] {
            if self.of_kind(kind).next().is_none() {
                continue;
            }
            let path = output_dir.join(format!("changes_{kind}_{stamp}.csv"));
            write_change_rows(&path, self.of_kind(kind))?;
            artifacts.by_kind.push(path);
        }

        tracing::info!(
            "Change reports written to {} ({} changes)",
            output_dir.display(),
            self.entries.len()
        );
        Ok(artifacts)
    }
}

fn write_change_rows<'a>(
    path: &Path,
    rows: impl Iterator<Item = &'a ChangeRecord>,
) -> MonitorResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "Change_Type",
        "Fund_Identifier",
        "Field_Name",
        "Old_Value",
        "New_Value",
        "Detection_Date",
    ])?;
    for c in rows {
        writer.write_record([
            c.kind().as_str(),
            c.identifier(),
            c.field().map(FieldName::key).unwrap_or(""),
            c.old_value().unwrap_or(""),
            c.new_value().unwrap_or(""),
            &c.detected_at().format(DETECTION_DATE_FORMAT).to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Compares a current snapshot against a previous one.
pub struct ChangeDetector {
    current: HashMap<String, Record>,
    previous: HashMap<String, Record>,
    ledger: Vec<ChangeRecord>,
}

impl ChangeDetector {
    pub fn new(current: HashMap<String, Record>, previous: HashMap<String, Record>) -> Self {
        Self {
            current,
            previous,
            ledger: Vec::new(),
        }
    }

    pub fn from_snapshots(current: Snapshot, previous: Snapshot) -> Self {
        Self::new(current.records, previous.records)
    }

    /// Run all four passes, stamped with the current local time.
    pub fn run_detection(&mut self) -> Ledger {
        self.run_detection_at(chrono::Local::now().naive_local())
    }

    /// Run all four passes. The ledger is rebuilt from scratch on every call.
    pub fn run_detection_at(&mut self, detected_at: NaiveDateTime) -> Ledger {
        tracing::info!(
            "Starting change detection: {} current vs {} previous records",
            self.current.len(),
            self.previous.len()
        );
        self.ledger.clear();
        let mut summary = DetectionSummary {
            current_records: self.current.len(),
            previous_records: self.previous.len(),
            ..DetectionSummary::default()
        };

        (summary.new_by_primary, summary.removed_by_primary) =
            self.detect_primary_changes(detected_at);
        (summary.new_by_secondary, summary.removed_by_secondary) =
            self.detect_secondary_changes(detected_at);

        let (sp, sp_suppressed) =
            self.detect_field_changes(&FieldName::SERVICE_PROVIDERS, detected_at);
        let (data, data_suppressed) =
            self.detect_field_changes(&FieldName::OTHER_DATA, detected_at);
        summary.service_provider_changes = sp;
        summary.other_data_changes = data;
        summary.suppressed_transitions = sp_suppressed + data_suppressed;
        summary.total_changes = self.ledger.len();

        tracing::info!(
            "Change detection completed. Total changes: {}",
            summary.total_changes
        );
        Ledger {
            entries: self.ledger.clone(),
            summary,
            generated_at: detected_at,
        }
    }

    fn detect_primary_changes(&mut self, at: NaiveDateTime) -> (usize, usize) {
        let current: BTreeSet<&str> = self.current.keys().map(String::as_str).collect();
        let previous: BTreeSet<&str> = self.previous.keys().map(String::as_str).collect();

        let mut entries = Vec::new();
        for key in current.difference(&previous) {
            entries.push(ChangeRecord::added(
                KeyKind::Primary,
                *key,
                &self.current[*key].name,
                at,
            ));
        }
        let added = entries.len();
        for key in previous.difference(&current) {
            entries.push(ChangeRecord::removed(
                KeyKind::Primary,
                *key,
                &self.previous[*key].name,
                at,
            ));
        }
        let removed = entries.len() - added;

        tracing::info!("Detected {added} new funds and {removed} removed funds");
        self.ledger.extend(entries);
        (added, removed)
    }

    fn detect_secondary_changes(&mut self, at: NaiveDateTime) -> (usize, usize) {
        let current = secondary_index(&self.current);
        let previous = secondary_index(&self.previous);

        let mut entries = Vec::new();
        for (isin, record) in &current {
            if !previous.contains_key(isin) {
                entries.push(ChangeRecord::added(KeyKind::Secondary, *isin, &record.name, at));
            }
        }
        let added = entries.len();
        for (isin, record) in &previous {
            if !current.contains_key(isin) {
                entries.push(ChangeRecord::removed(
                    KeyKind::Secondary,
                    *isin,
                    &record.name,
                    at,
                ));
            }
        }
        let removed = entries.len() - added;

        tracing::info!("ISIN-based: {added} new, {removed} removed");
        self.ledger.extend(entries);
        (added, removed)
    }

    /// Returns (reported changes, suppressed empty-value transitions).
    fn detect_field_changes(&mut self, fields: &[FieldName], at: NaiveDateTime) -> (usize, usize) {
        let common: BTreeSet<&str> = self
            .current
            .keys()
            .filter(|k| self.previous.contains_key(*k))
            .map(String::as_str)
            .collect();

        let mut entries = Vec::new();
        let mut suppressed = 0;
        for key in common {
            let (now, before) = (&self.current[key], &self.previous[key]);
            for &field in fields {
                let new_value = now.field(field).trim();
                let old_value = before.field(field).trim();
                if new_value == old_value {
                    continue;
                }
                let (had, has) = (has_value(old_value), has_value(new_value));
                if !had && !has {
                    // one placeholder swapped for another
                    continue;
                }
                if had && has {
                    entries.push(ChangeRecord::field_changed(
                        key, field, old_value, new_value, at,
                    ));
                } else {
                    suppressed += 1;
                    tracing::debug!(
                        "Skipping {field} on {key}: {old_value:?} -> {new_value:?} involves an empty value"
                    );
                }
            }
        }

        let reported = entries.len();
        tracing::info!(
            "Detected {reported} {:?} field changes ({suppressed} empty-value transitions skipped)",
            fields.first().map(|f| f.category())
        );
        self.ledger.extend(entries);
        (reported, suppressed)
    }
}

/// `secondary id -> record`, skipping records without one. When several
/// records share an ISIN the one with the greatest primary id wins.
fn secondary_index(records: &HashMap<String, Record>) -> BTreeMap<&str, &Record> {
    let mut ordered: Vec<&Record> = records.values().collect();
    ordered.sort_by(|a, b| a.primary_id.cmp(&b.primary_id));
    ordered
        .into_iter()
        .filter_map(|r| r.secondary_key().map(|k| (k, r)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn fund(url: &str, isin: &str, name: &str) -> Record {
        Record {
            primary_id: url.into(),
            secondary_id: isin.into(),
            name: name.into(),
            ..Record::default()
        }
    }

    fn map(records: Vec<Record>) -> HashMap<String, Record> {
        records
            .into_iter()
            .map(|r| (r.primary_id.clone(), r))
            .collect()
    }

    #[test]
    fn test_new_and_removed_by_primary_key() {
        let current = map(vec![fund("u1", "", "One"), fund("u3", "", "Three")]);
        let previous = map(vec![fund("u1", "", "One"), fund("u4", "", "Four")]);
        let ledger = ChangeDetector::new(current, previous).run_detection_at(at());

        assert_eq!(ledger.len(), 2);
        let new: Vec<_> = ledger.of_kind(ChangeKind::New).collect();
        let removed: Vec<_> = ledger.of_kind(ChangeKind::Removed).collect();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].identifier(), "u3");
        assert_eq!(new[0].new_value(), Some("Three"));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].identifier(), "u4");
        assert_eq!(removed[0].old_value(), Some("Four"));
    }

    #[test]
    fn test_cleared_field_is_not_a_change() {
        let mut before = fund("A", "", "Fund A");
        before.administrator = "X".into();
        let now = fund("A", "", "Fund A");
        let ledger = ChangeDetector::new(map(vec![now]), map(vec![before])).run_detection_at(at());

        assert!(ledger.is_empty());
        assert_eq!(ledger.summary().suppressed_transitions, 1);
    }

    #[test]
    fn test_dash_counts_as_empty() {
        let mut before = fund("A", "", "Fund A");
        before.auditor = "-".into();
        let mut now = fund("A", "", "Fund A");
        now.auditor = "Auditor X".into();
        let ledger = ChangeDetector::new(map(vec![now]), map(vec![before])).run_detection_at(at());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_placeholder_swaps_are_not_counted() {
        let mut before = fund("A", "", "Fund A");
        before.auditor = "-".into();
        before.administrator = "".into();
        let mut now = fund("A", "", "Fund A");
        now.auditor = "".into();
        now.administrator = "nan".into();
        let ledger = ChangeDetector::new(map(vec![now]), map(vec![before])).run_detection_at(at());

        assert!(ledger.is_empty());
        assert_eq!(ledger.summary().suppressed_transitions, 0);
    }

    #[test]
    fn test_real_value_appearing_or_vanishing_is_suppressed() {
        let mut before = fund("A", "", "Fund A");
        before.auditor = "-".into();
        before.administrator = "Admin A".into();
        let mut now = fund("A", "", "Fund A");
        now.auditor = "Auditor X".into();
        now.administrator = "".into();
        let ledger = ChangeDetector::new(map(vec![now]), map(vec![before])).run_detection_at(at());

        assert!(ledger.is_empty());
        assert_eq!(ledger.summary().suppressed_transitions, 2);
    }

    #[test]
    fn test_field_change_reports_both_values() {
        let mut before = fund("u2", "IE1", "Fund B");
        before.auditor = "Auditor Y".into();
        let mut now = fund("u2", "IE1", "Fund B Updated");
        now.auditor = "Auditor Y Changed".into();
        let ledger = ChangeDetector::new(map(vec![now]), map(vec![before])).run_detection_at(at());

        assert_eq!(ledger.summary().service_provider_changes, 1);
        assert_eq!(ledger.summary().other_data_changes, 1);
        // Service-provider pass precedes the other-data pass.
        let entries = ledger.entries();
        assert_eq!(entries[0].field(), Some(FieldName::Auditor));
        assert_eq!(entries[0].old_value(), Some("Auditor Y"));
        assert_eq!(entries[0].new_value(), Some("Auditor Y Changed"));
        assert_eq!(entries[1].field(), Some(FieldName::Name));
    }

    #[test]
    fn test_secondary_pass_is_independent() {
        // Same ISIN, different URL: removed + new by URL, nothing by ISIN.
        let current = map(vec![fund("u-new", "LU1", "Fund")]);
        let previous = map(vec![fund("u-old", "LU1", "Fund")]);
        let ledger = ChangeDetector::new(current, previous).run_detection_at(at());
        let s = ledger.summary();
        assert_eq!((s.new_by_primary, s.removed_by_primary), (1, 1));
        assert_eq!((s.new_by_secondary, s.removed_by_secondary), (0, 0));

        // Same URL, ISIN changed: nothing by URL, new + removed by ISIN.
        let current = map(vec![fund("u1", "LU2", "Fund")]);
        let previous = map(vec![fund("u1", "LU1", "Fund")]);
        let ledger = ChangeDetector::new(current, previous).run_detection_at(at());
        let s = ledger.summary();
        assert_eq!((s.new_by_primary, s.removed_by_primary), (0, 0));
        assert_eq!((s.new_by_secondary, s.removed_by_secondary), (1, 1));
        assert!(ledger
            .entries()
            .iter()
            .all(|c| c.key() == KeyKind::Secondary));
    }

    #[test]
    fn test_missing_isin_is_excluded_from_secondary_pass() {
        let current = map(vec![fund("u1", "nan", "One")]);
        let previous = map(vec![fund("u1", "", "One")]);
        let ledger = ChangeDetector::new(current, previous).run_detection_at(at());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_rerun_resets_ledger() {
        let current = map(vec![fund("u3", "", "Three")]);
        let previous = map(vec![fund("u4", "", "Four")]);
        let mut detector = ChangeDetector::new(current, previous);
        let first = detector.run_detection_at(at());
        let second = detector.run_detection_at(at());
        assert_eq!(first, second);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_export_files() {
        let dir = tempfile::tempdir().unwrap();
        let current = map(vec![fund("u3", "", "Three")]);
        let previous = map(vec![fund("u4", "", "Four")]);
        let ledger = ChangeDetector::new(current, previous).run_detection_at(at());

        let artifacts = ledger.export(dir.path(), "20250701_093000").unwrap();
        let summary = std::fs::read_to_string(&artifacts.summary_report).unwrap();
        assert!(summary.contains("Total Changes Detected: 2"));
        assert!(summary.contains("Analysis Date: 2025-07-01 09:30:00"));
        assert_eq!(artifacts.by_kind.len(), 2);

        let detailed = std::fs::read_to_string(artifacts.detailed_csv.unwrap()).unwrap();
        let lines: Vec<&str> = detailed.lines().collect();
        assert_eq!(
            lines[0],
            "Change_Type,Fund_Identifier,Field_Name,Old_Value,New_Value,Detection_Date"
        );
        assert_eq!(lines[1], "NEW,u3,,,Three,2025-07-01 09:30:00");
        assert_eq!(lines[2], "REMOVED,u4,,Four,,2025-07-01 09:30:00");
    }

    #[test]
    fn test_empty_ledger_only_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::empty(at());
        let artifacts = ledger.export(dir.path(), "x").unwrap();
        assert!(artifacts.summary_report.exists());
        assert!(artifacts.detailed_csv.is_none());
        assert!(artifacts.by_kind.is_empty());
    }
}
