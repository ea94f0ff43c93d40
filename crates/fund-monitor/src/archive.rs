//! Monthly archival of snapshots and comparison against the previous period.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Datelike, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::detector::{ChangeDetector, Ledger, LedgerArtifacts};
use crate::snapshot::{is_tabular, SnapshotLoader};
use crate::types::{MonitorError, MonitorResult};

const REPORTS_DIR: &str = "reports";

const REPORT_PREFIXES: [&str; 3] = ["changes_", "detailed_changes_", "change_summary_"];

/// A `YYYY_MM` archive period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeriodLabel {
    year: i32,
    month: u32,
}

impl PeriodLabel {
    pub fn new(year: i32, month: u32) -> MonitorResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(MonitorError::InvalidPeriod(format!("{year}_{month:02}")));
        }
        Ok(Self { year, month })
    }

    /// Period of today's local date.
    pub fn current() -> Self {
        let today = Local::now().date_naive();
        Self {
            year: today.year(),
            month: today.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// The immediately preceding period. January rolls back to December of the prior year.
    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }
}

impl fmt::Display for PeriodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_{:02}", self.year, self.month)
    }
}

impl FromStr for PeriodLabel {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MonitorError::InvalidPeriod(s.to_string());
        let (year, month) = s.trim().split_once('_').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year = year.parse::<i32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

/// Whether a monthly comparison had anything to compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Compared,
    NoBaseline,
}

impl ComparisonStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compared => "compared",
            Self::NoBaseline => "no_baseline",
        }
    }
}

/// Result of [`MonthlyArchiver::run_monthly_comparison`].
#[derive(Debug)]
pub struct MonthlyComparison {
    pub period: PeriodLabel,
    pub archived: PathBuf,
    pub previous: Option<PathBuf>,
    pub status: ComparisonStatus,
    pub ledger: Ledger,
    pub reports: Option<LedgerArtifacts>,
}

/// Archives snapshots under `<base_dir>/<YYYY_MM>/`.
#[derive(Debug, Clone)]
pub struct MonthlyArchiver {
    base_dir: PathBuf,
}

impl MonthlyArchiver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn period_dir(&self, period: PeriodLabel) -> PathBuf {
        self.base_dir.join(period.to_string())
    }

    /// Change reports of a period live below its archive directory, apart
    /// from the archived snapshot.
    pub fn reports_dir(&self, period: PeriodLabel) -> PathBuf {
        self.period_dir(period).join(REPORTS_DIR)
    }

    /// Copy a snapshot into its period directory, replacing any file with the same name.
    pub fn archive(&self, snapshot: &Path, period: Option<PeriodLabel>) -> MonitorResult<PathBuf> {
        let period = period.unwrap_or_else(PeriodLabel::current);
        let dir = self.period_dir(period);
        std::fs::create_dir_all(&dir)?;

        let file_name = snapshot.file_name().ok_or_else(|| {
            MonitorError::InvalidState(format!("{} has no file name", snapshot.display()))
        })?;
        let target = dir.join(file_name);
        std::fs::copy(snapshot, &target)?;

        tracing::info!("Archived {} to {}", snapshot.display(), target.display());
        Ok(target)
    }

    /// Locate an archived snapshot for the period before `period`.
    ///
    /// Returns `Ok(None)` when the directory is missing or holds no snapshot.
    /// Change reports are never candidates. When several snapshots are present
    /// the lexicographically first is chosen.
    pub fn find_previous_period(
        &self,
        period: Option<PeriodLabel>,
    ) -> MonitorResult<Option<PathBuf>> {
        let previous = period.unwrap_or_else(PeriodLabel::current).previous();
        let dir = self.period_dir(previous);
        if !dir.is_dir() {
            tracing::info!("No archive directory for {previous}");
            return Ok(None);
        }

        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && is_tabular(&path) && !is_change_report(&path) {
                candidates.push(path);
            }
        }
        candidates.sort();

        match candidates.into_iter().next() {
            Some(found) => {
                tracing::info!("Found previous period data: {}", found.display());
                Ok(Some(found))
            }
            None => {
                tracing::info!("No snapshot file in {}", dir.display());
                Ok(None)
            }
        }
    }

    /// Archive `current` for today's period and compare it against the previous one.
    pub fn run_monthly_comparison(&self, current: &Path) -> MonitorResult<MonthlyComparison> {
        self.run_monthly_comparison_for(current, PeriodLabel::current())
    }

    pub fn run_monthly_comparison_for(
        &self,
        current: &Path,
        period: PeriodLabel,
    ) -> MonitorResult<MonthlyComparison> {
        tracing::info!("Starting monthly comparison for {period}");
        let archived = self.archive(current, Some(period))?;
        let now = Local::now().naive_local();

        let Some(previous) = self.find_previous_period(Some(period))? else {
            tracing::info!("No previous month data found - this is the baseline run");
            return Ok(MonthlyComparison {
                period,
                archived,
                previous: None,
                status: ComparisonStatus::NoBaseline,
                ledger: Ledger::empty(now),
                reports: None,
            });
        };

        let current_snapshot = SnapshotLoader::load(&archived)?;
        let previous_snapshot = SnapshotLoader::load(&previous)?;
        let ledger =
            ChangeDetector::from_snapshots(current_snapshot, previous_snapshot).run_detection_at(now);

        let reports = ledger.export(&self.reports_dir(period), &stamp(now))?;
        tracing::info!(
            "Monthly comparison for {period} completed: {} changes",
            ledger.len()
        );

        Ok(MonthlyComparison {
            period,
            archived,
            previous: Some(previous),
            status: ComparisonStatus::Compared,
            ledger,
            reports: Some(reports),
        })
    }
}

/// Names written by `Ledger::export`.
fn is_change_report(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| REPORT_PREFIXES.iter().any(|p| name.starts_with(p)))
}

/// File-name timestamp, `YYYYMMDD_HHMMSS`.
pub fn stamp(at: NaiveDateTime) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}
