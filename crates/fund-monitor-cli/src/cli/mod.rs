//! CLI subcommand implementations for the `fund-monitor` binary.

pub mod compare_cmd;
pub mod discover_cmd;
pub mod doctor;
pub mod monthly_cmd;
pub mod output;
pub mod previous_cmd;
pub mod progress;
pub mod scrape_cmd;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use fund_monitor::{JournalEntry, MonitorConfig, RunJournal};

use crate::site::{ChromiumSessionFactory, SiteProfile};

/// Location of the run journal below an output directory.
pub fn journal_path(output_dir: &Path) -> PathBuf {
    output_dir.join("logs").join("runs.jsonl")
}

/// Append one entry to the run journal. Failures are logged, never fatal.
pub fn record_run(output_dir: &Path, entry: &JournalEntry) {
    let path = journal_path(output_dir);
    let appended = RunJournal::open(&path).and_then(|mut journal| journal.append(entry));
    if let Err(e) = appended {
        tracing::warn!("Could not write run journal {}: {e}", path.display());
    }
}

/// Milliseconds elapsed since `started`.
pub fn elapsed_ms(started: std::time::Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// File-name timestamp for artifacts written now.
pub fn now_stamp() -> String {
    fund_monitor::archive::stamp(chrono::Local::now().naive_local())
}

/// Session factory for the configured (or bundled) site profile.
pub fn session_factory(config: &MonitorConfig) -> Result<ChromiumSessionFactory> {
    let profile = SiteProfile::load_or_bundled(config.site_profile.as_deref())?;
    tracing::debug!("Using site profile '{}'", profile.name);
    Ok(ChromiumSessionFactory::new(profile, config.page_timeout))
}

/// Apply an optional millisecond override to a duration setting.
pub fn override_ms(current: Duration, value: Option<u64>) -> Duration {
    value.map(Duration::from_millis).unwrap_or(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_lives_under_logs() {
        assert_eq!(
            journal_path(Path::new("out")),
            Path::new("out").join("logs").join("runs.jsonl")
        );
    }

    #[test]
    fn test_record_run_appends() {
        let dir = tempfile::tempdir().unwrap();
        record_run(dir.path(), &JournalEntry::new("r1", "compare", "compared", 12));
        record_run(dir.path(), &JournalEntry::new("r2", "compare", "compared", 7));
        let entries = RunJournal::read_entries(&journal_path(dir.path())).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].run_id, "r2");
    }

    #[test]
    fn test_override_ms() {
        let base = Duration::from_secs(2);
        assert_eq!(override_ms(base, None), base);
        assert_eq!(override_ms(base, Some(0)), Duration::ZERO);
    }
}
