//! Append-only JSONL journal of pipeline runs.
//!
//! One line per finished operation (discover, scrape, compare, monthly).
//! The file rotates to `.1`, `.2`, ... once it exceeds `max_size`, keeping
//! at most `MAX_ROTATIONS` old files.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::MonitorResult;

/// Default size before rotation (10 MB).
const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;

const MAX_ROTATIONS: u32 = 5;

/// A single journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: String,
    pub run_id: String,
    pub operation: String,
    pub status: String,
    pub duration_ms: u64,
    pub items: usize,
    pub failures: usize,
    pub detail: Option<String>,
}

impl JournalEntry {
    pub fn new(run_id: &str, operation: &str, status: &str, duration_ms: u64) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            run_id: run_id.to_string(),
            operation: operation.to_string(),
            status: status.to_string(),
            duration_ms,
            items: 0,
            failures: 0,
            detail: None,
        }
    }

    pub fn with_counts(mut self, items: usize, failures: usize) -> Self {
        self.items = items;
        self.failures = failures;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

pub struct RunJournal {
    file: File,
    path: PathBuf,
    current_size: u64,
    max_size: u64,
}

impl RunJournal {
    pub fn open(path: &Path) -> MonitorResult<Self> {
        Self::open_with_limit(path, DEFAULT_MAX_SIZE)
    }

    pub fn open_with_limit(path: &Path, max_size: u64) -> MonitorResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            file,
            path: path.to_path_buf(),
            current_size,
            max_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, entry: &JournalEntry) -> MonitorResult<()> {
        if self.current_size >= self.max_size {
            self.rotate()?;
        }
        let json = serde_json::to_string(entry)?;
        writeln!(self.file, "{json}")?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// Read every entry of the live file. Unparsable lines are skipped.
    pub fn read_entries(path: &Path) -> MonitorResult<Vec<JournalEntry>> {
        let text = std::fs::read_to_string(path)?;
        Ok(text
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// runs.jsonl -> runs.jsonl.1, .1 -> .2, ...
    fn rotate(&mut self) -> MonitorResult<()> {
        self.file.flush()?;

        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            if from.exists() {
                let _ = std::fs::rename(&from, rotation_path(&self.path, i + 1));
            }
        }
        let _ = std::fs::rename(&self.path, rotation_path(&self.path, 1));

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.current_size = 0;
        tracing::debug!("Rotated run journal {}", self.path.display());
        Ok(())
    }
}

fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("runs.jsonl")
    );
    base.with_file_name(name)
}
