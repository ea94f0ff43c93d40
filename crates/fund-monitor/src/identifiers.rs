//! Single-column identifier lists (discovered URLs, seed URL lists).

use std::collections::HashSet;
use std::path::Path;

use crate::snapshot::delimiter_for;
use crate::types::{LoadError, MonitorResult};

/// Header written above discovered identifiers.
pub const IDENTIFIER_COLUMN: &str = "URLs";

/// Headers recognised when reading a list back.
const KNOWN_COLUMNS: [&str; 3] = [IDENTIFIER_COLUMN, "Fundsquare_URL", "URL"];

/// Read an identifier list. Uses a known header if present, else the first column.
pub fn read_identifiers(path: &Path) -> Result<Vec<String>, LoadError> {
    let delimiter =
        delimiter_for(path).ok_or_else(|| LoadError::UnsupportedFormat(path.to_path_buf()))?;
    let malformed = |e: csv::Error| LoadError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(file);
    let headers = rdr.headers().map_err(malformed)?.clone();
    let column = KNOWN_COLUMNS
        .iter()
        .find_map(|name| headers.iter().position(|h| h == *name))
        .unwrap_or(0);

    let mut ids = Vec::new();
    for row in rdr.records() {
        let row = row.map_err(malformed)?;
        if let Some(id) = row.get(column).map(str::trim).filter(|s| !s.is_empty()) {
            ids.push(id.to_string());
        }
    }
    tracing::info!("Read {} identifiers from {}", ids.len(), path.display());
    Ok(ids)
}

/// Write identifiers as a single `URLs` column.
pub fn write_identifiers(path: &Path, ids: &[String]) -> MonitorResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([IDENTIFIER_COLUMN])?;
    for id in ids {
        writer.write_record([id])?;
    }
    writer.flush()?;
    Ok(())
}

/// Union of two lists, first-seen order, no duplicates.
pub fn merge_identifiers(seed: &[String], discovered: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    seed.iter()
        .chain(discovered)
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Window over an identifier list: skip `start_index`, then take at most `max_items`.
pub fn window(ids: &[String], start_index: usize, max_items: Option<usize>) -> Vec<String> {
    let rest = ids.get(start_index..).unwrap_or_default();
    let take = max_items.unwrap_or(rest.len()).min(rest.len());
    rest[..take].to_vec()
}
