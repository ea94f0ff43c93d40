//! Tabular snapshot files: loading into keyed record maps and writing back.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::types::{has_value, FieldName, LoadError, MonitorResult, Record};

/// Extensions the loader understands, with their delimiter.
const SUPPORTED_FORMATS: [(&str, u8); 2] = [("csv", b','), ("tsv", b'\t')];

/// Delimiter for a tabular file, or `None` if the format is unsupported.
pub fn delimiter_for(path: &Path) -> Option<u8> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    SUPPORTED_FORMATS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, d)| *d)
}

/// True if the loader can read this file.
pub fn is_tabular(path: &Path) -> bool {
    delimiter_for(path).is_some()
}

/// One loaded snapshot, keyed by primary id.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub records: HashMap<String, Record>,
    /// Rows skipped because their primary key was empty.
    pub dropped_rows: usize,
    /// Rows that repeated an earlier primary key (last one wins).
    pub duplicate_rows: usize,
    pub source: Option<PathBuf>,
}

impl Snapshot {
    /// Build a snapshot from records already in memory.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut snapshot = Snapshot::default();
        for record in records {
            snapshot.insert(record);
        }
        snapshot
    }

    fn insert(&mut self, record: Record) {
        if !has_value(&record.primary_id) {
            self.dropped_rows += 1;
            return;
        }
        if self
            .records
            .insert(record.primary_id.clone(), record)
            .is_some()
        {
            self.duplicate_rows += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, primary_id: &str) -> Option<&Record> {
        self.records.get(primary_id)
    }
}

/// Reads snapshot files.
pub struct SnapshotLoader;

impl SnapshotLoader {
    /// Load a snapshot file. The format is chosen by extension.
    pub fn load(path: &Path) -> Result<Snapshot, LoadError> {
        let delimiter =
            delimiter_for(path).ok_or_else(|| LoadError::UnsupportedFormat(path.to_path_buf()))?;
        let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut snapshot = Self::load_from(file, delimiter, path)?;
        snapshot.source = Some(path.to_path_buf());

        tracing::info!(
            "Loaded {} records from {}",
            snapshot.len(),
            path.display()
        );
        if snapshot.dropped_rows > 0 {
            tracing::debug!(
                "Dropped {} rows without a primary key from {}",
                snapshot.dropped_rows,
                path.display()
            );
        }
        if snapshot.duplicate_rows > 0 {
            tracing::debug!(
                "{} rows in {} repeated an earlier primary key",
                snapshot.duplicate_rows,
                path.display()
            );
        }
        Ok(snapshot)
    }

    /// Load from any reader. `origin` is only used in error messages.
    pub fn load_from<R: Read>(
        reader: R,
        delimiter: u8,
        origin: &Path,
    ) -> Result<Snapshot, LoadError> {
        let malformed = |e: csv::Error| LoadError::Malformed {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        };

        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);

        let headers = rdr.headers().map_err(malformed)?.clone();
        let columns: Vec<(FieldName, Option<usize>)> = FieldName::ALL
            .into_iter()
            .map(|f| (f, headers.iter().position(|h| h == f.column())))
            .collect();

        if !headers.iter().any(|h| h == FieldName::PrimaryId.column()) {
            tracing::warn!(
                "{} has no {} column; every row will be dropped",
                origin.display(),
                FieldName::PrimaryId.column()
            );
        }

        let mut snapshot = Snapshot::default();
        for row in rdr.records() {
            let row = row.map_err(malformed)?;
            let mut record = Record::default();
            for (field, idx) in &columns {
                if let Some(value) = idx.and_then(|i| row.get(i)) {
                    *record.field_mut(*field) = value.trim().to_string();
                }
            }
            snapshot.insert(record);
        }
        Ok(snapshot)
    }
}

/// Writes snapshot files in the loader's column layout.
pub struct SnapshotWriter;

impl SnapshotWriter {
    pub fn write(path: &Path, records: &[Record]) -> MonitorResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let delimiter = delimiter_for(path).unwrap_or(b',');
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(path)?;
        writer.write_record(FieldName::ALL.map(FieldName::column))?;
        for record in records {
            writer.write_record(FieldName::ALL.map(|f| record.field(f)))?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "URL,ISIN,Fund Name,Central Administration,Auditor\n\
https://fs.test/fund1,LU123456789,Fund A,Admin A,Auditor X\n\
https://fs.test/fund2,IE987654321,Fund B,Admin B,Auditor Y\n\
,DE111222333,Orphan,Admin D,Auditor W\n";

    #[test]
    fn test_load_keys_by_primary_id_and_drops_blank_keys() {
        let snap = SnapshotLoader::load_from(SAMPLE.as_bytes(), b',', Path::new("mem.csv")).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.dropped_rows, 1);
        let a = snap.get("https://fs.test/fund1").unwrap();
        assert_eq!(a.name, "Fund A");
        assert_eq!(a.administrator, "Admin A");
        // Missing columns default to empty.
        assert_eq!(a.custodian, "");
        assert_eq!(a.last_valuation, "");
    }

    #[test]
    fn test_column_names_are_case_sensitive() {
        let text = "url,ISIN\nhttps://fs.test/x,LU1\n";
        let snap = SnapshotLoader::load_from(text.as_bytes(), b',', Path::new("mem.csv")).unwrap();
        assert!(snap.is_empty());
        assert_eq!(snap.dropped_rows, 1);
    }

    #[test]
    fn test_unsupported_extension_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("funds.xlsx");
        std::fs::write(&path, b"PK\x03\x04").unwrap();
        let err = SnapshotLoader::load(&path).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = SnapshotLoader::load(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut bytes = b"URL,ISIN\nhttps://fs.test/x,".to_vec();
        bytes.extend_from_slice(&[0xFF, 0xFE, b'\n']);
        let err = SnapshotLoader::load_from(&bytes[..], b',', Path::new("bad.csv")).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { .. }));
    }

    #[test]
    fn test_writer_output_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("funds.tsv");
        let mut r = Record::new("https://fs.test/fund9");
        r.name = "Fund, with comma".into();
        r.transfer_agent = "TA Ltd".into();

        SnapshotWriter::write(&path, &[r.clone()]).unwrap();
        let snap = SnapshotLoader::load(&path).unwrap();
        assert_eq!(snap.get("https://fs.test/fund9"), Some(&r));
        assert_eq!(snap.source.as_deref(), Some(path.as_path()));
    }
}
