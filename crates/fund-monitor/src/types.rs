//! Core data types: fund records, the field taxonomy, change records, and errors.

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Cell values that mean "no value" in a snapshot.
const MISSING_SENTINELS: [&str; 2] = ["-", "nan"];

/// True when a cell carries an actual value (not empty, not a missing sentinel).
pub fn has_value(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty()
        && !MISSING_SENTINELS
            .iter()
            .any(|s| trimmed.eq_ignore_ascii_case(s))
}

/// One fund as extracted from the catalog site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Fund page URL. Primary key within a snapshot.
    pub primary_id: String,
    /// ISIN. Optional, may hold a missing sentinel.
    pub secondary_id: String,
    pub name: String,
    pub creation_date: String,
    pub last_valuation: String,
    pub administrator: String,
    pub auditor: String,
    pub custodian: String,
    pub depositary: String,
    pub prime_broker: String,
    pub promoter: String,
    pub transfer_agent: String,
    pub legal_advisor: String,
    pub extraction_date: String,
}

impl Record {
    /// Create a record with only the primary key set.
    pub fn new(primary_id: impl Into<String>) -> Self {
        Self {
            primary_id: primary_id.into(),
            ..Self::default()
        }
    }

    /// Read a field through the accessor table.
    pub fn field(&self, field: FieldName) -> &str {
        match field {
            FieldName::PrimaryId => &self.primary_id,
            FieldName::SecondaryId => &self.secondary_id,
            FieldName::Name => &self.name,
            FieldName::CreationDate => &self.creation_date,
            FieldName::LastValuation => &self.last_valuation,
            FieldName::Administrator => &self.administrator,
            FieldName::Auditor => &self.auditor,
            FieldName::Custodian => &self.custodian,
            FieldName::Depositary => &self.depositary,
            FieldName::PrimeBroker => &self.prime_broker,
            FieldName::Promoter => &self.promoter,
            FieldName::TransferAgent => &self.transfer_agent,
            FieldName::LegalAdvisor => &self.legal_advisor,
            FieldName::ExtractionDate => &self.extraction_date,
        }
    }

    /// Mutable access through the accessor table.
    pub fn field_mut(&mut self, field: FieldName) -> &mut String {
        match field {
            FieldName::PrimaryId => &mut self.primary_id,
            FieldName::SecondaryId => &mut self.secondary_id,
            FieldName::Name => &mut self.name,
            FieldName::CreationDate => &mut self.creation_date,
            FieldName::LastValuation => &mut self.last_valuation,
            FieldName::Administrator => &mut self.administrator,
            FieldName::Auditor => &mut self.auditor,
            FieldName::Custodian => &mut self.custodian,
            FieldName::Depositary => &mut self.depositary,
            FieldName::PrimeBroker => &mut self.prime_broker,
            FieldName::Promoter => &mut self.promoter,
            FieldName::TransferAgent => &mut self.transfer_agent,
            FieldName::LegalAdvisor => &mut self.legal_advisor,
            FieldName::ExtractionDate => &mut self.extraction_date,
        }
    }

    /// The secondary key, if it carries a value.
    pub fn secondary_key(&self) -> Option<&str> {
        has_value(&self.secondary_id).then(|| self.secondary_id.trim())
    }
}

/// Which half of the field taxonomy a compared field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldCategory {
    Identity,
    ServiceProvider,
    OtherData,
    Bookkeeping,
}

/// Every named column of a snapshot, in serialization order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    PrimaryId,
    SecondaryId,
    Name,
    CreationDate,
    LastValuation,
    Administrator,
    Auditor,
    Custodian,
    Depositary,
    PrimeBroker,
    Promoter,
    TransferAgent,
    LegalAdvisor,
    ExtractionDate,
}

impl FieldName {
    /// Snapshot column order.
    pub const ALL: [FieldName; 14] = [
        FieldName::PrimaryId,
        FieldName::SecondaryId,
        FieldName::Name,
        FieldName::CreationDate,
        FieldName::LastValuation,
        FieldName::Administrator,
        FieldName::Auditor,
        FieldName::Custodian,
        FieldName::Depositary,
        FieldName::PrimeBroker,
        FieldName::Promoter,
        FieldName::TransferAgent,
        FieldName::LegalAdvisor,
        FieldName::ExtractionDate,
    ];

    /// Fields compared in the service-provider pass.
    pub const SERVICE_PROVIDERS: [FieldName; 8] = [
        FieldName::Administrator,
        FieldName::Auditor,
        FieldName::Custodian,
        FieldName::Depositary,
        FieldName::PrimeBroker,
        FieldName::Promoter,
        FieldName::TransferAgent,
        FieldName::LegalAdvisor,
    ];

    /// Fields compared in the other-data pass.
    pub const OTHER_DATA: [FieldName; 3] = [
        FieldName::Name,
        FieldName::CreationDate,
        FieldName::LastValuation,
    ];

    /// Exact (case-sensitive) column header in a snapshot file.
    pub fn column(self) -> &'static str {
        match self {
            FieldName::PrimaryId => "URL",
            FieldName::SecondaryId => "ISIN",
            FieldName::Name => "Fund Name",
            FieldName::CreationDate => "Fund Creation Date",
            FieldName::LastValuation => "Last NAV",
            FieldName::Administrator => "Central Administration",
            FieldName::Auditor => "Auditor",
            FieldName::Custodian => "Custodian",
            FieldName::Depositary => "Depositary",
            FieldName::PrimeBroker => "Prime Broker",
            FieldName::Promoter => "Marketer/Promoter",
            FieldName::TransferAgent => "Transfer Agent",
            FieldName::LegalAdvisor => "Legal Advisor",
            FieldName::ExtractionDate => "Extraction Date",
        }
    }

    /// Name written into the ledger's `Field_Name` column.
    pub fn key(self) -> &'static str {
        match self {
            FieldName::PrimaryId => "url",
            FieldName::SecondaryId => "isin",
            FieldName::Name => "fund_name",
            FieldName::CreationDate => "fund_creation_date",
            FieldName::LastValuation => "last_nav",
            FieldName::Administrator => "central_administration",
            FieldName::Auditor => "auditor",
            FieldName::Custodian => "custodian",
            FieldName::Depositary => "depositary",
            FieldName::PrimeBroker => "prime_broker",
            FieldName::Promoter => "marketer_promoter",
            FieldName::TransferAgent => "transfer_agent",
            FieldName::LegalAdvisor => "legal_advisor",
            FieldName::ExtractionDate => "extraction_date",
        }
    }

    /// Reverse lookup of [`FieldName::key`].
    pub fn from_key(key: &str) -> Option<FieldName> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    pub fn category(self) -> FieldCategory {
        match self {
            FieldName::PrimaryId | FieldName::SecondaryId => FieldCategory::Identity,
            FieldName::Name | FieldName::CreationDate | FieldName::LastValuation => {
                FieldCategory::OtherData
            }
            FieldName::ExtractionDate => FieldCategory::Bookkeeping,
            _ => FieldCategory::ServiceProvider,
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    New,
    Removed,
    FieldChanged,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::New => "NEW",
            ChangeKind::Removed => "REMOVED",
            ChangeKind::FieldChanged => "FIELD_CHANGED",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which key a NEW/REMOVED entry was matched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Primary,
    Secondary,
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    kind: ChangeKind,
    identifier: String,
    key: KeyKind,
    field: Option<FieldName>,
    old_value: Option<String>,
    new_value: Option<String>,
    detected_at: NaiveDateTime,
}

impl ChangeRecord {
    /// An entity present now but not before. Carries the display name as new value.
    pub fn added(
        key: KeyKind,
        identifier: impl Into<String>,
        name: impl Into<String>,
        detected_at: NaiveDateTime,
    ) -> Self {
        Self {
            kind: ChangeKind::New,
            identifier: identifier.into(),
            key,
            field: None,
            old_value: None,
            new_value: Some(name.into()),
            detected_at,
        }
    }

    /// An entity present before but not now. Carries the prior display name as old value.
    pub fn removed(
        key: KeyKind,
        identifier: impl Into<String>,
        name: impl Into<String>,
        detected_at: NaiveDateTime,
    ) -> Self {
        Self {
            kind: ChangeKind::Removed,
            identifier: identifier.into(),
            key,
            field: None,
            old_value: Some(name.into()),
            new_value: None,
            detected_at,
        }
    }

    /// A field whose non-empty value differs between snapshots.
    pub fn field_changed(
        identifier: impl Into<String>,
        field: FieldName,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
        detected_at: NaiveDateTime,
    ) -> Self {
        Self {
            kind: ChangeKind::FieldChanged,
            identifier: identifier.into(),
            key: KeyKind::Primary,
            field: Some(field),
            old_value: Some(old_value.into()),
            new_value: Some(new_value.into()),
            detected_at,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn key(&self) -> KeyKind {
        self.key
    }

    pub fn field(&self) -> Option<FieldName> {
        self.field
    }

    pub fn old_value(&self) -> Option<&str> {
        self.old_value.as_deref()
    }

    pub fn new_value(&self) -> Option<&str> {
        self.new_value.as_deref()
    }

    pub fn detected_at(&self) -> NaiveDateTime {
        self.detected_at
    }
}

/// Login credentials for the catalog site.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Failures of the remote browser session itself.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Browser unavailable: {0}")]
    Unavailable(String),

    #[error("Login rejected for user {0}")]
    LoginRejected(String),

    #[error("Navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Session closed")]
    Closed,
}

/// Failures extracting a single record.
#[derive(thiserror::Error, Debug)]
pub enum ExtractionError {
    #[error("Page did not load for {identifier}: {reason}")]
    PageLoad { identifier: String, reason: String },

    #[error("No record found at {0}")]
    NotFound(String),

    #[error("Extraction timed out for {0}")]
    Timeout(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Failures loading a tabular snapshot.
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("Unsupported snapshot format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Malformed snapshot {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur anywhere in the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid period label: {0}")]
    InvalidPeriod(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience result type.
pub type MonitorResult<T> = Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_value_sentinels() {
        assert!(has_value("Admin A"));
        assert!(!has_value(""));
        assert!(!has_value("   "));
        assert!(!has_value("-"));
        assert!(!has_value(" nan "));
        assert!(!has_value("NaN"));
    }

    #[test]
    fn test_field_accessor_table_covers_every_column() {
        let mut record = Record::new("https://example.test/fund/1");
        for (i, field) in FieldName::ALL.into_iter().enumerate() {
            if field == FieldName::PrimaryId {
                continue;
            }
            *record.field_mut(field) = format!("v{i}");
        }
        assert_eq!(record.field(FieldName::Auditor), "v6");
        assert_eq!(record.auditor, "v6");
        assert_eq!(record.field(FieldName::PrimaryId), "https://example.test/fund/1");
    }

    #[test]
    fn test_taxonomy_split() {
        for f in FieldName::SERVICE_PROVIDERS {
            assert_eq!(f.category(), FieldCategory::ServiceProvider);
        }
        for f in FieldName::OTHER_DATA {
            assert_eq!(f.category(), FieldCategory::OtherData);
        }
        assert_eq!(FieldName::from_key("marketer_promoter"), Some(FieldName::Promoter));
        assert_eq!(FieldName::from_key("nope"), None);
    }

    #[test]
    fn test_secondary_key_skips_sentinels() {
        let mut r = Record::new("u1");
        assert_eq!(r.secondary_key(), None);
        r.secondary_id = "nan".into();
        assert_eq!(r.secondary_key(), None);
        r.secondary_id = " LU0000000001 ".into();
        assert_eq!(r.secondary_key(), Some("LU0000000001"));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("analyst", "hunter2");
        let printed = format!("{creds:?}");
        assert!(printed.contains("analyst"));
        assert!(!printed.contains("hunter2"));
    }
}
