//! Remote browser capability.
//!
//! The pipeline never touches a browser directly. It drives a `BrowserSession`
//! (one stateful, strictly sequential connection to the catalog site) and asks
//! a `SessionFactory` for fresh sessions when batch scraping. Retries, page
//! timeouts and DOM specifics all live behind these traits.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Credentials, ExtractionError, Record, SessionError};

/// What to search the catalog for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchCriteria {
    /// Funds serviced by one provider in one provider category.
    ServiceProvider {
        category: String,
        value: String,
        label: String,
    },
    /// Funds whose ISIN matches a wildcard pattern such as `LU*`.
    IsinPrefix { pattern: String },
    /// Funds with a given legal structure label.
    LegalStructure { label: String },
}

impl fmt::Display for SearchCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceProvider {
                category, label, ..
            } => write!(f, "{category}: {label}"),
            Self::IsinPrefix { pattern } => write!(f, "ISIN {pattern}"),
            Self::LegalStructure { label } => write!(f, "structure {label}"),
        }
    }
}

/// A single authenticated browser session.
#[async_trait]
pub trait BrowserSession: Send {
    /// Load a page.
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    /// Log in. `Ok(false)` means the site rejected the credentials.
    async fn submit_credentials(&mut self, credentials: &Credentials)
        -> Result<bool, SessionError>;

    /// Run one catalog search and return the result identifiers, in page order.
    async fn run_search(&mut self, criteria: &SearchCriteria) -> Result<Vec<String>, SessionError>;

    /// Extract the record behind one identifier.
    async fn extract_record(&mut self, identifier: &str) -> Result<Record, ExtractionError>;

    /// Release the underlying browser.
    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Opens independent sessions, one per batch chunk.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criteria_display() {
        let sp = SearchCriteria::ServiceProvider {
            category: "Auditor".into(),
            value: "123".into(),
            label: "Big Four LLP".into(),
        };
        assert_eq!(sp.to_string(), "Auditor: Big Four LLP");
        assert_eq!(
            SearchCriteria::IsinPrefix {
                pattern: "LU*".into()
            }
            .to_string(),
            "ISIN LU*"
        );
    }

    #[test]
    fn test_criteria_serialization_is_tagged() {
        let c = SearchCriteria::LegalStructure {
            label: "SICAV".into(),
        };
        let json = serde_json::to_string(&c).unwrap();
        assert!(json.contains("\"kind\":\"legal_structure\""));
        let back: SearchCriteria = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
