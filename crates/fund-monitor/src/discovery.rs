//! Multi-strategy fund discovery over one authenticated browser session.
//!
//! The orchestrator walks a list of [`DiscoveryStrategy`] values in order.
//! Each candidate search feeds a global first-seen-ordered identifier set
//! and the [`StrategyTracker`]. A failed search is recorded as an empty
//! attempt; only a failed login aborts the run.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::identifiers::write_identifiers;
use crate::progress::{ProgressEmitter, ProgressEventKind};
use crate::session::{BrowserSession, SearchCriteria};
use crate::snapshot::delimiter_for;
use crate::tracker::{StrategyAnalytics, StrategyTracker};
use crate::types::{Credentials, LoadError, MonitorError, MonitorResult, SessionError};

/// ISIN country prefixes searched by default.
pub const DEFAULT_ISIN_COUNTRY_CODES: [&str; 10] =
    ["LU", "IE", "FR", "DE", "GB", "NL", "AT", "BE", "CH", "IT"];

/// Legal structure labels searched by default.
pub const DEFAULT_LEGAL_STRUCTURES: [&str; 10] = [
    "SICAV",
    "FCP",
    "UCITS",
    "AIF",
    "ETF",
    "OEIC",
    "Unit Trust",
    "Investment Trust",
    "Mutual Fund",
    "Hedge Fund",
];

pub const ISIN_PATTERN_STRATEGY: &str = "ISIN_Pattern_Search";
pub const LEGAL_STRUCTURE_STRATEGY: &str = "Legal_Structure_Search";

/// Lifecycle of one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryState {
    Idle,
    SessionEstablished,
    Discovering,
    Finalized,
}

/// A named discovery method and the candidates it searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryStrategy {
    pub name: String,
    pub description: String,
    pub category: String,
    pub candidates: Vec<SearchCriteria>,
}

impl DiscoveryStrategy {
    /// `SP_Search_<category>` over every provider listed for that category.
    pub fn service_provider(category: &str, providers: &[ServiceProvider]) -> Self {
        Self {
            name: format!("SP_Search_{category}"),
            description: format!("Search by {category} service providers"),
            category: "Service Provider".to_string(),
            candidates: providers
                .iter()
                .map(|p| SearchCriteria::ServiceProvider {
                    category: category.to_string(),
                    value: p.value.clone(),
                    label: p.text.clone(),
                })
                .collect(),
        }
    }

    /// Wildcard ISIN searches, one per country code.
    pub fn isin_patterns<S: AsRef<str>>(country_codes: &[S]) -> Self {
        Self {
            name: ISIN_PATTERN_STRATEGY.to_string(),
            description: "Search using ISIN country code patterns".to_string(),
            category: "Pattern-Based".to_string(),
            candidates: country_codes
                .iter()
                .map(|code| SearchCriteria::IsinPrefix {
                    pattern: format!("{}*", code.as_ref()),
                })
                .collect(),
        }
    }

    pub fn legal_structures<S: AsRef<str>>(labels: &[S]) -> Self {
        Self {
            name: LEGAL_STRUCTURE_STRATEGY.to_string(),
            description: "Search by fund legal structure".to_string(),
            category: "Structure-Based".to_string(),
            candidates: labels
                .iter()
                .map(|l| SearchCriteria::LegalStructure {
                    label: l.as_ref().to_string(),
                })
                .collect(),
        }
    }

    /// Service-provider strategies (when a roster is available), then ISIN
    /// patterns, then legal structures.
    pub fn default_catalogue(roster: Option<&ServiceProviderRoster>) -> Vec<Self> {
        let mut strategies = match roster {
            Some(roster) => roster.strategies(),
            None => {
                tracing::warn!("No service provider roster loaded. Skipping SP discovery.");
                Vec::new()
            }
        };
        strategies.push(Self::isin_patterns(&DEFAULT_ISIN_COUNTRY_CODES));
        strategies.push(Self::legal_structures(&DEFAULT_LEGAL_STRUCTURES));
        strategies
    }
}

/// One selectable provider in a search dropdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProvider {
    pub value: String,
    pub text: String,
}

/// Service providers grouped by category, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct ServiceProviderRoster {
    categories: Vec<(String, Vec<ServiceProvider>)>,
}

impl ServiceProviderRoster {
    /// Read a `Category,Value,Text` file.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let delimiter =
            delimiter_for(path).ok_or_else(|| LoadError::UnsupportedFormat(path.to_path_buf()))?;
        let malformed = |reason: String| LoadError::Malformed {
            path: path.to_path_buf(),
            reason,
        };
        let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(file);

        let headers = rdr.headers().map_err(|e| malformed(e.to_string()))?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| malformed(format!("missing column {name}")))
        };
        let (category_col, value_col, text_col) =
            (column("Category")?, column("Value")?, column("Text")?);

        let mut roster = Self::default();
        let mut total = 0;
        for row in rdr.records() {
            let row = row.map_err(|e| malformed(e.to_string()))?;
            let cell = |i: usize| row.get(i).map(str::trim).unwrap_or("");
            let (category, value, text) = (cell(category_col), cell(value_col), cell(text_col));
            if category.is_empty() || value.is_empty() || text.is_empty() {
                continue;
            }
            roster.push(category, ServiceProvider {
                value: value.to_string(),
                text: text.to_string(),
            });
            total += 1;
        }

        tracing::info!(
            "Loaded {total} service providers from {} categories",
            roster.categories.len()
        );
        Ok(roster)
    }

    pub fn push(&mut self, category: &str, provider: ServiceProvider) {
        match self.categories.iter_mut().find(|(c, _)| c == category) {
            Some((_, providers)) => providers.push(provider),
            None => self
                .categories
                .push((category.to_string(), vec![provider])),
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &[ServiceProvider])> {
        self.categories
            .iter()
            .map(|(c, p)| (c.as_str(), p.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// One strategy per category.
    pub fn strategies(&self) -> Vec<DiscoveryStrategy> {
        self.categories()
            .map(|(category, providers)| DiscoveryStrategy::service_provider(category, providers))
            .collect()
    }
}

/// Final output of a discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub run_id: String,
    /// Unique identifiers in first-seen order.
    pub identifiers: Vec<String>,
    /// Identifiers returned across every search, duplicates included.
    pub total_found: u64,
    /// `total_found - identifiers.len()`.
    pub duplicates_saved: u64,
    pub analytics: BTreeMap<String, StrategyAnalytics>,
}

/// Files written by [`DiscoveryOrchestrator::persist`].
#[derive(Debug, Clone)]
pub struct DiscoveryArtifacts {
    pub identifiers: PathBuf,
    pub analytics_json: PathBuf,
    pub analytics_csv: PathBuf,
}

pub struct DiscoveryOrchestrator {
    session: Box<dyn BrowserSession>,
    state: DiscoveryState,
    tracker: StrategyTracker,
    seen: HashSet<String>,
    discovered: Vec<String>,
    request_delay: Duration,
    progress: ProgressEmitter,
}

impl DiscoveryOrchestrator {
    pub fn new(session: Box<dyn BrowserSession>, request_delay: Duration) -> Self {
        Self {
            session,
            state: DiscoveryState::Idle,
            tracker: StrategyTracker::new(),
            seen: HashSet::new(),
            discovered: Vec::new(),
            request_delay,
            progress: ProgressEmitter::disabled(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressEmitter) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn tracker(&self) -> &StrategyTracker {
        &self.tracker
    }

    /// Identifiers discovered so far, in first-seen order.
    pub fn discovered(&self) -> &[String] {
        &self.discovered
    }

    /// Log in. Any failure here is fatal for the run.
    pub async fn establish_session(&mut self, credentials: &Credentials) -> MonitorResult<()> {
        if self.state != DiscoveryState::Idle {
            return Err(MonitorError::InvalidState(format!(
                "cannot log in from state {:?}",
                self.state
            )));
        }
        tracing::info!("Attempting to log in as {}", credentials.username);
        match self.session.submit_credentials(credentials).await {
            Ok(true) => {
                tracing::info!("Login successful");
                self.state = DiscoveryState::SessionEstablished;
                Ok(())
            }
            Ok(false) => {
                tracing::error!("Login rejected for {}", credentials.username);
                Err(SessionError::LoginRejected(credentials.username.clone()).into())
            }
            Err(e) => {
                tracing::error!("Login failed: {e}");
                Err(e.into())
            }
        }
    }

    /// Run every strategy in order. May be called more than once before finalizing.
    pub async fn run(&mut self, strategies: &[DiscoveryStrategy]) -> MonitorResult<()> {
        match self.state {
            DiscoveryState::SessionEstablished | DiscoveryState::Discovering => {}
            other => {
                return Err(MonitorError::InvalidState(format!(
                    "cannot discover from state {other:?}"
                )))
            }
        }
        self.state = DiscoveryState::Discovering;

        for strategy in strategies {
            self.run_strategy(strategy).await;
        }

        tracing::info!(
            "Discovery pass finished: {} unique identifiers, {} returned in total",
            self.discovered.len(),
            self.tracker.total_found()
        );
        Ok(())
    }

    async fn run_strategy(&mut self, strategy: &DiscoveryStrategy) {
        tracing::info!(
            "Starting {} ({} candidates)",
            strategy.name,
            strategy.candidates.len()
        );
        self.tracker.register_strategy(
            &strategy.name,
            &strategy.description,
            Some(&strategy.category),
        );
        self.progress.emit(ProgressEventKind::StrategyStarted {
            strategy: strategy.name.clone(),
            candidates: strategy.candidates.len(),
        });

        let started = Instant::now();
        let mut strategy_new = 0;
        for criteria in &strategy.candidates {
            tracing::debug!("Searching {criteria}");
            let attempt = Instant::now();
            let result = self.session.run_search(criteria).await;
            let elapsed = attempt.elapsed().as_secs_f64();

            let (returned, new_unique, failed) = match result {
                Ok(ids) => {
                    let returned = ids.len();
                    let mut new_unique = 0;
                    for id in &ids {
                        if self.seen.insert(id.clone()) {
                            self.discovered.push(id.clone());
                            new_unique += 1;
                        }
                    }
                    self.tracker.record_result(
                        &strategy.name,
                        returned as u64,
                        new_unique as u64,
                        elapsed,
                        ids,
                    );
                    (returned, new_unique, false)
                }
                Err(e) => {
                    tracing::warn!("Search failed for {criteria}: {e}");
                    self.tracker
                        .record_result(&strategy.name, 0, 0, elapsed, Vec::<String>::new());
                    (0, 0, true)
                }
            };
            strategy_new += new_unique;
            self.progress.emit(ProgressEventKind::CandidateSearched {
                strategy: strategy.name.clone(),
                candidate: criteria.to_string(),
                returned,
                new_unique,
                failed,
            });

            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
        }

        tracing::info!("{}: found {strategy_new} new identifiers", strategy.name);
        self.progress.emit(ProgressEventKind::StrategyCompleted {
            strategy: strategy.name.clone(),
            new_unique: strategy_new,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }

    /// Close the run and build its report. The tracker becomes read-only.
    pub fn finalize(&mut self) -> MonitorResult<DiscoveryReport> {
        if self.state == DiscoveryState::Idle {
            return Err(MonitorError::InvalidState(
                "cannot finalize before a session is established".to_string(),
            ));
        }
        self.state = DiscoveryState::Finalized;

        if self.discovered.is_empty() {
            tracing::warn!("Discovery finished without finding any identifiers");
        }
        let total_found = self.tracker.total_found();
        Ok(DiscoveryReport {
            run_id: self.progress.run_id().to_string(),
            identifiers: self.discovered.clone(),
            total_found,
            duplicates_saved: total_found.saturating_sub(self.discovered.len() as u64),
            analytics: self.tracker.analytics(),
        })
    }

    /// Write `discovered_urls_<stamp>.csv` and the strategy analytics.
    pub fn persist(&self, output_dir: &Path, stamp: &str) -> MonitorResult<DiscoveryArtifacts> {
        let identifiers = output_dir.join(format!("discovered_urls_{stamp}.csv"));
        write_identifiers(&identifiers, &self.discovered)?;
        tracing::info!(
            "Saved {} discovered identifiers to {}",
            self.discovered.len(),
            identifiers.display()
        );
        let (analytics_json, analytics_csv) =
            self.tracker.export_analytics_stamped(output_dir, stamp)?;
        Ok(DiscoveryArtifacts {
            identifiers,
            analytics_json,
            analytics_csv,
        })
    }

    /// Release the browser session.
    pub async fn close(self) -> MonitorResult<()> {
        self.session.close().await?;
        Ok(())
    }
}
