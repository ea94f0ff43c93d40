//! Per-strategy discovery metrics and analytics export.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::MonitorResult;

/// Description given to strategies that were never explicitly registered.
pub const AUTO_REGISTERED: &str = "Auto-registered";

/// Accumulated counters for one discovery strategy.
#[derive(Debug, Clone, Default)]
pub struct StrategyMetrics {
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    /// Identifiers returned across all attempts, duplicates included.
    pub total_found: u64,
    pub success_count: u64,
    pub attempt_count: u64,
    pub unique_identifiers: BTreeSet<String>,
    /// Per-attempt durations in seconds.
    pub execution_times: Vec<f64>,
}

impl StrategyMetrics {
    fn new(name: &str, description: &str, category: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            category: category.map(String::from),
            ..Self::default()
        }
    }

    /// `success_count / attempt_count * 100`, 0 without attempts. Not clamped.
    pub fn success_rate(&self) -> f64 {
        if self.attempt_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.attempt_count as f64 * 100.0
    }

    /// Mean attempt duration in seconds, 0 without attempts.
    pub fn avg_execution_time(&self) -> f64 {
        if self.execution_times.is_empty() {
            return 0.0;
        }
        self.execution_times.iter().sum::<f64>() / self.execution_times.len() as f64
    }

    pub fn urls_per_attempt(&self) -> f64 {
        if self.attempt_count == 0 {
            return 0.0;
        }
        self.total_found as f64 / self.attempt_count as f64
    }

    fn analytics(&self) -> StrategyAnalytics {
        StrategyAnalytics {
            description: self.description.clone(),
            category: self.category.clone(),
            total_urls_found: self.total_found,
            total_success_count: self.success_count,
            total_attempts: self.attempt_count,
            success_rate: self.success_rate(),
            unique_funds_count: self.unique_identifiers.len(),
            avg_execution_time: self.avg_execution_time(),
            urls_per_attempt: self.urls_per_attempt(),
        }
    }
}

/// Derived, read-only view of one strategy's metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAnalytics {
    pub description: String,
    pub category: Option<String>,
    pub total_urls_found: u64,
    pub total_success_count: u64,
    pub total_attempts: u64,
    pub success_rate: f64,
    pub unique_funds_count: usize,
    pub avg_execution_time: f64,
    pub urls_per_attempt: f64,
}

/// Tracks every strategy of one discovery run.
#[derive(Debug, Default)]
pub struct StrategyTracker {
    strategies: BTreeMap<String, StrategyMetrics>,
}

impl StrategyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy. Re-registering updates the labels and keeps the counters.
    pub fn register_strategy(&mut self, name: &str, description: &str, category: Option<&str>) {
        match self.strategies.get_mut(name) {
            Some(existing) => {
                existing.description = description.to_string();
                existing.category = category.map(String::from);
            }
            None => {
                self.strategies.insert(
                    name.to_string(),
                    StrategyMetrics::new(name, description, category),
                );
            }
        }
    }

    /// Record one attempt. Unknown strategies are auto-registered.
    pub fn record_result<I, S>(
        &mut self,
        name: &str,
        found_count: u64,
        success_count: u64,
        duration_secs: f64,
        identifiers: I,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.strategies.contains_key(name) {
            tracing::debug!("Auto-registering strategy {name}");
            self.register_strategy(name, AUTO_REGISTERED, None);
        }
        let Some(metrics) = self.strategies.get_mut(name) else {
            return;
        };
        metrics.total_found += found_count;
        metrics.success_count += success_count;
        metrics.attempt_count += 1;
        metrics.execution_times.push(duration_secs);
        metrics
            .unique_identifiers
            .extend(identifiers.into_iter().map(Into::into));
    }

    pub fn get(&self, name: &str) -> Option<&StrategyMetrics> {
        self.strategies.get(name)
    }

    pub fn strategies(&self) -> impl Iterator<Item = &StrategyMetrics> {
        self.strategies.values()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Sum of `total_found` over all strategies.
    pub fn total_found(&self) -> u64 {
        self.strategies.values().map(|m| m.total_found).sum()
    }

    /// Derived analytics for every registered strategy, attempted or not.
    pub fn analytics(&self) -> BTreeMap<String, StrategyAnalytics> {
        self.strategies
            .iter()
            .map(|(name, m)| (name.clone(), m.analytics()))
            .collect()
    }

    /// Write `strategy_analytics_<stamp>.json` and `.csv` into `output_dir`.
    pub fn export_analytics(&self, output_dir: &Path) -> MonitorResult<(PathBuf, PathBuf)> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        self.export_analytics_stamped(output_dir, &stamp)
    }

    /// Export with an explicit run stamp.
    pub fn export_analytics_stamped(
        &self,
        output_dir: &Path,
        stamp: &str,
    ) -> MonitorResult<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(output_dir)?;
        let analytics = self.analytics();

        let json_path = output_dir.join(format!("strategy_analytics_{stamp}.json"));
        let json_result: MonitorResult<()> = serde_json::to_vec_pretty(&analytics)
            .map_err(Into::into)
            .and_then(|bytes| std::fs::write(&json_path, bytes).map_err(Into::into));

        let csv_path = output_dir.join(format!("strategy_analytics_{stamp}.csv"));
        let csv_result = write_analytics_csv(&csv_path, &analytics);

        if let Err(e) = &json_result {
            tracing::error!("Failed to write {}: {e}", json_path.display());
        }
        if let Err(e) = &csv_result {
            tracing::error!("Failed to write {}: {e}", csv_path.display());
        }
        json_result?;
        csv_result?;

        tracing::info!(
            "Strategy analytics exported: {} and {}",
            json_path.display(),
            csv_path.display()
        );
        Ok((json_path, csv_path))
    }
}

fn write_analytics_csv(
    path: &Path,
    analytics: &BTreeMap<String, StrategyAnalytics>,
) -> MonitorResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    // Header row.
    writer.write_record([
        "Strategy",
        "Description",
        "Category",
        "URLs_Found",
        "Success_Count",
        "Success_Rate",
        "Unique_Funds",
        "Avg_Execution_Time",
        "URLs_Per_Attempt",
    ])?;
    for (name, a) in analytics {
        writer.write_record([
            name.clone(),
            a.description.clone(),
            a.category.clone().unwrap_or_default(),
            a.total_urls_found.to_string(),
            a.total_success_count.to_string(),
            format!("{:.2}", a.success_rate),
            a.unique_funds_count.to_string(),
            format!("{:.2}", a.avg_execution_time),
            format!("{:.2}", a.urls_per_attempt),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_additive_counters_are_not_clamped() {
        let mut tracker = StrategyTracker::new();
        tracker.register_strategy("S", "test strategy", Some("Pattern-Based"));
        tracker.record_result("S", 10, 8, 2.0, ["1", "2", "3"]);
        tracker.record_result("S", 5, 5, 1.0, ["3", "4"]);

        let m = tracker.get("S").unwrap();
        assert_eq!(m.total_found, 15);
        assert_eq!(m.success_count, 13);
        assert_eq!(m.attempt_count, 2);
        let ids: Vec<&str> = m.unique_identifiers.iter().map(String::as_str).collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
        assert!((m.success_rate() - 650.0).abs() < 1e-9);
        assert!((m.avg_execution_time() - 1.5).abs() < 1e-9);
        assert!((m.urls_per_attempt() - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_zero_attempts_report_zero() {
        let mut tracker = StrategyTracker::new();
        tracker.register_strategy("idle", "never run", None);
        let analytics = tracker.analytics();
        let a = &analytics["idle"];
        assert_eq!(a.total_attempts, 0);
        assert_eq!(a.success_rate, 0.0);
        assert_eq!(a.avg_execution_time, 0.0);
        assert_eq!(a.urls_per_attempt, 0.0);
        assert!(!a.success_rate.is_nan());
    }

    #[test]
    fn test_reregistering_keeps_counters() {
        let mut tracker = StrategyTracker::new();
        tracker.register_strategy("S", "first", None);
        tracker.record_result("S", 3, 3, 0.5, ["a"]);
        tracker.register_strategy("S", "second", Some("Structure-Based"));

        let m = tracker.get("S").unwrap();
        assert_eq!(m.description, "second");
        assert_eq!(m.category.as_deref(), Some("Structure-Based"));
        assert_eq!(m.total_found, 3);
        assert_eq!(m.attempt_count, 1);
    }

    #[test]
    fn test_unknown_strategy_is_auto_registered() {
        let mut tracker = StrategyTracker::new();
        tracker.record_result("ghost", 0, 0, 0.1, Vec::<String>::new());
        let m = tracker.get("ghost").unwrap();
        assert_eq!(m.description, AUTO_REGISTERED);
        assert_eq!(m.attempt_count, 1);
    }

    #[test]
    fn test_export_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = StrategyTracker::new();
        tracker.register_strategy("ISIN_Pattern_Search", "isin", Some("Pattern-Based"));
        tracker.record_result("ISIN_Pattern_Search", 4, 2, 1.25, ["x", "y"]);

        let (json, csv) = tracker
            .export_analytics_stamped(dir.path(), "20250101_000000")
            .unwrap();
        assert!(json.ends_with("strategy_analytics_20250101_000000.json"));

        let parsed: BTreeMap<String, StrategyAnalytics> =
            serde_json::from_slice(&std::fs::read(&json).unwrap()).unwrap();
        assert_eq!(parsed["ISIN_Pattern_Search"].unique_funds_count, 2);

        let text = std::fs::read_to_string(&csv).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Strategy,Description,Category,URLs_Found,Success_Count,Success_Rate,Unique_Funds,Avg_Execution_Time,URLs_Per_Attempt"
        );
        assert_eq!(
            lines.next().unwrap(),
            "ISIN_Pattern_Search,isin,Pattern-Based,4,2,200.00,2,1.25,4.00"
        );
    }

    #[test]
    fn test_export_failure_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let mut tracker = StrategyTracker::new();
        tracker.record_result("S", 1, 1, 0.2, ["a"]);
        assert!(tracker.export_analytics(&blocker).is_err());
        assert_eq!(tracker.get("S").unwrap().attempt_count, 1);
    }
}
