//! Environment-driven configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::batch::BatchConfig;
use crate::types::{Credentials, MonitorError, MonitorResult};

const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_ARCHIVE_DIR: &str = "monthly_monitoring";
const DEFAULT_REQUEST_DELAY_MS: u64 = 1_000;
const DEFAULT_EXTRACT_DELAY_MS: u64 = 2_000;
const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_RELOGIN_EVERY: usize = 20;
const DEFAULT_BATCH_PAUSE_MS: u64 = 5_000;
const DEFAULT_SESSION_MEMORY_GB: f64 = 2.0;
const DEFAULT_PAGE_TIMEOUT_MS: u64 = 30_000;

pub const USERNAME_VAR: &str = "FUNDSQUARE_USERNAME";
pub const PASSWORD_VAR: &str = "FUNDSQUARE_PASSWORD";

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub output_dir: PathBuf,
    pub archive_dir: PathBuf,
    /// Pause after every discovery search.
    pub request_delay: Duration,
    /// Pause after every record extraction.
    pub extract_delay: Duration,
    pub batch_size: usize,
    pub relogin_every: usize,
    pub batch_pause: Duration,
    pub session_memory_gb: f64,
    pub page_timeout: Duration,
    pub site_profile: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            archive_dir: PathBuf::from(DEFAULT_ARCHIVE_DIR),
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            extract_delay: Duration::from_millis(DEFAULT_EXTRACT_DELAY_MS),
            batch_size: DEFAULT_BATCH_SIZE,
            relogin_every: DEFAULT_RELOGIN_EVERY,
            batch_pause: Duration::from_millis(DEFAULT_BATCH_PAUSE_MS),
            session_memory_gb: DEFAULT_SESSION_MEMORY_GB,
            page_timeout: Duration::from_millis(DEFAULT_PAGE_TIMEOUT_MS),
            site_profile: None,
        }
    }
}

impl MonitorConfig {
    /// Read `FUND_MONITOR_*` variables, falling back to defaults for anything
    /// unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            output_dir: read_env_path("FUND_MONITOR_OUTPUT_DIR").unwrap_or(defaults.output_dir),
            archive_dir: read_env_path("FUND_MONITOR_ARCHIVE_DIR")
                .unwrap_or(defaults.archive_dir),
            request_delay: Duration::from_millis(read_env_u64(
                "FUND_MONITOR_REQUEST_DELAY_MS",
                DEFAULT_REQUEST_DELAY_MS,
            )),
            extract_delay: Duration::from_millis(read_env_u64(
                "FUND_MONITOR_EXTRACT_DELAY_MS",
                DEFAULT_EXTRACT_DELAY_MS,
            )),
            batch_size: read_env_usize("FUND_MONITOR_BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1),
            relogin_every: read_env_usize("FUND_MONITOR_RELOGIN_EVERY", DEFAULT_RELOGIN_EVERY),
            batch_pause: Duration::from_millis(read_env_u64(
                "FUND_MONITOR_BATCH_PAUSE_MS",
                DEFAULT_BATCH_PAUSE_MS,
            )),
            session_memory_gb: read_env_f64(
                "FUND_MONITOR_SESSION_MEMORY_GB",
                DEFAULT_SESSION_MEMORY_GB,
            ),
            page_timeout: Duration::from_millis(read_env_u64(
                "FUND_MONITOR_PAGE_TIMEOUT_MS",
                DEFAULT_PAGE_TIMEOUT_MS,
            )),
            site_profile: read_env_path("FUND_MONITOR_SITE_PROFILE"),
        }
    }

    /// Batch settings derived from this configuration.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size,
            relogin_every: self.relogin_every,
            extract_delay: self.extract_delay,
            batch_pause: self.batch_pause,
            session_memory_gb: self.session_memory_gb,
            parallel: false,
            max_workers: None,
            output_dir: self.output_dir.clone(),
        }
    }
}

/// Credentials from `FUNDSQUARE_USERNAME` / `FUNDSQUARE_PASSWORD`.
pub fn credentials_from_env() -> MonitorResult<Credentials> {
    let username = read_env_string(USERNAME_VAR).filter(|v| !v.is_empty());
    let password = std::env::var(PASSWORD_VAR).ok().filter(|v| !v.is_empty());
    match (username, password) {
        (Some(u), Some(p)) => Ok(Credentials::new(u, p)),
        _ => Err(MonitorError::Config(format!(
            "{USERNAME_VAR} and {PASSWORD_VAR} must both be set"
        ))),
    }
}

fn read_env_u64(name: &str, default_value: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_value)
}

fn read_env_usize(name: &str, default_value: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default_value)
}

fn read_env_f64(name: &str, default_value: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(default_value)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string())
}

fn read_env_path(name: &str) -> Option<PathBuf> {
    read_env_string(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global; each test uses its own variable names.

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.relogin_every, 20);
        assert_eq!(config.request_delay, Duration::from_secs(1));
        assert_eq!(config.archive_dir, PathBuf::from("monthly_monitoring"));
        let batch = config.batch_config();
        assert_eq!(batch.extract_delay, Duration::from_secs(2));
        assert!(!batch.parallel);
    }

    #[test]
    fn test_read_helpers_fall_back() {
        std::env::set_var("FUND_MONITOR_TEST_U64", "250");
        std::env::set_var("FUND_MONITOR_TEST_BAD", "lots");
        std::env::set_var("FUND_MONITOR_TEST_F64", "-3");
        assert_eq!(read_env_u64("FUND_MONITOR_TEST_U64", 1), 250);
        assert_eq!(read_env_usize("FUND_MONITOR_TEST_BAD", 7), 7);
        assert_eq!(read_env_f64("FUND_MONITOR_TEST_F64", 2.0), 2.0);
        assert_eq!(read_env_path("FUND_MONITOR_TEST_UNSET_PATH"), None);
    }
}
