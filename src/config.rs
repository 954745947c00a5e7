use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of concurrent workers.
    pub workers: u32,
    /// Bodies shorter than this are treated as failed fetches.
    pub min_body_len: usize,
    /// Messages the scheduler accepts before `push` waits.
    pub scheduler_buffer: usize,
    /// Parse results buffered between the workers and the dispatcher.
    pub result_buffer: usize,
    /// How long a fetch may wait for the rate limiter, in milliseconds.
    /// Waits are unbounded when unset.
    pub rate_limit_timeout_ms: Option<u64>,
    /// Stop the engine once no request is queued or being processed.
    /// Otherwise the crawl runs until stopped through `Engine::stop_handle`.
    pub exit_when_idle: bool,
    /// Interval between two progress reports, in seconds.
    pub report_interval_secs: u64,
}

impl Config {
    pub fn sanity_check(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("config.workers cannot be zero".to_owned()));
        }
        if self.scheduler_buffer == 0 {
            return Err(ConfigError::Invalid(
                "config.scheduler_buffer cannot be zero".to_owned(),
            ));
        }
        if self.result_buffer == 0 {
            return Err(ConfigError::Invalid(
                "config.result_buffer cannot be zero".to_owned(),
            ));
        }
        if self.report_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "config.report_interval_secs cannot be zero".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn rate_limit_timeout(&self) -> Option<Duration> {
        self.rate_limit_timeout_ms.map(Duration::from_millis)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.sanity_check()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 16,
            min_body_len: 6000,
            scheduler_buffer: 32,
            result_buffer: 32,
            rate_limit_timeout_ms: None,
            exit_when_idle: true,
            report_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_sane() {
        assert!(Config::default().sanity_check().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = Config::from_yaml_str(
            "workers: 4\nmin_body_len: 100\nrate_limit_timeout_ms: 1500\n",
        )
        .unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.min_body_len, 100);
        assert_eq!(config.rate_limit_timeout(), Some(Duration::from_millis(1500)));
        assert!(config.exit_when_idle);
        assert_eq!(config.report_interval_secs, 60);
    }

    #[test]
    fn test_rejects_zero_workers() {
        assert!(matches!(
            Config::from_yaml_str("workers: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml_str("workers: [1"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_from_missing_file() {
        assert!(matches!(
            Config::from_file("does/not/exist.yml"),
            Err(ConfigError::Io(_))
        ));
    }
}
