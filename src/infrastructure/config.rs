//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate: an optional file source
//! (any format `config` detects from the extension) under environment
//! variables prefixed with `HARVEST`, using `__` between sections, e.g.
//! `HARVEST_FETCH__MAX_RETRIES=3`. Every section carries serde defaults, so
//! an empty source yields a working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::infrastructure::proxy_pool::ProxySelection;
use crate::infrastructure::retry_policy::{RetryLimit, RetryPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error("Required input missing: {message}")]
    MissingInput { message: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub fetch: FetchConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// JSON array of relative product paths
    pub product_links_path: PathBuf,

    /// One proxy per line
    pub proxies_path: PathBuf,

    /// "random" (default) or "round_robin"
    pub proxy_selection: ProxySelection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Checkpoint file, also the final output and the dedup source
    pub checkpoint_path: PathBuf,

    /// Flush after every N successful merges
    pub checkpoint_every: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Absolute base the relative product paths are joined onto
    pub site_base_url: String,

    pub request_timeout_secs: u64,

    /// Consecutive failures before the long backoff
    pub max_retries: u32,

    /// Pause between consecutive failures inside one window
    pub retry_delay_secs: u64,

    /// Long pause after `max_retries` consecutive failures
    pub backoff_wait_secs: u64,

    /// Give up on an item after this many attempts in total. 0 means no cap.
    pub max_total_attempts: Option<u32>,

    /// Give up on an item after this much wall-clock time
    pub deadline_secs: Option<u64>,

    /// Ignore the two limits above and keep retrying until cancelled
    pub retry_forever: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Items processed at the same time
    pub concurrency: usize,

    /// Upper bound of the random pause before each item
    pub jitter_max_ms: u64,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    /// Relative paths are resolved against the current directory
    pub log_dir: PathBuf,

    pub file_name: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            product_links_path: PathBuf::from(defaults::PRODUCT_LINKS_PATH),
            proxies_path: PathBuf::from(defaults::PROXIES_PATH),
            proxy_selection: ProxySelection::Random,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from(defaults::CHECKPOINT_PATH),
            checkpoint_every: defaults::CHECKPOINT_EVERY,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            site_base_url: site::BASE_URL.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECONDS,
            max_retries: defaults::MAX_RETRIES,
            retry_delay_secs: defaults::RETRY_DELAY_SECONDS,
            backoff_wait_secs: defaults::BACKOFF_WAIT_SECONDS,
            max_total_attempts: Some(defaults::MAX_TOTAL_ATTEMPTS),
            deadline_secs: None,
            retry_forever: false,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: defaults::CONCURRENCY,
            jitter_max_ms: defaults::JITTER_MAX_MS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            log_dir: PathBuf::from(defaults::LOG_DIR),
            file_name: defaults::LOG_FILE_NAME.to_string(),
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Translate the flat settings into the fetcher's retry policy.
    /// Attempt ceiling and deadline may both be set; whichever is hit first ends the item.
    pub fn retry_policy(&self) -> RetryPolicy {
        let limit = if self.retry_forever {
            RetryLimit::Forever
        } else {
            RetryLimit::Bounded {
                max_attempts: self.max_total_attempts.filter(|&n| n > 0),
                deadline: self.deadline_secs.map(Duration::from_secs),
            }
        };

        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            backoff_wait: Duration::from_secs(self.backoff_wait_secs),
            limit,
        }
    }
}

impl SchedulerConfig {
    pub fn jitter_max(&self) -> Duration {
        Duration::from_millis(self.jitter_max_ms)
    }
}

impl AppConfig {
    /// Load from an optional file plus `HARVEST_*` environment variables.
    /// A file named here must exist.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load_from(path, true)
    }

    /// Like `load`, but a missing file falls back to environment and defaults
    pub fn load_or_defaults(path: &str) -> Result<Self, ConfigError> {
        Self::load_from(Some(path), false)
    }

    fn load_from(path: Option<&str>, required: bool) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(required));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;

        info!(
            "Configuration loaded (source: {})",
            path.unwrap_or("environment and defaults")
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::Validation {
                message: message.to_string(),
            })
        };

        if self.scheduler.concurrency == 0 {
            return invalid("scheduler.concurrency must be greater than 0");
        }
        if self.output.checkpoint_every == 0 {
            return invalid("output.checkpoint_every must be greater than 0");
        }
        if self.fetch.max_retries == 0 {
            return invalid("fetch.max_retries must be greater than 0");
        }
        if self.fetch.request_timeout_secs == 0 {
            return invalid("fetch.request_timeout_secs must be greater than 0");
        }
        if !self.fetch.retry_forever
            && self.fetch.max_total_attempts.unwrap_or(0) == 0
            && self.fetch.deadline_secs.is_none()
        {
            return invalid(
                "fetch.max_total_attempts = 0 needs fetch.deadline_secs, or set fetch.retry_forever",
            );
        }
        if self.fetch.site_base_url.trim().is_empty() {
            return invalid("fetch.site_base_url must not be empty");
        }
        Ok(())
    }
}

/// Target site constants
pub mod site {
    /// Base URL the relative product paths belong to
    pub const BASE_URL: &str = "https://www.tesco.com";

    /// `type` attribute of the script block carrying the embedded data
    pub const DATA_CARRIER_TYPE: &str = "application/discover+json";

    /// Client identities rotated per attempt
    pub const CLIENT_IDENTITIES: &[&str] = &[
        // chrome119
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
        // chrome120
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        // safari
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
        // chrome
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        // safari_ios
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1",
    ];
}

/// Default configuration values
pub mod defaults {
    pub const ENV_PREFIX: &str = "HARVEST";

    pub const PRODUCT_LINKS_PATH: &str = "product_links.json";
    pub const PROXIES_PATH: &str = "proxies.txt";
    pub const CHECKPOINT_PATH: &str = "combined.json";

    /// Successful merges between checkpoint flushes
    pub const CHECKPOINT_EVERY: usize = 100;

    pub const REQUEST_TIMEOUT_SECONDS: u64 = 30;
    pub const MAX_RETRIES: u32 = 5;
    pub const RETRY_DELAY_SECONDS: u64 = 2;
    pub const BACKOFF_WAIT_SECONDS: u64 = 30;

    /// Three full backoff windows
    pub const MAX_TOTAL_ATTEMPTS: u32 = 15;

    pub const CONCURRENCY: usize = 1;
    pub const JITTER_MAX_MS: u64 = 3000;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_DIR: &str = "logs";
    pub const LOG_FILE_NAME: &str = "promo-harvester.log";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.concurrency, 1);
        assert_eq!(config.output.checkpoint_every, 100);
        assert_eq!(config.fetch.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_retry_policy_is_bounded() {
        let policy = FetchConfig::default().retry_policy();

        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.retry_delay, Duration::from_secs(2));
        assert_eq!(policy.backoff_wait, Duration::from_secs(30));
        assert_eq!(
            policy.limit,
            RetryLimit::Bounded {
                max_attempts: Some(15),
                deadline: None
            }
        );
    }

    #[test]
    fn test_retry_forever_must_be_explicit() {
        let fetch = FetchConfig {
            retry_forever: true,
            ..Default::default()
        };
        assert_eq!(fetch.retry_policy().limit, RetryLimit::Forever);
    }

    #[test]
    fn test_zero_attempt_cap_leaves_deadline_only() {
        let fetch = FetchConfig {
            max_total_attempts: Some(0),
            deadline_secs: Some(600),
            ..Default::default()
        };

        assert_eq!(
            fetch.retry_policy().limit,
            RetryLimit::Bounded {
                max_attempts: None,
                deadline: Some(Duration::from_secs(600))
            }
        );
        let mut config = AppConfig::default();
        config.fetch = fetch;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_attempt_cap_without_deadline() {
        let mut config = AppConfig::default();
        config.fetch.max_total_attempts = Some(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { .. })
        ));

        config.fetch.retry_forever = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let mut config = AppConfig::default();
        config.scheduler.concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_zero_checkpoint_interval() {
        let mut config = AppConfig::default();
        config.output.checkpoint_every = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvester.toml");
        std::fs::write(
            &path,
            "[scheduler]\nconcurrency = 4\n\n[fetch]\nmax_retries = 3\ndeadline_secs = 600\n",
        )
        .unwrap();

        let config = AppConfig::load(path.to_str()).unwrap();

        assert_eq!(config.scheduler.concurrency, 4);
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.fetch.deadline_secs, Some(600));
        // untouched sections keep their defaults
        assert_eq!(config.output.checkpoint_every, 100);
        assert_eq!(config.fetch.site_base_url, site::BASE_URL);
    }

    #[test]
    fn test_named_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvestr.toml");

        let result = AppConfig::load(path.to_str());

        assert!(matches!(result, Err(ConfigError::Load { .. })));
    }

    #[test]
    fn test_missing_default_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvester.toml");

        let config = AppConfig::load_or_defaults(path.to_str().unwrap()).unwrap();

        assert_eq!(config.scheduler.concurrency, defaults::CONCURRENCY);
    }
}
