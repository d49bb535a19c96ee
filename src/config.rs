//! Configuration types for card-dl
//!
//! The crate does not read configuration files. Every struct derives serde so a host
//! application can load it from whatever format it likes; missing fields fall back to
//! the defaults below.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// Scheduling behavior (concurrency, skipping, politeness)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Maximum simultaneous in-flight fetches (default: 5)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Skip items the ledger (or an existing destination file) shows as complete (default: true)
    #[serde(default = "default_true")]
    pub skip_existing: bool,

    /// Pause after each successful fetch before the gate slot is released (default: 100ms)
    #[serde(default = "default_politeness_delay", with = "millis_serde")]
    pub politeness_delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            skip_existing: true,
            politeness_delay: default_politeness_delay(),
        }
    }
}

/// Retry behavior for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3, so at most 4 attempts)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubled for every retry after it (default: 2 seconds)
    #[serde(default = "default_base_delay", with = "millis_serde")]
    pub base_delay: Duration,

    /// Upper bound on a single backoff delay (default: 5 minutes)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

/// HTTP client settings for the default fetcher
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_timeout", with = "millis_serde")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            headers: HashMap::new(),
            timeout: default_timeout(),
        }
    }
}

/// Request rate limiting (token bucket)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained request rate; 0 disables rate limiting (default: 60)
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Requests that may be issued back to back before the rate applies (default: 10)
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst_size: default_burst_size(),
        }
    }
}

/// Payload verification settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Require the payload to be a structurally complete image (default: true)
    #[serde(default = "default_true")]
    pub require_image: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            require_image: true,
        }
    }
}

/// Resume ledger location
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Ledger database path (default: "card-dl.db")
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            ledger_path: default_ledger_path(),
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scheduling behavior
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Retry behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Request rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Payload verification
    #[serde(default)]
    pub verify: VerifyConfig,

    /// Resume ledger
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Check the configuration before a run
    ///
    /// Every error returned here is fatal for the run.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.max_concurrent_downloads == 0 {
            return Err(Error::config(
                "fetch.max_concurrent_downloads",
                "max_concurrent_downloads must be greater than 0",
            ));
        }
        if self.rate_limit.requests_per_minute > 0 && self.rate_limit.burst_size == 0 {
            return Err(Error::config(
                "rate_limit.burst_size",
                "burst_size must be greater than 0 when rate limiting is enabled",
            ));
        }
        if self.http.user_agent.trim().is_empty() {
            return Err(Error::config("http.user_agent", "user_agent must not be empty"));
        }
        for (name, value) in &self.http.headers {
            if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(Error::config(
                    "http.headers",
                    format!("invalid header name '{}'", name),
                ));
            }
            if reqwest::header::HeaderValue::from_str(value).is_err() {
                return Err(Error::config(
                    "http.headers",
                    format!("invalid value for header '{}'", name),
                ));
            }
        }
        Ok(())
    }
}

fn default_max_concurrent() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_politeness_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_user_agent() -> String {
    "GwentCardDownloader/1.0".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_burst_size() -> u32 {
    10
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("card-dl.db")
}

// Durations are configured in milliseconds; backoff and politeness delays are sub-second
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn test_defaults_match_reference_downloader() {
        let config = Config::default();
        assert_eq!(config.fetch.max_concurrent_downloads, 5);
        assert!(config.fetch.skip_existing);
        assert_eq!(config.fetch.politeness_delay, Duration::from_millis(100));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.http.user_agent, "GwentCardDownloader/1.0");
        assert_eq!(config.rate_limit.requests_per_minute, 60);
        assert_eq!(config.rate_limit.burst_size, 10);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").expect("deserialize failed");
        assert_eq!(config.fetch.max_concurrent_downloads, 5);
        assert_eq!(config.retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.persistence.ledger_path, PathBuf::from("card-dl.db"));
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(250),
            ..RetryConfig::default()
        };

        let json = serde_json::to_value(&config).expect("serialize failed");
        assert_eq!(json["base_delay"], 250);
        assert_eq!(json["max_delay"], 300_000);
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let mut config = Config::default();
        config.fetch.max_concurrent_downloads = 0;

        let err = config.validate().unwrap_err();
        assert_eq!(err.class(), ErrorClass::FatalForRun);
        match err {
            Error::Config { key, .. } => {
                assert_eq!(key.as_deref(), Some("fetch.max_concurrent_downloads"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_retries_is_valid() {
        let mut config = Config::default();
        config.retry.max_retries = 0;
        config.retry.base_delay = Duration::ZERO;
        config.validate().unwrap();
    }

    #[test]
    fn test_base_delay_above_cap_is_clamped() {
        let mut config = Config::default();
        config.retry.base_delay = Duration::from_secs(600);
        config.validate().unwrap();

        // Every wait is held to the cap, starting with the first
        assert_eq!(
            crate::retry::backoff_delay(&config.retry, 1),
            config.retry.max_delay
        );
        assert_eq!(
            crate::retry::backoff_delay(&config.retry, 3),
            config.retry.max_delay
        );
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let mut config = Config::default();
        config
            .http
            .headers
            .insert("bad header".to_string(), "x".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unlimited_rate_allows_zero_burst() {
        let mut config = Config::default();
        config.rate_limit.requests_per_minute = 0;
        config.rate_limit.burst_size = 0;
        config.validate().unwrap();
    }
}
