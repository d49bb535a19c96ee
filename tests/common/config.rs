//! Test configuration helpers

use card_dl::Config;
use std::path::Path;
use std::time::Duration;

/// Configuration for fast HTTP tests: short backoff, no politeness pause, no rate limit
pub fn fast_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.fetch.max_concurrent_downloads = 2;
    config.fetch.politeness_delay = Duration::ZERO;
    config.retry.max_retries = 2;
    config.retry.base_delay = Duration::from_millis(50);
    config.retry.max_delay = Duration::from_secs(1);
    config.rate_limit.requests_per_minute = 0;
    config.http.timeout = Duration::from_secs(5);
    config.persistence.ledger_path = dir.join("state").join("card-dl.db");
    config
}
