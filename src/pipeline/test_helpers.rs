//! Shared test helpers for driving FetchPipeline without a network.

use crate::config::Config;
use crate::db::Ledger;
use crate::error::{Error, Result};
use crate::fetcher::{Fetcher, OnProgress};
use crate::pipeline::FetchPipeline;
use crate::types::WorkItem;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Smallest well-framed PNG the verifier accepts
pub(crate) fn png() -> Vec<u8> {
    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
    png.extend_from_slice(&[0, 0, 0, 13]);
    png.extend_from_slice(b"IHDR");
    png.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0]);
    png.extend_from_slice(&[0x1f, 0x15, 0xc4, 0x89]);
    png.extend_from_slice(b"\x00\x00\x00\x00IEND\xae\x42\x60\x82");
    png
}

/// PNG cut off before its IEND chunk
pub(crate) fn truncated_png() -> Vec<u8> {
    let png = png();
    png[..png.len() - 8].to_vec()
}

/// What the scripted fetcher does for one call
#[derive(Clone, Debug)]
pub(crate) enum Reply {
    /// Return these bytes
    Payload(Vec<u8>),
    /// Fail with this HTTP status
    Status(u16),
    /// Never complete
    Hang,
    /// Panic inside the fetch
    Panic,
}

/// Fetcher that replays a per-locator script and records every call
///
/// Each locator pops replies from its script in order; the last reply repeats once the
/// script runs out. Locators without a script get a valid PNG.
pub(crate) struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, Instant)>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Every call sleeps for `latency` before replying
    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub(crate) fn script(&self, item: &WorkItem, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(item.locator.to_string(), replies.into());
    }

    /// Number of fetches issued for an item
    pub(crate) fn calls_for(&self, item: &WorkItem) -> usize {
        let locator = item.locator.to_string();
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == locator)
            .count()
    }

    /// Start times of every fetch issued for an item
    pub(crate) fn call_times(&self, item: &WorkItem) -> Vec<Instant> {
        let locator = item.locator.to_string();
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == locator)
            .map(|(_, t)| *t)
            .collect()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of fetches observed running at once
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_reply(&self, locator: &str) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(locator) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script.front().cloned().unwrap_or(Reply::Payload(png())),
            None => Reply::Payload(png()),
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, locator: &Url, on_progress: OnProgress<'_>) -> Result<Vec<u8>> {
        self.calls
            .lock()
            .unwrap()
            .push((locator.to_string(), Instant::now()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.next_reply(locator.as_str()) {
            Reply::Payload(bytes) => {
                let len = bytes.len() as u64;
                on_progress(len / 2, Some(len));
                on_progress(len, Some(len));
                Ok(bytes)
            }
            Reply::Status(status) => Err(Error::HttpStatus {
                status,
                url: locator.to_string(),
            }),
            Reply::Hang => std::future::pending().await,
            Reply::Panic => panic!("scripted fetcher panic for {}", locator),
        }
    }
}

/// Config tuned for fast, deterministic tests
///
/// 100ms base backoff, no politeness pause, no rate limit.
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.fetch.max_concurrent_downloads = 2;
    config.fetch.politeness_delay = Duration::ZERO;
    config.retry.max_retries = 2;
    config.retry.base_delay = Duration::from_millis(100);
    config.retry.max_delay = Duration::from_secs(10);
    config.rate_limit.requests_per_minute = 0;
    config.persistence.ledger_path = dir.join("ledger.db");
    config
}

/// Work item fetched from `http://cards.test/<id>.png` into `<dir>/cards/<id>.png`
pub(crate) fn item(dir: &Path, id: &str) -> WorkItem {
    WorkItem::new(
        id,
        Url::parse(&format!("http://cards.test/{id}.png")).unwrap(),
        dir.join("cards").join(format!("{id}.png")),
    )
}

/// Pipeline over a scripted fetcher and a ledger inside `dir`
pub(crate) async fn create_test_pipeline(
    config: Config,
    fetcher: Arc<ScriptedFetcher>,
) -> FetchPipeline {
    let ledger = Ledger::open(&config.persistence.ledger_path).await.unwrap();
    FetchPipeline::new(config, fetcher, Arc::new(ledger)).unwrap()
}
