//! Fetch orchestration
//!
//! [`FetchPipeline::run`] turns a work list into a [`Summary`]. Every item runs in its
//! own task: skip check against the ledger, a gate slot, then fetch, stage, verify and
//! promote under the retry policy. Item failures end up in the summary and the ledger;
//! only conditions that make the whole run meaningless come back as `Err`.

use crate::config::Config;
use crate::db::Ledger;
use crate::error::{Error, Result};
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::gate::ConcurrencyGate;
use crate::progress::ProgressReporter;
use crate::rate_limiter::RateLimiter;
use crate::storage;
use crate::types::{ItemId, ItemOutcome, ItemStatus, Summary, WorkItem};
use crate::verify::PayloadVerifier;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

mod task;

/// State shared by every item task of a pipeline
struct Shared {
    config: Config,
    fetcher: Arc<dyn Fetcher>,
    ledger: Arc<Ledger>,
    gate: ConcurrencyGate,
    limiter: RateLimiter,
    verifier: PayloadVerifier,
    progress: ProgressReporter,
    /// Held for the duration of a run; the reporter tracks one run at a time
    run_lock: tokio::sync::Mutex<()>,
}

/// Concurrent, resumable fetch pipeline (cloneable - all state is Arc-wrapped)
#[derive(Clone)]
pub struct FetchPipeline {
    shared: Arc<Shared>,
}

impl FetchPipeline {
    /// Create a pipeline around an injected fetcher and an open ledger
    ///
    /// Must be called from within a tokio runtime (the progress aggregator is spawned here).
    pub fn new(config: Config, fetcher: Arc<dyn Fetcher>, ledger: Arc<Ledger>) -> Result<Self> {
        config.validate()?;

        let gate = ConcurrencyGate::new(config.fetch.max_concurrent_downloads);
        let limiter = RateLimiter::new(&config.rate_limit);
        let verifier = PayloadVerifier::new(config.verify.clone());

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                fetcher,
                ledger,
                gate,
                limiter,
                verifier,
                progress: ProgressReporter::new(),
                run_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Create a pipeline with the HTTP fetcher and the configured ledger file
    pub async fn with_http(config: Config) -> Result<Self> {
        config.validate()?;
        let fetcher = HttpFetcher::new(&config.http)?;
        let ledger = Ledger::open(&config.persistence.ledger_path).await?;
        Self::new(config, Arc::new(fetcher), Arc::new(ledger))
    }

    /// Progress aggregator for this pipeline
    pub fn progress(&self) -> &ProgressReporter {
        &self.shared.progress
    }

    /// Concurrency gate shared by all items
    pub fn gate(&self) -> &ConcurrencyGate {
        &self.shared.gate
    }

    /// Resume ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.shared.ledger
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Fetch every item in `items`
    ///
    /// Returns `Err` only when the run cannot start: another run is still active on
    /// this pipeline (or a clone of it), duplicate ids or destinations, an output
    /// directory that cannot be created, or an unreadable ledger. Nothing is fetched in
    /// that case. Otherwise every item ends Succeeded, Failed or Skipped and
    /// the summary accounts for each exactly once.
    ///
    /// Cancelling `cancel` stops new fetches from starting and aborts in-flight ones;
    /// unfinished items are reported Skipped and `Summary::cancelled` is set.
    pub async fn run(&self, items: Vec<WorkItem>, cancel: CancellationToken) -> Result<Summary> {
        let shared = &self.shared;

        let _running = shared
            .run_lock
            .try_lock()
            .map_err(|_| Error::RunInProgress)?;

        storage::check_unique(&items)?;
        storage::prepare_output_dirs(&items).await?;
        shared.ledger.load().await?;

        let total = items.len();
        tracing::info!(
            total,
            max_concurrent = shared.gate.capacity(),
            skip_existing = shared.config.fetch.skip_existing,
            "Starting fetch run"
        );

        shared.progress.begin(total);
        let progress = shared.progress.sender();
        for item in &items {
            progress.update(&item.id, ItemStatus::Pending, 0);
        }

        let mut tasks = JoinSet::new();
        let mut task_items: HashMap<tokio::task::Id, ItemId> = HashMap::with_capacity(total);
        for item in items {
            let id = item.id.clone();
            let shared = Arc::clone(shared);
            let cancel = cancel.clone();
            let handle =
                tasks.spawn(async move { task::process_item(&shared, item, &cancel).await });
            task_items.insert(handle.id(), id);
        }

        let mut summary = Summary::default();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, finished)) => {
                    summary.cancelled |= finished.cancelled;
                    summary.push(finished.outcome);
                }
                Err(e) => {
                    let id = task_items
                        .remove(&e.id())
                        .unwrap_or_else(|| ItemId::from("<unknown>"));
                    tracing::error!(item = %id, error = %e, "Item task panicked");
                    progress.update(&id, ItemStatus::Failed, 100);
                    summary.push(ItemOutcome {
                        id,
                        status: ItemStatus::Failed,
                        attempts: 0,
                        error: Some(format!("item task panicked: {}", e)),
                    });
                }
            }
        }

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "Fetch run finished"
        );

        shared.progress.finish(&summary);
        shared.progress.flush().await;

        Ok(summary)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
