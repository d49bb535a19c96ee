//! # card-dl
//!
//! Concurrent, resumable bulk downloader for card image collections.
//!
//! ## Design Philosophy
//!
//! card-dl is designed to be:
//! - **Resumable** - A durable ledger records completed items; re-runs skip them
//! - **Polite** - Bounded concurrency, a request rate limit and exponential backoff
//! - **Safe on disk** - A destination file is either absent or a verified payload
//! - **Library-first** - No CLI or UI; discovery and rendering live in the host
//!
//! ## Quick Start
//!
//! ```no_run
//! use card_dl::{Config, FetchPipeline, WorkItem};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = FetchPipeline::with_http(Config::default()).await?;
//!
//!     // Render progress however the host likes
//!     let mut events = pipeline.progress().subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let items = vec![WorkItem::new(
//!         "geralt",
//!         "https://cards.example.com/geralt.png".parse()?,
//!         "cards/geralt.png",
//!     )];
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(card_dl::cancel_on_shutdown_signal(cancel.clone()));
//!
//!     let summary = pipeline.run(items, cancel).await?;
//!     println!(
//!         "{} downloaded, {} failed, {} skipped",
//!         summary.succeeded, summary.failed, summary.skipped
//!     );
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Resume ledger
pub mod db;
/// Error types and failure classification
pub mod error;
/// Transport seam and HTTP fetcher
pub mod fetcher;
/// Concurrency gate
pub mod gate;
/// Fetch orchestration
pub mod pipeline;
/// Progress aggregation and events
pub mod progress;
/// Request rate limiting with token bucket
pub mod rate_limiter;
/// Retry logic with exponential backoff
pub mod retry;
/// Staged output files
pub mod storage;
/// Core types and events
pub mod types;
/// Payload verification
pub mod verify;

// Re-export commonly used types
pub use config::Config;
pub use db::{Ledger, LedgerEntry};
pub use error::{Cancelled, DatabaseError, Error, ErrorClass, Result};
pub use fetcher::{Fetcher, HttpFetcher};
pub use gate::{ConcurrencyGate, GatePermit};
pub use pipeline::FetchPipeline;
pub use progress::{ProgressReporter, ProgressSnapshot};
pub use types::{Event, ItemId, ItemOutcome, ItemStatus, Summary, WorkItem};

/// Cancel `token` when the process receives a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Returns early, without waiting for a signal, if the token is cancelled elsewhere.
///
/// # Example
///
/// ```no_run
/// use card_dl::{Config, FetchPipeline, cancel_on_shutdown_signal};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = FetchPipeline::with_http(Config::default()).await?;
///
///     let cancel = CancellationToken::new();
///     tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));
///
///     let summary = pipeline.run(Vec::new(), cancel).await?;
///     assert!(summary.is_success());
///     Ok(())
/// }
/// ```
pub async fn cancel_on_shutdown_signal(token: tokio_util::sync::CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        _ = wait_for_signal() => {
            tracing::info!("Shutdown signal received, cancelling run");
            token.cancel();
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
