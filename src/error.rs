//! Error types and failure classification for card-dl
//!
//! Every failure inside the pipeline is an [`Error`]. The pipeline never inspects
//! error types ad hoc; it asks [`Error::class`] which of three handling buckets the
//! failure belongs to:
//! - [`ErrorClass::Retryable`] - transient transport/IO trouble, eligible for backoff
//! - [`ErrorClass::FatalForItem`] - ends only the item that hit it
//! - [`ErrorClass::FatalForRun`] - aborts the run before any item is scheduled

use crate::types::ItemId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for card-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// How the pipeline must react to a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient failure; the item may be attempted again after a backoff delay
    Retryable,
    /// Permanent failure for this item only; sibling items keep running
    FatalForItem,
    /// The run cannot proceed at all
    FatalForRun,
}

/// Signal that a wait was abandoned because the run was cancelled
///
/// This is an outcome, not a failure: cancelled items are reported as skipped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Main error type for card-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fetch.max_concurrent_downloads")
        key: Option<String>,
    },

    /// The work list handed to the pipeline is unusable (duplicate ids or destinations)
    #[error("invalid work list: {0}")]
    InvalidWorkList(String),

    /// Another run is already using this pipeline
    #[error("a run is already in progress on this pipeline")]
    RunInProgress,

    /// An output directory could not be created
    #[error("cannot create output directory {path}: {source}")]
    OutputDirectory {
        /// Directory that could not be created
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// Ledger operation failed
    #[error("ledger error: {0}")]
    Database(#[from] DatabaseError),

    /// Transport-level HTTP failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Remote answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Locator that was requested
        url: String,
    },

    /// Remote answered, but not with anything usable
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Payload failed verification; one re-fetch is allowed
    #[error("integrity check failed for {id}: {reason}")]
    Integrity {
        /// Item whose payload was rejected
        id: ItemId,
        /// Why the payload was rejected
        reason: String,
    },

    /// Payload failed verification again after the re-fetch
    #[error("verification failed for {id} after re-fetch: {reason}")]
    VerificationFailed {
        /// Item whose payload was rejected
        id: ItemId,
        /// Why the payload was rejected
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was cancelled while this operation was waiting
    #[error("cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Ledger-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open the ledger file
    #[error("failed to connect to ledger: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

impl From<Cancelled> for Error {
    fn from(_: Cancelled) -> Self {
        Error::Cancelled
    }
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Classify this failure for retry and isolation decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config { .. }
            | Error::InvalidWorkList(_)
            | Error::RunInProgress
            | Error::OutputDirectory { .. } => ErrorClass::FatalForRun,
            // A ledger that cannot be opened makes resume impossible; a single failed
            // query only affects the item that issued it
            Error::Database(DatabaseError::ConnectionFailed(_))
            | Error::Database(DatabaseError::MigrationFailed(_)) => ErrorClass::FatalForRun,
            Error::Database(DatabaseError::QueryFailed(_)) => ErrorClass::FatalForItem,
            Error::Network(e) => classify_transport(e),
            Error::HttpStatus { status, .. } => classify_status(*status),
            Error::MalformedResponse(_) => ErrorClass::FatalForItem,
            Error::Integrity { .. } => ErrorClass::Retryable,
            Error::VerificationFailed { .. } => ErrorClass::FatalForItem,
            Error::Io(e) => {
                if is_transient_io(e) {
                    ErrorClass::Retryable
                } else {
                    ErrorClass::FatalForItem
                }
            }
            Error::Serialization(_) => ErrorClass::FatalForItem,
            Error::Cancelled => ErrorClass::FatalForItem,
            Error::Other(msg) => {
                tracing::warn!(error = %msg, "Unclassified error, treating as fatal for item");
                ErrorClass::FatalForItem
            }
        }
    }

    /// Whether this error is the cancellation outcome rather than a real failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

fn classify_transport(e: &reqwest::Error) -> ErrorClass {
    if let Some(status) = e.status() {
        return classify_status(status.as_u16());
    }
    if e.is_timeout() || e.is_connect() || e.is_body() || e.is_request() {
        ErrorClass::Retryable
    } else {
        ErrorClass::FatalForItem
    }
}

fn classify_status(status: u16) -> ErrorClass {
    match status {
        408 | 425 | 429 => ErrorClass::Retryable,
        500..=599 => ErrorClass::Retryable,
        _ => ErrorClass::FatalForItem,
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::UnexpectedEof
    )
}
