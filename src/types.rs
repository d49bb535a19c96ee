//! Core types for card-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Identifier of a work item, unique within a run
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Create a new ItemId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for ledger operations
impl sqlx::Type<sqlx::Sqlite> for ItemId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ItemId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ItemId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// One resource to fetch
///
/// Produced by the discovery layer, fully resolved: the pipeline never builds
/// URLs or paths itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Identity of the item, unique within a run
    pub id: ItemId,
    /// Where the payload is fetched from
    pub locator: Url,
    /// Final local path of the verified payload, unique per item
    pub destination: PathBuf,
    /// Expected SHA-256 of the payload (lowercase hex), when the catalog provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl WorkItem {
    /// Create a work item without a checksum
    pub fn new(id: impl Into<ItemId>, locator: Url, destination: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            locator,
            destination: destination.into(),
            checksum: None,
        }
    }

    /// Attach an expected SHA-256 checksum
    #[must_use]
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into().to_ascii_lowercase());
        self
    }
}

/// Per-item processing status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Waiting for a gate slot
    Pending,
    /// Payload is being fetched
    InFlight,
    /// Payload is fetched and being verified
    Verifying,
    /// Payload verified and in place at its destination
    Succeeded,
    /// Item gave up permanently
    Failed,
    /// Item was already complete, or the run was cancelled before it finished
    Skipped,
}

impl ItemStatus {
    /// Whether no further transitions can follow this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Succeeded | ItemStatus::Failed | ItemStatus::Skipped
        )
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InFlight => "in_flight",
            ItemStatus::Verifying => "verifying",
            ItemStatus::Succeeded => "succeeded",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Mutable run-time state of one item, owned by the task processing it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttemptState {
    /// Number of fetch attempts started so far
    pub attempt_count: u32,
    /// Current status
    pub status: ItemStatus,
}

impl Default for AttemptState {
    fn default() -> Self {
        Self {
            attempt_count: 0,
            status: ItemStatus::Pending,
        }
    }
}

/// Terminal result for one item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    /// Item identity
    pub id: ItemId,
    /// Terminal status (Succeeded, Failed or Skipped)
    pub status: ItemStatus,
    /// Fetch attempts made during this run
    pub attempts: u32,
    /// Final error message for failed items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of a pipeline run
///
/// A run that returns `Ok(summary)` may still contain failed items; check
/// [`Summary::is_success`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Items whose payload is verified and in place
    pub succeeded: usize,
    /// Items that failed permanently
    pub failed: usize,
    /// Items skipped as already complete or left unfinished by cancellation
    pub skipped: usize,
    /// Whether the run was cancelled before every item finished
    pub cancelled: bool,
    /// Per-item outcomes, in completion order
    pub outcomes: Vec<ItemOutcome>,
}

impl Summary {
    /// True when every item either succeeded or was legitimately skipped
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }

    /// Outcome for a specific item
    pub fn outcome(&self, id: &ItemId) -> Option<&ItemOutcome> {
        self.outcomes.iter().find(|o| &o.id == id)
    }

    pub(crate) fn push(&mut self, outcome: ItemOutcome) {
        match outcome.status {
            ItemStatus::Succeeded => self.succeeded += 1,
            ItemStatus::Failed => self.failed += 1,
            _ => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Event emitted during a run, for rendering layers and other observers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run started with this many items
    RunStarted {
        /// Number of items in the work list
        total: usize,
    },

    /// An item changed status or made progress
    Progress {
        /// Item identity
        id: ItemId,
        /// Current status
        status: ItemStatus,
        /// Progress percentage (0 to 100)
        percent: u8,
        /// Attempt number this update belongs to
        #[serde(skip_serializing_if = "Option::is_none")]
        attempt: Option<u32>,
        /// Short human-readable detail ("retry 2", error text, ...)
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A run finished
    RunFinished {
        /// Items that succeeded
        succeeded: usize,
        /// Items that failed
        failed: usize,
        /// Items that were skipped
        skipped: usize,
        /// Whether the run was cancelled
        cancelled: bool,
    },
}
