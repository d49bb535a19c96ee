//! Resume ledger for card-dl
//!
//! Durable SQLite record of which items completed, so an interrupted run can resume
//! without re-fetching them.
//!
//! ## Submodules
//!
//! Methods on [`Ledger`] are organized by concern:
//! - [`migrations`]: ledger lifecycle and schema migrations
//! - [`entries`]: completion lookups, recording and JSON export

use crate::types::ItemId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, sqlite::SqlitePool};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

mod entries;
mod migrations;

/// State of one item as recorded in the ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Whether a verified payload was put in place
    pub downloaded: bool,
    /// Retries used by the most recent run that processed the item
    pub retry_count: u32,
    /// When the entry was last written
    pub updated_at: DateTime<Utc>,
}

/// Ledger row as stored in SQLite
#[derive(Debug, Clone, FromRow)]
struct LedgerRow {
    item_id: ItemId,
    downloaded: i64,
    retry_count: i64,
    updated_at: i64,
}

impl From<LedgerRow> for (ItemId, LedgerEntry) {
    fn from(row: LedgerRow) -> Self {
        let entry = LedgerEntry {
            downloaded: row.downloaded != 0,
            retry_count: u32::try_from(row.retry_count).unwrap_or(u32::MAX),
            updated_at: DateTime::from_timestamp(row.updated_at, 0).unwrap_or_default(),
        };
        (row.item_id, entry)
    }
}

/// Resume ledger handle
///
/// Reads are answered from an in-memory cache primed by [`Ledger::load`] and kept in
/// step by every [`Ledger::record`]. Writes go through to SQLite one at a time.
pub struct Ledger {
    pool: SqlitePool,
    cache: RwLock<HashMap<ItemId, LedgerEntry>>,
    writer: Mutex<()>,
}
