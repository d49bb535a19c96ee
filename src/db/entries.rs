//! Completion lookups, outcome recording and export.

use crate::error::DatabaseError;
use crate::types::ItemId;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::{Ledger, LedgerEntry, LedgerRow};

impl Ledger {
    /// Read every entry from disk and prime the cache with them
    pub async fn load(&self) -> Result<HashMap<ItemId, LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            r#"
            SELECT item_id, downloaded, retry_count, updated_at
            FROM ledger
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to load ledger: {}",
                e
            )))
        })?;

        let entries: HashMap<ItemId, LedgerEntry> = rows.into_iter().map(Into::into).collect();

        let completed = entries.values().filter(|e| e.downloaded).count();
        tracing::debug!(
            entries = entries.len(),
            completed,
            "Loaded resume ledger"
        );

        *self.cache.write().await = entries.clone();
        Ok(entries)
    }

    /// Whether the item is recorded as downloaded
    pub async fn is_complete(&self, id: &ItemId) -> bool {
        self.cache
            .read()
            .await
            .get(id)
            .is_some_and(|entry| entry.downloaded)
    }

    /// Cached entry for an item
    pub async fn entry(&self, id: &ItemId) -> Option<LedgerEntry> {
        self.cache.read().await.get(id).cloned()
    }

    /// Snapshot of all cached entries
    pub async fn entries(&self) -> HashMap<ItemId, LedgerEntry> {
        self.cache.read().await.clone()
    }

    /// Record an item's outcome
    ///
    /// The write is committed before this returns. Completion never regresses:
    /// recording a failure for an item already marked downloaded keeps it downloaded.
    pub async fn record(&self, id: &ItemId, success: bool, retry_count: u32) -> Result<LedgerEntry> {
        let _writer = self.writer.lock().await;
        let now = chrono::Utc::now().timestamp();

        let row: LedgerRow = sqlx::query_as(
            r#"
            INSERT INTO ledger (item_id, downloaded, retry_count, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                downloaded = MAX(ledger.downloaded, excluded.downloaded),
                retry_count = excluded.retry_count,
                updated_at = excluded.updated_at
            RETURNING item_id, downloaded, retry_count, updated_at
            "#,
        )
        .bind(id)
        .bind(i64::from(success))
        .bind(i64::from(retry_count))
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record ledger entry for {}: {}",
                id, e
            )))
        })?;

        let (id, entry) = row.into();
        self.cache.write().await.insert(id, entry.clone());

        Ok(entry)
    }

    /// Write every entry to `path` as a pretty-printed JSON object keyed by item id
    pub async fn export_json(&self, path: &Path) -> Result<()> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            r#"
            SELECT item_id, downloaded, retry_count, updated_at
            FROM ledger
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to read ledger for export: {}",
                e
            )))
        })?;

        let entries: BTreeMap<ItemId, LedgerEntry> = rows.into_iter().map(Into::into).collect();
        let json = serde_json::to_string_pretty(&entries)?;
        tokio::fs::write(path, json).await?;

        tracing::info!(
            path = %path.display(),
            entries = entries.len(),
            "Exported ledger"
        );
        Ok(())
    }
}
