//! Staged output files
//!
//! Payloads are never written under their final name. A [`StagedFile`] writes to
//! `<destination>.part`, the caller verifies what actually landed on disk, and
//! [`StagedFile::promote`] renames it into place. Dropping an unpromoted stage removes
//! the partial file, so no error path leaves one behind.

use crate::error::{Error, Result};
use crate::types::WorkItem;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Suffix appended to a destination while its payload is staged
pub const STAGING_SUFFIX: &str = ".part";

/// Staging path for a destination (`cards/geralt.png` -> `cards/geralt.png.part`)
pub fn staging_path(destination: &Path) -> PathBuf {
    let mut name: OsString = destination.as_os_str().to_owned();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// A payload written next to its destination, not yet visible under the final name
#[derive(Debug)]
pub struct StagedFile {
    staging: PathBuf,
    destination: PathBuf,
    promoted: bool,
}

impl StagedFile {
    /// Write `payload` to the staging path and flush it to disk
    pub async fn write(destination: &Path, payload: &[u8]) -> Result<Self> {
        let staged = Self {
            staging: staging_path(destination),
            destination: destination.to_path_buf(),
            promoted: false,
        };

        let mut file = tokio::fs::File::create(&staged.staging).await?;
        file.write_all(payload).await?;
        file.sync_all().await?;

        Ok(staged)
    }

    /// Read the staged bytes back from disk
    pub async fn read_back(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.staging).await?)
    }

    /// Staging path of this file
    pub fn path(&self) -> &Path {
        &self.staging
    }

    /// Atomically move the staged file to its destination
    pub async fn promote(mut self) -> Result<PathBuf> {
        tokio::fs::rename(&self.staging, &self.destination).await?;
        self.promoted = true;
        Ok(self.destination.clone())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.promoted {
            return;
        }
        match std::fs::remove_file(&self.staging) {
            Ok(()) => {
                tracing::debug!(path = %self.staging.display(), "Removed staged partial file");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.staging.display(),
                    error = %e,
                    "Failed to remove staged partial file"
                );
            }
        }
    }
}

/// Whether a non-empty file already sits at `destination`
pub async fn has_existing_payload(destination: &Path) -> bool {
    match tokio::fs::metadata(destination).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// Reject work lists where two items share an id or a destination
pub fn check_unique(items: &[WorkItem]) -> Result<()> {
    let mut ids = HashSet::with_capacity(items.len());
    let mut destinations = HashSet::with_capacity(items.len());

    for item in items {
        if !ids.insert(&item.id) {
            return Err(Error::InvalidWorkList(format!("duplicate item id '{}'", item.id)));
        }
        if !destinations.insert(&item.destination) {
            return Err(Error::InvalidWorkList(format!(
                "destination {} is used by more than one item",
                item.destination.display()
            )));
        }
    }
    Ok(())
}

/// Create every destination's parent directory and clear stale staged files
///
/// A `.part` file can outlive its run if the process died mid-write, or if a write
/// was abandoned while the file was still being created.
pub async fn prepare_output_dirs(items: &[WorkItem]) -> Result<()> {
    let parents: HashSet<&Path> = items
        .iter()
        .filter_map(|item| item.destination.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .collect();

    futures::future::try_join_all(parents.into_iter().map(|dir| async move {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| Error::OutputDirectory {
                path: dir.to_path_buf(),
                source,
            })
    }))
    .await?;

    futures::future::join_all(
        items
            .iter()
            .map(|item| remove_stale_stage(staging_path(&item.destination))),
    )
    .await;
    Ok(())
}

async fn remove_stale_stage(staging: PathBuf) {
    match tokio::fs::remove_file(&staging).await {
        Ok(()) => {
            tracing::info!(path = %staging.display(), "Removed stale staged file");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(
                path = %staging.display(),
                error = %e,
                "Failed to remove stale staged file"
            );
        }
    }
}
