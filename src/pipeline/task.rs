//! Processing of a single work item

use super::Shared;
use crate::error::{Error, Result};
use crate::progress::{ProgressSender, ProgressUpdate};
use crate::retry;
use crate::storage::{self, StagedFile};
use crate::types::{AttemptState, ItemOutcome, ItemStatus, WorkItem};
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;

/// What an item task hands back to the run loop
pub(super) struct Finished {
    pub(super) outcome: ItemOutcome,
    /// The item stopped because the run was cancelled
    pub(super) cancelled: bool,
}

/// Drive one item from Pending to a terminal status
pub(super) async fn process_item(
    shared: &Shared,
    item: WorkItem,
    cancel: &CancellationToken,
) -> Finished {
    let progress = shared.progress.sender();
    let mut state = AttemptState::default();

    if shared.config.fetch.skip_existing {
        match shared.ledger.entry(&item.id).await {
            Some(entry) if entry.downloaded => {
                tracing::debug!(item = %item.id, "Already complete in ledger, skipping");
                return skipped(&progress, &item, &mut state, "already downloaded");
            }
            // A ledger entry, even a failed one, outranks whatever is on disk
            Some(_) => {}
            None => {
                if existing_payload_verifies(shared, &item).await {
                    tracing::debug!(
                        item = %item.id,
                        path = %item.destination.display(),
                        "Destination already present, skipping"
                    );
                    // Bring the ledger in line with what is on disk
                    if let Err(e) = shared.ledger.record(&item.id, true, 0).await {
                        tracing::warn!(
                            item = %item.id,
                            error = %e,
                            "Failed to record existing file in ledger"
                        );
                    }
                    return skipped(&progress, &item, &mut state, "file already exists");
                }
            }
        }
    }

    let permit = match shared.gate.acquire(cancel).await {
        Ok(permit) => permit,
        Err(_) => return cancelled(&progress, &item, &mut state),
    };

    let verification_failures = AtomicU32::new(0);
    let report = {
        let item = &item;
        let progress = &progress;
        let verification_failures = &verification_failures;

        retry::fetch_with_retry(
            &shared.config.retry,
            cancel,
            |next_attempt, delay| {
                progress.send(
                    ProgressUpdate::new(item.id.clone(), ItemStatus::InFlight, 0)
                        .with_attempt(next_attempt)
                        .with_message(format!(
                            "retry {} in {}ms",
                            next_attempt - 1,
                            delay.as_millis()
                        )),
                );
            },
            move |attempt| async move {
                let stage =
                    fetch_and_stage(shared, item, attempt, progress, verification_failures);
                let staged = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    staged = stage => staged?,
                };
                // Promotion is not raced: once verified, the payload lands
                staged.promote().await?;
                Ok::<(), Error>(())
            },
        )
        .await
    };
    state.attempt_count = report.attempts;
    let retry_count = report.attempts.saturating_sub(1);

    let finished = match report.result {
        Ok(()) => {
            state.status = ItemStatus::Succeeded;
            // The file is in place; a ledger hiccup only costs a re-check next run
            if let Err(e) = shared.ledger.record(&item.id, true, retry_count).await {
                tracing::error!(
                    item = %item.id,
                    error = %e,
                    "Failed to record success in ledger"
                );
            }
            progress.send(
                ProgressUpdate::new(item.id.clone(), ItemStatus::Succeeded, 100)
                    .with_attempt(state.attempt_count),
            );
            tracing::info!(item = %item.id, attempts = state.attempt_count, "Item downloaded");

            let delay = shared.config.fetch.politeness_delay;
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }

            Finished {
                outcome: outcome(&item, &state, None),
                cancelled: false,
            }
        }
        Err(e) if e.is_cancelled() => {
            tracing::debug!(item = %item.id, attempts = state.attempt_count, "Item cancelled");
            cancelled(&progress, &item, &mut state)
        }
        Err(e) => {
            state.status = ItemStatus::Failed;
            tracing::warn!(
                item = %item.id,
                attempts = state.attempt_count,
                error = %e,
                "Item failed"
            );
            if let Err(db_err) = shared.ledger.record(&item.id, false, retry_count).await {
                tracing::error!(
                    item = %item.id,
                    error = %db_err,
                    "Failed to record failure in ledger"
                );
            }
            progress.send(
                ProgressUpdate::new(item.id.clone(), ItemStatus::Failed, 100)
                    .with_attempt(state.attempt_count)
                    .with_message(e.to_string()),
            );

            Finished {
                outcome: outcome(&item, &state, Some(e.to_string())),
                cancelled: false,
            }
        }
    };

    drop(permit);
    finished
}

/// Whether the destination already holds a payload that passes verification
async fn existing_payload_verifies(shared: &Shared, item: &WorkItem) -> bool {
    if !storage::has_existing_payload(&item.destination).await {
        return false;
    }
    let on_disk = match tokio::fs::read(&item.destination).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(
                item = %item.id,
                path = %item.destination.display(),
                error = %e,
                "Failed to read existing destination, fetching again"
            );
            return false;
        }
    };
    match shared.verifier.verify(&on_disk, item.checksum.as_deref()) {
        Ok(()) => true,
        Err(rejection) => {
            tracing::info!(
                item = %item.id,
                path = %item.destination.display(),
                reason = %rejection,
                "Existing destination failed verification, fetching again"
            );
            false
        }
    }
}

/// One attempt: rate-limit, fetch, stage to disk and verify what landed there
///
/// Returns the verified staged file. Dropping the future at any await point removes
/// whatever was staged.
async fn fetch_and_stage(
    shared: &Shared,
    item: &WorkItem,
    attempt: u32,
    progress: &ProgressSender,
    verification_failures: &AtomicU32,
) -> Result<StagedFile> {
    shared.limiter.acquire().await;

    progress.send(
        ProgressUpdate::new(item.id.clone(), ItemStatus::InFlight, 0).with_attempt(attempt),
    );

    let last_percent = AtomicU8::new(0);
    let on_progress = |received: u64, total: Option<u64>| {
        let Some(total) = total.filter(|t| *t > 0) else {
            return;
        };
        // 100 is reserved for a verified payload
        let percent = (received.min(total) * 99 / total) as u8;
        if percent > last_percent.fetch_max(percent, Ordering::Relaxed) {
            progress.send(
                ProgressUpdate::new(item.id.clone(), ItemStatus::InFlight, percent)
                    .with_attempt(attempt),
            );
        }
    };

    let payload = shared.fetcher.fetch(&item.locator, &on_progress).await?;

    progress.send(
        ProgressUpdate::new(item.id.clone(), ItemStatus::Verifying, 100).with_attempt(attempt),
    );

    let staged = StagedFile::write(&item.destination, &payload).await?;
    let on_disk = staged.read_back().await?;

    if let Err(rejection) = shared.verifier.verify(&on_disk, item.checksum.as_deref()) {
        let failures = verification_failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::warn!(
            item = %item.id,
            attempt,
            reason = %rejection,
            "Payload failed verification"
        );
        // `staged` drops here and takes the partial file with it
        return Err(if failures == 1 {
            Error::Integrity {
                id: item.id.clone(),
                reason: rejection.to_string(),
            }
        } else {
            Error::VerificationFailed {
                id: item.id.clone(),
                reason: rejection.to_string(),
            }
        });
    }

    Ok(staged)
}

fn outcome(item: &WorkItem, state: &AttemptState, error: Option<String>) -> ItemOutcome {
    ItemOutcome {
        id: item.id.clone(),
        status: state.status,
        attempts: state.attempt_count,
        error,
    }
}

fn skipped(
    progress: &ProgressSender,
    item: &WorkItem,
    state: &mut AttemptState,
    reason: &str,
) -> Finished {
    state.status = ItemStatus::Skipped;
    progress.send(
        ProgressUpdate::new(item.id.clone(), ItemStatus::Skipped, 100).with_message(reason),
    );
    Finished {
        outcome: outcome(item, state, None),
        cancelled: false,
    }
}

fn cancelled(progress: &ProgressSender, item: &WorkItem, state: &mut AttemptState) -> Finished {
    state.status = ItemStatus::Skipped;
    progress.send(
        ProgressUpdate::new(item.id.clone(), ItemStatus::Skipped, 100).with_message("cancelled"),
    );
    Finished {
        outcome: outcome(item, state, None),
        cancelled: true,
    }
}
