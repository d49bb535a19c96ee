//! Progress aggregation and event fan-out
//!
//! Workers never touch shared progress state. They push [`ProgressUpdate`]s into an
//! unbounded channel; one aggregator task applies them in arrival order, publishes the
//! resulting [`ProgressSnapshot`] on a watch channel and re-broadcasts each change as an
//! [`Event`] for rendering layers.

use crate::types::{Event, ItemId, ItemStatus, Summary};
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::BroadcastStream;

/// Capacity of the event broadcast channel; slow subscribers past this lag
const EVENT_CAPACITY: usize = 1000;

/// Display state of one item
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItemProgress {
    /// Current status
    pub status: ItemStatus,
    /// Progress percentage (0 to 100)
    pub percent: u8,
}

/// Aggregate view of a run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Items that reached a terminal status
    pub completed: usize,
    /// Items in the current run
    pub total: usize,
    /// Latest state of every item that reported
    pub items: HashMap<ItemId, ItemProgress>,
}

impl ProgressSnapshot {
    /// Overall completion percentage
    pub fn overall_percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed.min(self.total) * 100) / self.total) as u8
    }

    fn apply(&mut self, update: &ProgressUpdate) -> bool {
        let entry = self.items.entry(update.id.clone()).or_insert(ItemProgress {
            status: ItemStatus::Pending,
            percent: 0,
        });

        // Terminal states are final; late percent callbacks are dropped
        if entry.status.is_terminal() {
            return false;
        }

        entry.status = update.status;
        entry.percent = update.percent.min(100);
        if update.status.is_terminal() {
            self.completed += 1;
        }
        true
    }
}

/// One state change reported by a worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Item identity
    pub id: ItemId,
    /// New status
    pub status: ItemStatus,
    /// Progress percentage (0 to 100)
    pub percent: u8,
    /// Attempt number, when the update belongs to a specific attempt
    pub attempt: Option<u32>,
    /// Short detail ("retry 2", error text, ...)
    pub message: Option<String>,
}

impl ProgressUpdate {
    /// Plain status/percent update
    pub fn new(id: ItemId, status: ItemStatus, percent: u8) -> Self {
        Self {
            id,
            status,
            percent,
            attempt: None,
            message: None,
        }
    }

    /// Tag the update with an attempt number
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Attach a detail message
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug)]
enum Command {
    Begin { total: usize },
    Update(ProgressUpdate),
    Finish(Event),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle workers use to report progress
#[derive(Clone, Debug)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<Command>,
}

impl ProgressSender {
    /// Report an update; never blocks
    pub fn send(&self, update: ProgressUpdate) {
        if self.tx.send(Command::Update(update)).is_err() {
            tracing::trace!("Progress aggregator gone, dropping update");
        }
    }

    /// Report a status/percent change
    pub fn update(&self, id: &ItemId, status: ItemStatus, percent: u8) {
        self.send(ProgressUpdate::new(id.clone(), status, percent));
    }
}

/// Progress aggregator shared by every run of a pipeline
pub struct ProgressReporter {
    sender: ProgressSender,
    snapshot: watch::Receiver<ProgressSnapshot>,
    events: broadcast::Sender<Event>,
}

impl ProgressReporter {
    /// Spawn the aggregator task
    ///
    /// Must be called from within a tokio runtime. The task exits when the reporter
    /// and every [`ProgressSender`] have been dropped.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ProgressSnapshot::default());
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);

        tokio::spawn(aggregate(rx, snapshot_tx, events.clone()));

        Self {
            sender: ProgressSender { tx },
            snapshot: snapshot_rx,
            events,
        }
    }

    /// Handle for workers
    pub fn sender(&self) -> ProgressSender {
        self.sender.clone()
    }

    /// Current aggregate state
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch the aggregate state change over time
    pub fn watch(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Run events as a `Stream`
    pub fn event_stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.subscribe())
    }

    /// Wait until every update sent before this call has been applied
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.sender.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Reset the snapshot for a new run of `total` items
    pub(crate) fn begin(&self, total: usize) {
        let _ = self.sender.tx.send(Command::Begin { total });
    }

    /// Announce the end of a run
    pub(crate) fn finish(&self, summary: &Summary) {
        let _ = self.sender.tx.send(Command::Finish(Event::RunFinished {
            succeeded: summary.succeeded,
            failed: summary.failed,
            skipped: summary.skipped,
            cancelled: summary.cancelled,
        }));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

async fn aggregate(
    mut rx: mpsc::UnboundedReceiver<Command>,
    snapshot: watch::Sender<ProgressSnapshot>,
    events: broadcast::Sender<Event>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Begin { total } => {
                snapshot.send_modify(|s| {
                    s.items.clear();
                    s.completed = 0;
                    s.total = total;
                });
                // Nobody listening is fine
                let _ = events.send(Event::RunStarted { total });
            }
            Command::Update(update) => {
                let mut applied = false;
                snapshot.send_if_modified(|s| {
                    applied = s.apply(&update);
                    applied
                });
                if applied {
                    let _ = events.send(Event::Progress {
                        id: update.id,
                        status: update.status,
                        percent: update.percent.min(100),
                        attempt: update.attempt,
                        message: update.message,
                    });
                }
            }
            Command::Finish(event) => {
                let _ = events.send(event);
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::trace!("Progress aggregator stopped");
}
