//! Channel manager.
//!
//! Coordinates three independently mutating pieces of state with no
//! transaction across them: the metadata store, the transfer manager and the
//! in-memory processing queue. Every pass is idempotent, so an aborted pass
//! is simply retried by the next timer tick.
//!
//! # Control loop
//!
//! ```text
//! start() ─> ensure_personal_channel_seeding ─> remove_cruft_channels ─> loop {
//!     update tick   ─> check_channel_updates ─> drain_queue
//!     cruft tick    ─> remove_cruft_channels
//!     TransferEvent ─> Finished: enqueue + drain_queue
//!     shutdown      ─> break
//! }
//! ```
//!
//! Everything runs as one task; transfer starts, removals and imports are
//! the only suspension points.

pub mod cruft;
pub mod import;
pub mod personal;
pub mod queue;
pub mod reconcile;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::store::MetadataStore;
use crate::transfer::{TransferEvent, TransferEventReceiver, TransferManager};
use crate::types::ContentId;

pub use cruft::{plan_removals, CruftReason, CruftReport, Removal};
pub use import::DrainReport;
pub use queue::{ProcessingQueue, QueueEntry};
pub use reconcile::UpdateReport;

/// Scheduling knobs for the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSettings {
    /// How often to look for channel updates and drain the queue
    pub update_interval: Duration,
    /// How often to collect cruft transfers after the startup pass
    pub cruft_interval: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(60),
            cruft_interval: Duration::from_secs(3600),
        }
    }
}

pub struct ChannelManager {
    store: Arc<dyn MetadataStore>,
    transfers: Arc<dyn TransferManager>,
    settings: ManagerSettings,
    queue: Mutex<ProcessingQueue>,
    draining: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    // Bumped by every start; a loop whose generation is stale exits
    generation: AtomicU64,
    // Held by a running control loop so two loops never overlap
    running: Mutex<()>,
}

impl ChannelManager {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        transfers: Arc<dyn TransferManager>,
        settings: ManagerSettings,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            transfers,
            settings,
            queue: Mutex::new(ProcessingQueue::new()),
            draining: AtomicBool::new(false),
            shutdown_tx,
            generation: AtomicU64::new(0),
            running: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Queue a completed transfer for import; false if already queued
    pub async fn enqueue(&self, entry: QueueEntry) -> bool {
        let added = self.queue.lock().await.push(entry.clone());
        if added {
            debug!(content_id = %entry.content_id, "Queued channel for import");
        }
        added
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Snapshot of the entries waiting for import
    pub async fn queued(&self) -> Vec<QueueEntry> {
        self.queue.lock().await.iter().cloned().collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Spawn the control loop.
    ///
    /// Seeds the personal channel and collects cruft once before the periodic
    /// work begins. Calling `start` again supersedes the previous loop: it
    /// stops at its next suspension point and the new loop waits for it.
    pub fn start(self: &Arc<Self>, events: TransferEventReceiver) -> JoinHandle<()> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.shutdown_tx.send_replace(false);
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run(generation, events).await })
    }

    fn superseded(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) != generation || self.is_shutting_down()
    }

    /// Stop scheduling and forget queued imports.
    ///
    /// An import already in flight completes; nothing after it is started.
    /// A running drain clears the rest of the queue itself and reports it as
    /// abandoned.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let mut queue = self.queue.lock().await;
        if self.draining.load(Ordering::Acquire) {
            info!(queued = queue.len(), "Channel manager shutting down, drain in progress");
            return;
        }
        let dropped = queue.len();
        queue.clear();
        info!(dropped, "Channel manager shutting down");
    }

    async fn run(self: Arc<Self>, generation: u64, mut events: TransferEventReceiver) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let _running = self.running.lock().await;
        shutdown.borrow_and_update();
        if self.superseded(generation) {
            return;
        }

        info!(
            update_interval_secs = self.settings.update_interval.as_secs(),
            cruft_interval_secs = self.settings.cruft_interval.as_secs(),
            "Channel manager started"
        );

        if let Err(e) = self.ensure_personal_channel_seeding().await {
            warn!(error = %e, "Failed to seed personal channel");
        }
        if let Err(e) = self.remove_cruft_channels().await {
            warn!(error = %e, "Cruft collection failed");
        }

        let mut update_timer = time::interval(self.settings.update_interval);
        update_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cruft_timer = time::interval_at(
            Instant::now() + self.settings.cruft_interval,
            self.settings.cruft_interval,
        );
        cruft_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            if self.superseded(generation) {
                break;
            }
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || self.superseded(generation) {
                        break;
                    }
                }
                _ = update_timer.tick() => {
                    self.service_channels().await;
                }
                _ = cruft_timer.tick() => {
                    if let Err(e) = self.remove_cruft_channels().await {
                        warn!(error = %e, "Cruft collection failed");
                    }
                }
                event = events.recv(), if events_open => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            debug!("Transfer event channel closed");
                            events_open = false;
                        }
                    }
                }
            }
        }

        debug!("Channel manager loop stopped");
    }

    /// One periodic pass: reconcile, then import whatever completed
    pub async fn service_channels(&self) {
        match self.check_channel_updates().await {
            Ok(report) if report.started > 0 || report.enqueued > 0 || report.failed > 0 => {
                info!(
                    started = report.started,
                    enqueued = report.enqueued,
                    in_progress = report.in_progress,
                    failed = report.failed,
                    "Checked channel updates"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Channel update check failed"),
        }
        self.drain_queue().await;
    }

    pub async fn handle_event(&self, event: TransferEvent) {
        match event {
            TransferEvent::Finished {
                content_id,
                directory,
            } => {
                if self.on_transfer_finished(content_id, directory).await {
                    self.drain_queue().await;
                }
            }
            TransferEvent::Failed { content_id, reason } => {
                warn!(content_id = %content_id, reason = %reason, "Channel transfer failed, retrying next pass");
            }
            TransferEvent::Removed {
                content_id,
                content_deleted,
            } => {
                debug!(content_id = %content_id, content_deleted, "Channel transfer removed");
            }
        }
    }

    /// Queue a finished transfer if it is the current archive of an outdated
    /// subscribed channel. Returns whether it was queued.
    async fn on_transfer_finished(&self, content_id: ContentId, directory: std::path::PathBuf) -> bool {
        let channels = match self.store.updated_subscribed_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                // The next reconciliation pass picks it up
                warn!(content_id = %content_id, error = %e, "Cannot look up finished transfer");
                return false;
            }
        };

        let me = self.store.personal_key();
        let wanted = channels
            .iter()
            .any(|c| c.content_id == Some(content_id) && !c.is_personal(me));
        if !wanted {
            debug!(content_id = %content_id, "Finished transfer needs no import");
            return false;
        }

        self.enqueue(QueueEntry {
            content_id,
            directory,
        })
        .await
    }
}
