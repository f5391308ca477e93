//! Update reconciler: store state vs. transfer state.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::queue::QueueEntry;
use super::ChannelManager;
use crate::error::Result;
use crate::transfer::TransferRequest;
use crate::types::ContentId;

/// Outcome of one reconciliation pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    /// Channels with an update available
    pub candidates: usize,
    /// New transfers started
    pub started: usize,
    /// Completed transfers queued for import
    pub enqueued: usize,
    /// Completed transfers already waiting in the queue
    pub already_queued: usize,
    /// Transfers still fetching
    pub in_progress: usize,
    /// Channels whose transfer could not be queried or started
    pub failed: usize,
    /// Content ids of the transfers started by this pass
    pub started_ids: Vec<ContentId>,
}

impl ChannelManager {
    /// Start transfers for outdated subscribed channels and queue completed
    /// ones for import.
    ///
    /// The personal channel is never a candidate. Running this twice without
    /// a state change in between starts and queues nothing the second time.
    pub async fn check_channel_updates(&self) -> Result<UpdateReport> {
        let me = self.store.personal_key();
        let candidates = self.store.updated_subscribed_channels().await?;
        let mut report = UpdateReport::default();

        for channel in candidates.iter().filter(|c| !c.is_personal(me)) {
            let Some(content_id) = channel.content_id else {
                continue;
            };
            report.candidates += 1;

            let handle = match self.transfers.get_transfer(&content_id).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(content_id = %content_id, error = %e, "Failed to query channel transfer");
                    report.failed += 1;
                    continue;
                }
            };

            match handle {
                None => {
                    match self
                        .transfers
                        .start_transfer(&content_id, TransferRequest::download(channel))
                        .await
                    {
                        Ok(()) => {
                            info!(
                                public_key = %channel.public_key,
                                content_id = %content_id,
                                local_version = channel.local_version,
                                remote_version = channel.remote_version,
                                "Downloading channel update"
                            );
                            report.started += 1;
                            report.started_ids.push(content_id);
                        }
                        Err(e) => {
                            warn!(content_id = %content_id, error = %e, "Failed to start channel transfer");
                            report.failed += 1;
                        }
                    }
                }
                Some(handle) if handle.status.is_complete() => {
                    let entry = QueueEntry {
                        content_id,
                        directory: handle.directory,
                    };
                    if self.enqueue(entry).await {
                        report.enqueued += 1;
                    } else {
                        report.already_queued += 1;
                    }
                }
                Some(handle) => {
                    debug!(content_id = %content_id, status = ?handle.status, "Channel transfer in progress");
                    report.in_progress += 1;
                }
            }
        }

        Ok(report)
    }
}
