//! Cruft collection: transfers that no longer match a wanted channel state.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::ChannelManager;
use crate::error::{RemoveError, Result};
use crate::transfer::TransferHandle;
use crate::types::{ChannelRecord, ContentId, PublicKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CruftReason {
    /// No channel uses this transfer's directory
    Orphaned,
    /// An old version of a channel that has since been updated
    Superseded,
    /// A channel the user unsubscribed from
    Unsubscribed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub content_id: ContentId,
    pub delete_content: bool,
    pub reason: CruftReason,
}

/// Outcome of one cruft collection pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct CruftReport {
    pub transfers: usize,
    pub removed: usize,
    pub already_gone: usize,
    pub failed: usize,
    pub removals: Vec<Removal>,
}

/// Decide which transfers to remove.
///
/// Transfers are attributed to channels by directory name. The current
/// archive of the personal channel and of every subscribed channel is never
/// part of the plan, whatever directory name its transfer carries. Old personal versions keep their content, everything
/// else removed here has its content deleted.
pub fn plan_removals(transfers: &[TransferHandle], channels: &[ChannelRecord], me: &PublicKey) -> Vec<Removal> {
    let by_dir: HashMap<String, &ChannelRecord> = channels.iter().map(|c| (c.dir_name(), c)).collect();
    let wanted: HashSet<ContentId> = channels
        .iter()
        .filter(|c| c.subscribed || c.is_personal(me))
        .filter_map(|c| c.content_id)
        .collect();

    transfers
        .iter()
        .filter(|transfer| !wanted.contains(&transfer.content_id))
        .filter_map(|transfer| {
            let removal = |delete_content, reason| Removal {
                content_id: transfer.content_id,
                delete_content,
                reason,
            };

            let Some(channel) = by_dir.get(&transfer.dir_name) else {
                return Some(removal(true, CruftReason::Orphaned));
            };

            let personal = channel.is_personal(me);
            if channel.content_id != Some(transfer.content_id) {
                return Some(removal(!personal, CruftReason::Superseded));
            }
            if !personal && !channel.subscribed {
                return Some(removal(true, CruftReason::Unsubscribed));
            }
            None
        })
        .collect()
}

impl ChannelManager {
    /// Remove transfers for deleted, updated and unsubscribed channels.
    ///
    /// Fires every removal and returns; completion arrives later as
    /// `TransferEvent::Removed`.
    pub async fn remove_cruft_channels(&self) -> Result<CruftReport> {
        let transfers = self.transfers.list_active_transfers().await?;
        let channels = self.store.all_channels().await?;
        let me = self.store.personal_key();

        for channel in channels.iter().filter(|c| !c.is_personal(me)) {
            if channel.local_version > channel.remote_version {
                warn!(
                    public_key = %channel.public_key,
                    local_version = channel.local_version,
                    remote_version = channel.remote_version,
                    "Channel imported beyond its published version"
                );
            }
        }

        let removals = plan_removals(&transfers, &channels, me);
        let mut report = CruftReport {
            transfers: transfers.len(),
            ..Default::default()
        };

        for removal in &removals {
            match self
                .transfers
                .remove_transfer(&removal.content_id, removal.delete_content)
                .await
            {
                Ok(()) => {
                    debug!(
                        content_id = %removal.content_id,
                        reason = ?removal.reason,
                        delete_content = removal.delete_content,
                        "Removing cruft transfer"
                    );
                    report.removed += 1;
                }
                Err(RemoveError::UnknownTransfer(_)) => report.already_gone += 1,
                Err(e) => {
                    warn!(content_id = %removal.content_id, error = %e, "Failed to remove cruft transfer");
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 {
            info!(
                removed = report.removed,
                transfers = report.transfers,
                "Removed cruft channel transfers"
            );
        }
        report.removals = removals;
        Ok(report)
    }
}
