//! Keeping the operator's own channel seeded.

use tracing::{debug, info, warn};

use super::ChannelManager;
use crate::error::{RemoveError, Result};
use crate::transfer::TransferRequest;
use crate::types::ContentId;

impl ChannelManager {
    /// Start seeding the personal channel if it is committed and not already
    /// transferring. Returns whether a transfer was started.
    pub async fn ensure_personal_channel_seeding(&self) -> Result<bool> {
        let Some(channel) = self.store.personal_channel().await? else {
            debug!("No personal channel");
            return Ok(false);
        };
        let Some(content_id) = channel.content_id else {
            debug!("Personal channel not committed yet");
            return Ok(false);
        };

        if self.transfers.has_transfer(&content_id).await? {
            return Ok(false);
        }

        self.transfers
            .start_transfer(&content_id, TransferRequest::seed(&channel))
            .await?;
        info!(content_id = %content_id, title = %channel.title, "Seeding personal channel");
        Ok(true)
    }

    /// Switch seeding over to a freshly committed personal archive.
    ///
    /// Older personal transfers are removed with their content kept.
    pub async fn updated_personal_channel(&self, content_id: ContentId) -> Result<bool> {
        let dir_name = self.store.personal_key().dir_name();

        for handle in self.transfers.list_active_transfers().await? {
            if handle.dir_name != dir_name || handle.content_id == content_id {
                continue;
            }
            match self.transfers.remove_transfer(&handle.content_id, false).await {
                Ok(()) | Err(RemoveError::UnknownTransfer(_)) => {
                    debug!(content_id = %handle.content_id, "Dropped old personal channel transfer");
                }
                Err(e) => {
                    warn!(content_id = %handle.content_id, error = %e, "Failed to drop old personal transfer");
                }
            }
        }

        let committed = self.store.personal_channel().await?.and_then(|c| c.content_id);
        if committed != Some(content_id) {
            warn!(
                content_id = %content_id,
                "Personal channel record does not point at the new archive yet"
            );
        }
        self.ensure_personal_channel_seeding().await
    }
}
