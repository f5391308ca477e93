//! Transfer manager seam.
//!
//! The manager only starts, removes and queries transfers by content id. The
//! swarm protocol, piece selection and disk I/O live behind this trait.
//! Completions are reported as messages on an mpsc channel consumed by the
//! control loop, never as callbacks into the manager.
//!
//! ```text
//! start_transfer ──> Pending ──> Active ──> Seeding ──> TransferEvent::Finished
//!                       │           │
//!                       └───────────┴──> (error) ──> TransferEvent::Failed
//! remove_transfer ──> handle dropped ──> TransferEvent::Removed
//! ```

pub mod local;

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::{RemoveError, StartError, TransferError};
use crate::types::{ChannelRecord, ContentId};

pub use local::LocalTransferManager;

/// Channel size for transfer manager -> control loop events
pub const EVENT_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Registered, nothing fetched yet
    Pending,
    /// Fetching
    Active,
    /// Complete and being seeded
    Seeding,
}

impl TransferStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, TransferStatus::Seeding)
    }
}

/// Snapshot of a transfer as reported by the transfer manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferHandle {
    pub content_id: ContentId,

    /// Directory name of the channel this transfer was started for
    pub dir_name: String,

    /// Where the archive content lives on disk
    pub directory: PathBuf,

    pub status: TransferStatus,
}

/// Metadata attached to a transfer when it is started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub dir_name: String,
    pub title: String,
    /// Content is authored locally; seed it rather than fetch it
    pub seed: bool,
}

impl TransferRequest {
    /// Fetch a foreign channel's archive
    pub fn download(record: &ChannelRecord) -> Self {
        Self {
            dir_name: record.dir_name(),
            title: record.title.clone(),
            seed: false,
        }
    }

    /// Seed the personal channel's archive
    pub fn seed(record: &ChannelRecord) -> Self {
        Self {
            dir_name: record.dir_name(),
            title: record.title.clone(),
            seed: true,
        }
    }
}

/// Completion messages posted by a transfer manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Finished {
        content_id: ContentId,
        directory: PathBuf,
    },
    Failed {
        content_id: ContentId,
        reason: String,
    },
    Removed {
        content_id: ContentId,
        content_deleted: bool,
    },
}

pub type TransferEventSender = mpsc::Sender<TransferEvent>;
pub type TransferEventReceiver = mpsc::Receiver<TransferEvent>;

/// Create a bounded channel for transfer events
pub fn event_channel() -> (TransferEventSender, TransferEventReceiver) {
    mpsc::channel(EVENT_CHANNEL_SIZE)
}

#[async_trait]
pub trait TransferManager: Send + Sync {
    async fn has_transfer(&self, content_id: &ContentId) -> Result<bool, TransferError> {
        Ok(self.get_transfer(content_id).await?.is_some())
    }

    async fn get_transfer(&self, content_id: &ContentId) -> Result<Option<TransferHandle>, TransferError>;

    /// Register a transfer and return once it is accepted; the fetch itself
    /// completes later with a `TransferEvent`.
    async fn start_transfer(&self, content_id: &ContentId, request: TransferRequest) -> Result<(), StartError>;

    /// Request removal; completion is reported with `TransferEvent::Removed`.
    async fn remove_transfer(&self, content_id: &ContentId, delete_content: bool) -> Result<(), RemoveError>;

    /// Every transfer started on behalf of a channel
    async fn list_active_transfers(&self) -> Result<Vec<TransferHandle>, TransferError>;
}
