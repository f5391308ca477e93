//! Metadata store seam.
//!
//! The store is the single source of truth for channel records. The manager
//! reads subscription and version fields and, through `process_channel_dir`,
//! lets the store bump `local_version` after importing a downloaded archive.
//! It never writes anything else.

pub mod archive;
pub mod file;

use async_trait::async_trait;
use std::path::Path;

use crate::error::{ImportError, StoreError};
use crate::types::{ChannelRecord, ContentId, PublicKey};

pub use archive::{ChannelManifest, MANIFEST_FILE_NAME};
pub use file::FileStore;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// This node's own identity
    fn personal_key(&self) -> &PublicKey;

    /// Subscribed channels with `local_version < remote_version`, excluding
    /// the personal channel.
    async fn updated_subscribed_channels(&self) -> Result<Vec<ChannelRecord>, StoreError>;

    /// The personal channel record, if one was ever created
    async fn personal_channel(&self) -> Result<Option<ChannelRecord>, StoreError>;

    /// Every channel record, personal included
    async fn all_channels(&self) -> Result<Vec<ChannelRecord>, StoreError>;

    /// Import the archive downloaded for `content_id` into `directory`.
    ///
    /// Returns the record as updated by the import.
    async fn process_channel_dir(
        &self,
        content_id: &ContentId,
        directory: &Path,
    ) -> Result<ChannelRecord, ImportError>;
}
