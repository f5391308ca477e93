//! Channel archive manifest.
//!
//! Every downloaded channel archive carries a `channel.toml` at its root that
//! names the owner, the archive's own content id and the version it brings
//! the channel to. Signature checks happen upstream; this only guards against
//! importing an archive under the wrong channel or the wrong version.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ImportError;
use crate::types::{ContentId, PublicKey};

pub const MANIFEST_FILE_NAME: &str = "channel.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelManifest {
    pub public_key: PublicKey,
    pub content_id: ContentId,
    pub version: u64,
}

impl ChannelManifest {
    pub fn path_in(directory: &Path) -> PathBuf {
        directory.join(MANIFEST_FILE_NAME)
    }

    /// Read the manifest from an archive directory
    pub async fn load(directory: &Path) -> Result<Self, ImportError> {
        let path = Self::path_in(directory);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ImportError::MissingManifest(directory.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        toml::from_str(&text).map_err(|e| ImportError::Malformed {
            path,
            reason: e.to_string(),
        })
    }

    /// Write the manifest into an archive directory, creating it if needed
    pub async fn write(&self, directory: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(directory).await?;
        let text = toml::to_string(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tokio::fs::write(Self::path_in(directory), text).await
    }
}
