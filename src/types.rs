//! Identifier newtypes and the channel record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of hex characters of the public key used as a channel's directory name
pub const CHANNEL_DIR_NAME_LENGTH: usize = 32;

/// Length of a content identifier in bytes
pub const CONTENT_ID_LEN: usize = 20;

/// Identity of a channel owner
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Directory name used for every transfer belonging to this channel.
    ///
    /// All versions of a channel share it, which is how transfers are traced
    /// back to their channel.
    pub fn dir_name(&self) -> String {
        let hex = hex::encode(&self.0);
        let start = hex.len().saturating_sub(CHANNEL_DIR_NAME_LENGTH);
        hex[start..].to_string()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl FromStr for PublicKey {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())?;
        if bytes.is_empty() {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for PublicKey {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_string()
    }
}

/// Address of one specific swarm archive (one version of a channel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId([u8; CONTENT_ID_LEN]);

impl ContentId {
    pub const fn new(bytes: [u8; CONTENT_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONTENT_ID_LEN] {
        &self.0
    }

    /// First 8 hex characters, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; CONTENT_ID_LEN];
        hex::decode_to_slice(s.trim(), &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for ContentId {
    type Error = hex::FromHexError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.to_string()
    }
}

/// A channel as known to the metadata store.
///
/// Created and updated by the store's own ingestion. The manager only reads
/// these and, through the store, bumps `local_version` after an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub public_key: PublicKey,

    /// Archive of the current committed state; `None` until first commit
    pub content_id: Option<ContentId>,

    pub title: String,

    /// Latest version the owner has published
    pub remote_version: u64,

    /// Highest version successfully imported on this node
    pub local_version: u64,

    pub subscribed: bool,
}

impl ChannelRecord {
    pub fn new(public_key: PublicKey, title: impl Into<String>) -> Self {
        Self {
            public_key,
            content_id: None,
            title: title.into(),
            remote_version: 0,
            local_version: 0,
            subscribed: false,
        }
    }

    pub fn is_personal(&self, me: &PublicKey) -> bool {
        &self.public_key == me
    }

    pub fn update_available(&self) -> bool {
        self.local_version < self.remote_version
    }

    pub fn is_committed(&self) -> bool {
        self.content_id.is_some()
    }

    pub fn dir_name(&self) -> String {
        self.public_key.dir_name()
    }
}
