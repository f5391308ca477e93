use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::{ContentId, PublicKey};

/// Metadata store failures that make the store unusable for the current pass
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt channel database {path} (line {line}): {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Unknown channel: {0}")]
    UnknownChannel(PublicKey),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A downloaded channel archive could not be imported.
///
/// Never retried automatically; a fresh completed transfer is required.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("No channel manifest in {0}")]
    MissingManifest(PathBuf),

    #[error("Malformed channel manifest {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Archive {content_id} does not belong to any known channel")]
    UnknownChannel { content_id: ContentId },

    #[error("Archive {found} is not the current archive {expected} of channel {public_key}")]
    Superseded {
        public_key: PublicKey,
        expected: ContentId,
        found: ContentId,
    },

    #[error("Archive fetched as {content_id} claims to be {claimed}")]
    ContentMismatch {
        content_id: ContentId,
        claimed: ContentId,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Transfer manager query failures
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transfer manager unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A transfer could not be initiated; retried on the next reconciliation pass
#[derive(Error, Debug)]
pub enum StartError {
    #[error("Content {0} cannot be located")]
    NotFound(ContentId),

    #[error("Transfer for {0} already exists")]
    AlreadyExists(ContentId),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// A removal request failed
#[derive(Error, Debug)]
pub enum RemoveError {
    /// Treated as already removed by callers
    #[error("No transfer for {0}")]
    UnknownTransfer(ContentId),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Crate-level error for a whole pass or operation
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
