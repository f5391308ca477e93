//! chansync - channel synchronization manager.
//!
//! Metadata channels are ordered, versioned collections of content records
//! published by a channel owner and distributed as swarm archives. This crate
//! decides which channel archives need fetching, imports completed archives
//! into the metadata store exactly once, keeps the operator's own channel
//! seeded, and removes transfers nobody wants anymore.
//!
//! # Architecture
//!
//! ```text
//! +----------------+   updated/all channels   +------------------+
//! | MetadataStore  | <----------------------- |                  |
//! | (FileStore)    | <--- process_channel_dir |  ChannelManager  |
//! +----------------+                          |  - reconciler    |
//!                                             |  - queue/import  |
//! +----------------+   start/remove/query     |  - cruft         |
//! | TransferManager| <----------------------- |  - bootstrapper  |
//! | (Local...)     | ---- TransferEvent ----> |                  |
//! +----------------+        (mpsc)            +------------------+
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod store;
pub mod telemetry;
pub mod transfer;
pub mod types;

pub use error::{ImportError, RemoveError, Result, StartError, StoreError, SyncError, TransferError};
pub use manager::{ChannelManager, ManagerSettings};
pub use store::{FileStore, MetadataStore};
pub use transfer::{LocalTransferManager, TransferEvent, TransferHandle, TransferManager, TransferStatus};
pub use types::{ChannelRecord, ContentId, PublicKey};
