//! Directory-backed transfer manager.
//!
//! Resolves content ids against a pool directory (`<pool>/<content id>/`) and
//! "downloads" by copying the archive into `<downloads>/<content id>/` on a
//! background task. Each version gets its own directory, so deleting the
//! content of an old version never touches the current one.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    event_channel, TransferEvent, TransferEventReceiver, TransferEventSender, TransferHandle,
    TransferManager, TransferRequest, TransferStatus,
};
use crate::error::{RemoveError, StartError, TransferError};
use crate::store::ChannelManifest;
use crate::types::ContentId;

type Handles = Arc<Mutex<HashMap<ContentId, TransferHandle>>>;

pub struct LocalTransferManager {
    pool_dir: PathBuf,
    downloads_dir: PathBuf,
    handles: Handles,
    events: TransferEventSender,
}

impl LocalTransferManager {
    /// Create the manager and the receiving end of its event channel
    pub fn new(pool_dir: impl Into<PathBuf>, downloads_dir: impl Into<PathBuf>) -> (Self, TransferEventReceiver) {
        let (events, rx) = event_channel();
        let manager = Self {
            pool_dir: pool_dir.into(),
            downloads_dir: downloads_dir.into(),
            handles: Arc::new(Mutex::new(HashMap::new())),
            events,
        };
        (manager, rx)
    }

    pub fn pool_path(&self, content_id: &ContentId) -> PathBuf {
        self.pool_dir.join(content_id.to_string())
    }

    pub fn download_path(&self, content_id: &ContentId) -> PathBuf {
        self.downloads_dir.join(content_id.to_string())
    }

    /// Re-register archives left in the downloads directory by an earlier run.
    ///
    /// They come back as seeding; the channel is read from each archive's
    /// manifest, and archives without one are registered under no channel.
    pub async fn restore(&self) -> io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.downloads_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut handles = self.handles.lock().await;
        let mut restored = 0;
        while let Some(entry) = entries.next_entry().await? {
            let Some(content_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<ContentId>().ok())
            else {
                continue;
            };
            if handles.contains_key(&content_id) || !entry.file_type().await?.is_dir() {
                continue;
            }

            let directory = entry.path();
            let dir_name = match ChannelManifest::load(&directory).await {
                Ok(manifest) => manifest.public_key.dir_name(),
                Err(e) => {
                    debug!(content_id = %content_id, error = %e, "Restored archive has no usable manifest");
                    String::new()
                }
            };

            handles.insert(
                content_id,
                TransferHandle {
                    content_id,
                    dir_name,
                    directory,
                    status: TransferStatus::Seeding,
                },
            );
            restored += 1;
        }

        if restored > 0 {
            info!(restored, path = %self.downloads_dir.display(), "Restored channel transfers");
        }
        Ok(restored)
    }

    async fn set_status(handles: &Handles, content_id: &ContentId, status: TransferStatus) -> bool {
        match handles.lock().await.get_mut(content_id) {
            Some(handle) => {
                handle.status = status;
                true
            }
            None => false,
        }
    }

    /// Background fetch: copy the pool archive into the downloads directory
    async fn fetch(handles: Handles, events: TransferEventSender, content_id: ContentId, source: PathBuf, directory: PathBuf) {
        if !Self::set_status(&handles, &content_id, TransferStatus::Active).await {
            return;
        }

        let event = match copy_dir(&source, &directory).await {
            Ok(bytes) => {
                if !Self::set_status(&handles, &content_id, TransferStatus::Seeding).await {
                    debug!(content_id = %content_id, "Transfer removed while fetching");
                    return;
                }
                info!(content_id = %content_id, bytes, "Transfer finished");
                TransferEvent::Finished {
                    content_id,
                    directory,
                }
            }
            Err(e) => {
                warn!(content_id = %content_id, error = %e, "Transfer failed");
                handles.lock().await.remove(&content_id);
                TransferEvent::Failed {
                    content_id,
                    reason: e.to_string(),
                }
            }
        };

        // Receiver may have shut down
        let _ = events.send(event).await;
    }
}

#[async_trait]
impl TransferManager for LocalTransferManager {
    async fn get_transfer(&self, content_id: &ContentId) -> Result<Option<TransferHandle>, TransferError> {
        Ok(self.handles.lock().await.get(content_id).cloned())
    }

    async fn start_transfer(&self, content_id: &ContentId, request: TransferRequest) -> Result<(), StartError> {
        let mut handles = self.handles.lock().await;
        if handles.contains_key(content_id) {
            return Err(StartError::AlreadyExists(*content_id));
        }

        let directory = self.download_path(content_id);
        let source = self.pool_path(content_id);

        // Locally authored content already in place: seed it as is
        if request.seed && tokio::fs::metadata(&directory).await.map(|m| m.is_dir()).unwrap_or(false) {
            info!(content_id = %content_id, title = %request.title, "Seeding channel");
            handles.insert(
                *content_id,
                TransferHandle {
                    content_id: *content_id,
                    dir_name: request.dir_name,
                    directory,
                    status: TransferStatus::Seeding,
                },
            );
            return Ok(());
        }

        if !tokio::fs::metadata(&source).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(StartError::NotFound(*content_id));
        }

        info!(
            content_id = %content_id,
            title = %request.title,
            seed = request.seed,
            "Starting channel transfer"
        );
        handles.insert(
            *content_id,
            TransferHandle {
                content_id: *content_id,
                dir_name: request.dir_name,
                directory: directory.clone(),
                status: TransferStatus::Pending,
            },
        );
        drop(handles);

        tokio::spawn(Self::fetch(
            self.handles.clone(),
            self.events.clone(),
            *content_id,
            source,
            directory,
        ));
        Ok(())
    }

    async fn remove_transfer(&self, content_id: &ContentId, delete_content: bool) -> Result<(), RemoveError> {
        let handle = self
            .handles
            .lock()
            .await
            .remove(content_id)
            .ok_or(RemoveError::UnknownTransfer(*content_id))?;

        debug!(content_id = %content_id, delete_content, "Removing transfer");
        let events = self.events.clone();
        let content_id = *content_id;
        tokio::spawn(async move {
            let mut content_deleted = false;
            if delete_content {
                match tokio::fs::remove_dir_all(&handle.directory).await {
                    Ok(()) => content_deleted = true,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(
                            content_id = %content_id,
                            path = %handle.directory.display(),
                            error = %e,
                            "Failed to delete transfer content"
                        );
                    }
                }
            }
            let _ = events
                .send(TransferEvent::Removed {
                    content_id,
                    content_deleted,
                })
                .await;
        });
        Ok(())
    }

    async fn list_active_transfers(&self) -> Result<Vec<TransferHandle>, TransferError> {
        Ok(self.handles.lock().await.values().cloned().collect())
    }
}

/// Copy a directory tree, returning the number of bytes copied
async fn copy_dir(source: &Path, dest: &Path) -> io::Result<u64> {
    let mut bytes = 0u64;
    let mut pending = vec![(source.to_path_buf(), dest.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                bytes += tokio::fs::copy(entry.path(), &target).await?;
            }
        }
    }

    Ok(bytes)
}
