#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use chansync::error::{RemoveError, StartError, TransferError};
use chansync::store::ChannelManifest;
use chansync::transfer::TransferRequest;
use chansync::{
    ChannelManager, ChannelRecord, ContentId, FileStore, ManagerSettings, PublicKey,
    TransferHandle, TransferManager, TransferStatus,
};

/// In-memory transfer manager that records every start and removal
#[derive(Default)]
pub struct FakeTransfers {
    base: PathBuf,
    handles: Mutex<HashMap<ContentId, TransferHandle>>,
    started: Mutex<Vec<(ContentId, TransferRequest)>>,
    removed: Mutex<Vec<(ContentId, bool)>>,
    refuse: Mutex<HashSet<ContentId>>,
    vanished: Mutex<HashSet<ContentId>>,
    unavailable: AtomicBool,
}

impl FakeTransfers {
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            ..Default::default()
        }
    }

    pub fn directory(&self, content_id: &ContentId) -> PathBuf {
        self.base.join(content_id.to_string())
    }

    /// Register a transfer as if started by an earlier run
    pub fn insert(&self, content_id: ContentId, dir_name: String, status: TransferStatus) {
        let handle = TransferHandle {
            content_id,
            dir_name,
            directory: self.directory(&content_id),
            status,
        };
        self.handles.lock().unwrap().insert(content_id, handle);
    }

    pub fn set_status(&self, content_id: &ContentId, status: TransferStatus) {
        self.handles
            .lock()
            .unwrap()
            .get_mut(content_id)
            .expect("unknown transfer")
            .status = status;
    }

    pub fn refuse(&self, content_id: ContentId) {
        self.refuse.lock().unwrap().insert(content_id);
    }

    /// Keep listing the transfer but answer removals as if it were already gone
    pub fn vanish(&self, content_id: ContentId) {
        self.vanished.lock().unwrap().insert(content_id);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn started(&self) -> Vec<(ContentId, TransferRequest)> {
        self.started.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<(ContentId, bool)> {
        self.removed.lock().unwrap().clone()
    }

    fn check_available(&self) -> Result<(), TransferError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransferError::Unavailable("fake is down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TransferManager for FakeTransfers {
    async fn get_transfer(&self, content_id: &ContentId) -> Result<Option<TransferHandle>, TransferError> {
        self.check_available()?;
        Ok(self.handles.lock().unwrap().get(content_id).cloned())
    }

    async fn start_transfer(&self, content_id: &ContentId, request: TransferRequest) -> Result<(), StartError> {
        self.check_available()?;
        if self.refuse.lock().unwrap().contains(content_id) {
            return Err(StartError::NotFound(*content_id));
        }
        let status = if request.seed {
            TransferStatus::Seeding
        } else {
            TransferStatus::Pending
        };
        self.insert(*content_id, request.dir_name.clone(), status);
        self.started.lock().unwrap().push((*content_id, request));
        Ok(())
    }

    async fn remove_transfer(&self, content_id: &ContentId, delete_content: bool) -> Result<(), RemoveError> {
        self.check_available()?;
        self.removed.lock().unwrap().push((*content_id, delete_content));
        if self.vanished.lock().unwrap().contains(content_id) {
            return Err(RemoveError::UnknownTransfer(*content_id));
        }
        match self.handles.lock().unwrap().remove(content_id) {
            Some(_) => Ok(()),
            None => Err(RemoveError::UnknownTransfer(*content_id)),
        }
    }

    async fn list_active_transfers(&self) -> Result<Vec<TransferHandle>, TransferError> {
        self.check_available()?;
        Ok(self.handles.lock().unwrap().values().cloned().collect())
    }
}

pub fn key(byte: u8) -> PublicKey {
    PublicKey::new(vec![byte; 64])
}

pub fn cid(byte: u8) -> ContentId {
    ContentId::new([byte; 20])
}

pub fn channel(k: u8, content: u8, subscribed: bool, local: u64, remote: u64) -> ChannelRecord {
    ChannelRecord {
        public_key: key(k),
        content_id: Some(cid(content)),
        title: format!("bla{}", k),
        remote_version: remote,
        local_version: local,
        subscribed,
    }
}

pub const ME: u8 = 0xee;

pub struct Harness {
    pub temp: TempDir,
    pub store: Arc<FileStore>,
    pub transfers: Arc<FakeTransfers>,
    pub manager: Arc<ChannelManager>,
}

impl Harness {
    pub async fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(
            FileStore::open(temp.path().join("channels.lst"), key(ME))
                .await
                .unwrap(),
        );
        let transfers = Arc::new(FakeTransfers::new(&temp.path().join("downloads")));
        let manager = Arc::new(ChannelManager::new(
            store.clone(),
            transfers.clone(),
            ManagerSettings::default(),
        ));
        Self {
            temp,
            store,
            transfers,
            manager,
        }
    }

    /// Write the archive a completed transfer would leave on disk
    pub async fn write_archive(&self, public_key: &PublicKey, content_id: ContentId, version: u64) {
        ChannelManifest {
            public_key: public_key.clone(),
            content_id,
            version,
        }
        .write(&self.transfers.directory(&content_id))
        .await
        .unwrap();
    }
}
