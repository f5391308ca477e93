//! Channel manager behaviour against a real channel database and a fake
//! transfer manager.

mod common;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use chansync::error::{ImportError, StoreError};
use chansync::manager::QueueEntry;
use chansync::transfer::TransferEvent;
use chansync::{
    ChannelManager, ChannelRecord, ContentId, FileStore, ManagerSettings, MetadataStore,
    PublicKey, SyncError, TransferStatus,
};
use common::{channel, cid, key, FakeTransfers, Harness, ME};

// =============================================================================
// Update reconciler
// =============================================================================

#[tokio::test]
async fn test_only_subscribed_outdated_channel_is_downloaded() {
    let h = Harness::new().await;

    // Personal channel in an inconsistent state: it must not be treated like
    // someone else's outdated channel
    h.store.upsert(channel(ME, 0xe0, true, 4, 5)).await.unwrap();
    h.store.upsert(channel(1, 0x10, true, 123, 123)).await.unwrap(); // subscribed, current
    h.store.upsert(channel(2, 0x20, false, 122, 123)).await.unwrap(); // unsubscribed, outdated
    h.store.upsert(channel(3, 0x30, true, 122, 123)).await.unwrap(); // subscribed, outdated

    let report = h.manager.check_channel_updates().await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.started, 1);
    assert_eq!(report.started_ids, vec![cid(0x30)]);

    let started = h.transfers.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].0, cid(0x30));
    assert_eq!(started[0].1.dir_name, key(3).dir_name());
    assert!(!started[0].1.seed);
}

#[tokio::test]
async fn test_personal_channel_never_reconciled() {
    let h = Harness::new().await;
    h.store.upsert(channel(ME, 0xe0, true, 4, 5)).await.unwrap();
    h.transfers.insert(cid(0xe0), key(ME).dir_name(), TransferStatus::Seeding);

    let report = h.manager.check_channel_updates().await.unwrap();
    assert_eq!(report.candidates, 0);
    assert!(h.transfers.started().is_empty());
    assert_eq!(h.manager.queue_len().await, 0);
}

#[tokio::test]
async fn test_check_is_idempotent() {
    let h = Harness::new().await;
    h.store.upsert(channel(3, 0x30, true, 122, 123)).await.unwrap();
    h.store.upsert(channel(4, 0x40, true, 1, 2)).await.unwrap();
    h.transfers.insert(cid(0x40), key(4).dir_name(), TransferStatus::Seeding);

    let first = h.manager.check_channel_updates().await.unwrap();
    assert_eq!(first.started, 1);
    assert_eq!(first.enqueued, 1);

    let second = h.manager.check_channel_updates().await.unwrap();
    assert_eq!(second.started, 0);
    assert_eq!(second.enqueued, 0);
    assert_eq!(second.already_queued, 1);
    assert_eq!(second.in_progress, 1);

    assert_eq!(h.transfers.started().len(), 1);
    assert_eq!(h.manager.queue_len().await, 1);
}

#[tokio::test]
async fn test_start_failure_does_not_abort_pass() {
    let h = Harness::new().await;
    h.store.upsert(channel(3, 0x30, true, 1, 2)).await.unwrap();
    h.store.upsert(channel(4, 0x40, true, 1, 2)).await.unwrap();
    h.transfers.refuse(cid(0x30));

    let report = h.manager.check_channel_updates().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.started, 1);
    assert_eq!(h.transfers.started()[0].0, cid(0x40));

    // Still outdated, so the next pass tries again
    let report = h.manager.check_channel_updates().await.unwrap();
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn test_unavailable_transfer_manager_fails_channel_not_pass() {
    let h = Harness::new().await;
    h.store.upsert(channel(3, 0x30, true, 1, 2)).await.unwrap();
    h.transfers.set_unavailable(true);

    let report = h.manager.check_channel_updates().await.unwrap();
    assert_eq!(report.failed, 1);

    // Listing failures abort the cruft pass as a whole
    let err = h.manager.remove_cruft_channels().await.unwrap_err();
    assert!(matches!(err, SyncError::Transfer(_)));
}

// =============================================================================
// Processing queue
// =============================================================================

#[tokio::test]
async fn test_completed_transfer_queued_once_and_imported() {
    let h = Harness::new().await;
    h.store.upsert(channel(3, 0x30, true, 122, 123)).await.unwrap();

    h.manager.check_channel_updates().await.unwrap();
    h.transfers.set_status(&cid(0x30), TransferStatus::Seeding);
    h.write_archive(&key(3), cid(0x30), 123).await;

    h.manager.check_channel_updates().await.unwrap();
    h.manager.check_channel_updates().await.unwrap();
    assert_eq!(
        h.manager.queued().await,
        vec![QueueEntry {
            content_id: cid(0x30),
            directory: h.transfers.directory(&cid(0x30)),
        }]
    );

    let report = h.manager.drain_queue().await;
    assert_eq!(report.imported, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.manager.queue_len().await, 0);

    let record = h.store.get(&key(3)).await.unwrap();
    assert_eq!(record.local_version, record.remote_version);

    // Up to date now: nothing left to do
    let report = h.manager.check_channel_updates().await.unwrap();
    assert_eq!(report.candidates, 0);
}

#[tokio::test]
async fn test_failed_import_is_dropped() {
    let h = Harness::new().await;
    h.store.upsert(channel(3, 0x30, true, 1, 2)).await.unwrap();
    h.transfers.insert(cid(0x30), key(3).dir_name(), TransferStatus::Seeding);
    // No archive written: the import must fail

    h.manager.check_channel_updates().await.unwrap();
    let report = h.manager.drain_queue().await;
    assert_eq!(report.imported, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(h.manager.queue_len().await, 0);
    assert!(h.store.get(&key(3)).await.unwrap().update_available());
}

#[tokio::test]
async fn test_finished_event_imports_immediately() {
    let h = Harness::new().await;
    h.store.upsert(channel(3, 0x30, true, 1, 2)).await.unwrap();
    h.store.upsert(channel(4, 0x40, true, 2, 2)).await.unwrap();
    h.write_archive(&key(3), cid(0x30), 2).await;

    h.manager
        .handle_event(TransferEvent::Finished {
            content_id: cid(0x30),
            directory: h.transfers.directory(&cid(0x30)),
        })
        .await;
    assert_eq!(h.store.get(&key(3)).await.unwrap().local_version, 2);

    // Already up to date: finishing is not a reason to import
    h.manager
        .handle_event(TransferEvent::Finished {
            content_id: cid(0x40),
            directory: h.transfers.directory(&cid(0x40)),
        })
        .await;
    assert_eq!(h.manager.queue_len().await, 0);
}

/// Store whose imports wait for a permit, to hold a drain in flight
struct GatedStore {
    inner: FileStore,
    gate: Semaphore,
}

#[async_trait]
impl MetadataStore for GatedStore {
    fn personal_key(&self) -> &PublicKey {
        self.inner.personal_key()
    }

    async fn updated_subscribed_channels(&self) -> Result<Vec<ChannelRecord>, StoreError> {
        self.inner.updated_subscribed_channels().await
    }

    async fn personal_channel(&self) -> Result<Option<ChannelRecord>, StoreError> {
        self.inner.personal_channel().await
    }

    async fn all_channels(&self) -> Result<Vec<ChannelRecord>, StoreError> {
        self.inner.all_channels().await
    }

    async fn process_channel_dir(
        &self,
        content_id: &ContentId,
        directory: &Path,
    ) -> Result<ChannelRecord, ImportError> {
        let _permit = self.gate.acquire().await.expect("gate closed");
        self.inner.process_channel_dir(content_id, directory).await
    }
}

#[tokio::test]
async fn test_concurrent_drain_is_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let inner = FileStore::open(temp.path().join("channels.lst"), key(ME))
        .await
        .unwrap();
    inner.upsert(channel(3, 0x30, true, 1, 2)).await.unwrap();
    let store = Arc::new(GatedStore {
        inner,
        gate: Semaphore::new(0),
    });
    let transfers = Arc::new(FakeTransfers::new(temp.path()));
    let manager = Arc::new(ChannelManager::new(
        store.clone(),
        transfers.clone(),
        ManagerSettings::default(),
    ));

    manager
        .enqueue(QueueEntry {
            content_id: cid(0x30),
            directory: transfers.directory(&cid(0x30)),
        })
        .await;

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.drain_queue().await }
    });
    // Let the first drain reach the import and park on the gate
    while manager.queue_len().await > 0 {
        tokio::task::yield_now().await;
    }

    let second = manager.drain_queue().await;
    assert!(second.skipped);

    store.gate.add_permits(1);
    let first = first.await.unwrap();
    assert!(!first.skipped);
    assert_eq!(first.failed, 1); // no archive on disk

    // Flag released once the first drain finished
    assert!(!manager.drain_queue().await.skipped);
}

#[tokio::test]
async fn test_shutdown_during_drain_abandons_rest() {
    let temp = tempfile::tempdir().unwrap();
    let inner = FileStore::open(temp.path().join("channels.lst"), key(ME))
        .await
        .unwrap();
    let store = Arc::new(GatedStore {
        inner,
        gate: Semaphore::new(0),
    });
    let transfers = Arc::new(FakeTransfers::new(temp.path()));
    let manager = Arc::new(ChannelManager::new(
        store.clone(),
        transfers.clone(),
        ManagerSettings::default(),
    ));

    for byte in [1u8, 2, 3] {
        manager
            .enqueue(QueueEntry {
                content_id: cid(byte),
                directory: transfers.directory(&cid(byte)),
            })
            .await;
    }

    let drain = tokio::spawn({
        let manager = manager.clone();
        async move { manager.drain_queue().await }
    });
    // First entry popped and parked on the gate
    while manager.queue_len().await > 2 {
        tokio::task::yield_now().await;
    }

    manager.shutdown().await;
    store.gate.add_permits(1);
    let report = drain.await.unwrap();

    assert_eq!(report.failed, 1); // in-flight import finished (no archive)
    assert_eq!(report.imported, 0);
    assert_eq!(report.abandoned, 2);
    assert_eq!(manager.queue_len().await, 0);
}

// =============================================================================
// Cruft collection
// =============================================================================

#[tokio::test]
async fn test_remove_cruft_channels() {
    let h = Harness::new().await;

    // Personal channel committed twice: old and new archive both transferring
    h.store.upsert(channel(ME, 0xe2, false, 2, 2)).await.unwrap();
    // Subscribed external channel, updated since its first download
    h.store.upsert(channel(1, 0x12, true, 123, 123)).await.unwrap();
    // External channel we recently unsubscribed from
    h.store.upsert(channel(2, 0x22, false, 123, 123)).await.unwrap();

    let transfers = [
        (cid(0xe1), key(ME).dir_name()),
        (cid(0xe2), key(ME).dir_name()),
        (cid(0x11), key(1).dir_name()),
        (cid(0x12), key(1).dir_name()),
        (cid(0x21), key(2).dir_name()),
        (cid(0x22), key(2).dir_name()),
        (cid(0x99), "blabla".to_string()),
    ];
    for (content_id, dir_name) in transfers {
        h.transfers.insert(content_id, dir_name, TransferStatus::Seeding);
    }

    let report = h.manager.remove_cruft_channels().await.unwrap();
    h.manager.drain_queue().await;

    let mut removed = h.transfers.removed();
    removed.sort();
    let mut expected = vec![
        (cid(0xe1), false),
        (cid(0x11), true),
        (cid(0x21), true),
        (cid(0x22), true),
        (cid(0x99), true),
    ];
    expected.sort();
    assert_eq!(removed, expected);
    assert_eq!(report.removed, 5);
    assert_eq!(report.transfers, 7);

    // Only the wanted transfers remain, and a second pass is a no-op
    let report = h.manager.remove_cruft_channels().await.unwrap();
    assert_eq!(report.transfers, 2);
    assert!(report.removals.is_empty());
}

#[tokio::test]
async fn test_cruft_never_touches_reconciled_transfer() {
    let h = Harness::new().await;
    h.store.upsert(channel(3, 0x30, true, 1, 2)).await.unwrap();

    h.manager.check_channel_updates().await.unwrap();
    let report = h.manager.remove_cruft_channels().await.unwrap();
    assert!(report.removals.is_empty());
    assert!(h.transfers.removed().is_empty());
}

#[tokio::test]
async fn test_cruft_counts_vanished_transfer_as_gone() {
    let h = Harness::new().await;
    h.store.upsert(channel(2, 0x22, false, 1, 1)).await.unwrap();
    h.transfers.insert(cid(0x22), key(2).dir_name(), TransferStatus::Seeding);
    h.transfers.vanish(cid(0x22));

    let report = h.manager.remove_cruft_channels().await.unwrap();

    assert_eq!(h.transfers.removed(), vec![(cid(0x22), true)]);
    assert_eq!(report.already_gone, 1);
    assert_eq!(report.removed, 0);
    assert_eq!(report.failed, 0);
}

// =============================================================================
// Personal channel
// =============================================================================

#[tokio::test]
async fn test_personal_channel_seeded_once() {
    let h = Harness::new().await;
    h.store.upsert(channel(ME, 0xe1, false, 1, 1)).await.unwrap();

    assert!(h.manager.ensure_personal_channel_seeding().await.unwrap());
    assert!(!h.manager.ensure_personal_channel_seeding().await.unwrap());

    let started = h.transfers.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].0, cid(0xe1));
    assert!(started[0].1.seed);

    // Already seeding: reconciliation adds nothing either
    h.manager.check_channel_updates().await.unwrap();
    assert_eq!(h.transfers.started().len(), 1);
}

#[tokio::test]
async fn test_uncommitted_personal_channel_not_seeded() {
    let h = Harness::new().await;
    assert!(!h.manager.ensure_personal_channel_seeding().await.unwrap());

    let mut record = channel(ME, 0, false, 0, 0);
    record.content_id = None;
    h.store.upsert(record).await.unwrap();
    assert!(!h.manager.ensure_personal_channel_seeding().await.unwrap());
    assert!(h.transfers.started().is_empty());
}

#[tokio::test]
async fn test_updated_personal_channel_switches_seeding() {
    let h = Harness::new().await;
    h.transfers.insert(cid(0xe1), key(ME).dir_name(), TransferStatus::Seeding);
    h.transfers.insert(cid(0x10), key(1).dir_name(), TransferStatus::Seeding);
    h.store.upsert(channel(ME, 0xe2, false, 2, 2)).await.unwrap();

    assert!(h.manager.updated_personal_channel(cid(0xe2)).await.unwrap());

    assert_eq!(h.transfers.removed(), vec![(cid(0xe1), false)]);
    let started = h.transfers.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].0, cid(0xe2));
}

#[tokio::test]
async fn test_updated_personal_channel_tolerates_vanished_old_transfer() {
    let h = Harness::new().await;
    h.store.upsert(channel(ME, 0xe2, false, 2, 2)).await.unwrap();
    h.transfers.insert(cid(0xe1), key(ME).dir_name(), TransferStatus::Seeding);
    h.transfers.vanish(cid(0xe1));

    assert!(h.manager.updated_personal_channel(cid(0xe2)).await.unwrap());
    assert_eq!(h.transfers.removed(), vec![(cid(0xe1), false)]);
    assert_eq!(h.transfers.started()[0].0, cid(0xe2));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_shutdown_clears_queue() {
    let h = Harness::new().await;
    for byte in [1u8, 2, 3] {
        h.manager
            .enqueue(QueueEntry {
                content_id: cid(byte),
                directory: h.transfers.directory(&cid(byte)),
            })
            .await;
    }

    h.manager.shutdown().await;
    assert!(h.manager.is_shutting_down());
    assert_eq!(h.manager.queue_len().await, 0);

    let report = h.manager.drain_queue().await;
    assert_eq!(report.imported + report.failed, 0);
}

#[tokio::test]
async fn test_start_seeds_personal_channel_and_stops() {
    let h = Harness::new().await;
    h.store.upsert(channel(ME, 0xe1, false, 1, 1)).await.unwrap();
    h.transfers.insert(cid(0x99), "orphan".to_string(), TransferStatus::Seeding);

    let (_tx, rx) = chansync::transfer::event_channel();
    let handle = h.manager.start(rx);

    for _ in 0..200 {
        if !h.transfers.removed().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    h.manager.shutdown().await;
    handle.await.unwrap();

    assert_eq!(h.transfers.started()[0].0, cid(0xe1));
    assert_eq!(h.transfers.removed(), vec![(cid(0x99), true)]);
}

#[tokio::test]
async fn test_restart_after_shutdown_runs_single_loop() {
    let h = Harness::new().await;

    let (_tx1, rx1) = chansync::transfer::event_channel();
    let first = h.manager.start(rx1);
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.manager.shutdown().await;
    let (_tx2, rx2) = chansync::transfer::event_channel();
    let second = h.manager.start(rx2);

    tokio::time::timeout(Duration::from_secs(2), first)
        .await
        .expect("first loop kept running after restart")
        .unwrap();
    assert!(!h.manager.is_shutting_down());
    assert!(!second.is_finished());

    h.manager.shutdown().await;
    tokio::time::timeout(Duration::from_secs(2), second)
        .await
        .expect("second loop ignored shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_second_start_supersedes_running_loop() {
    let h = Harness::new().await;

    let (_tx1, rx1) = chansync::transfer::event_channel();
    let first = h.manager.start(rx1);
    let (_tx2, rx2) = chansync::transfer::event_channel();
    let second = h.manager.start(rx2);

    tokio::time::timeout(Duration::from_secs(2), first)
        .await
        .expect("superseded loop kept running")
        .unwrap();

    h.manager.shutdown().await;
    tokio::time::timeout(Duration::from_secs(2), second)
        .await
        .expect("second loop ignored shutdown")
        .unwrap();
}
