//! Draining the processing queue into the metadata store.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::ChannelManager;

/// Outcome of one drain
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Another drain was already running; nothing was done
    pub skipped: bool,
    pub imported: usize,
    pub failed: usize,
    /// Entries left behind because of shutdown
    pub abandoned: usize,
}

/// Clears the in-flight flag when the drain ends, however it ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ChannelManager {
    /// Import every queued archive.
    ///
    /// Each entry leaves the queue whether its import succeeds or not; a
    /// failed import is logged and not retried. Only one drain runs at a
    /// time, a concurrent call returns a skipped report immediately.
    pub async fn drain_queue(&self) -> DrainReport {
        if self.draining.swap(true, Ordering::AcqRel) {
            debug!("Queue drain already in progress");
            return DrainReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _guard = DrainGuard(&self.draining);

        let mut report = DrainReport::default();
        loop {
            if self.is_shutting_down() {
                let mut queue = self.queue.lock().await;
                report.abandoned = queue.len();
                queue.clear();
                if report.abandoned > 0 {
                    info!(abandoned = report.abandoned, "Queue drain stopped by shutdown");
                }
                break;
            }

            let Some(entry) = self.queue.lock().await.pop() else {
                break;
            };

            match self
                .store
                .process_channel_dir(&entry.content_id, &entry.directory)
                .await
            {
                Ok(record) => {
                    info!(
                        public_key = %record.public_key,
                        content_id = %entry.content_id,
                        local_version = record.local_version,
                        "Imported channel"
                    );
                    report.imported += 1;
                }
                Err(e) => {
                    warn!(
                        content_id = %entry.content_id,
                        path = %entry.directory.display(),
                        error = %e,
                        "Failed to import channel, dropping"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }
}
