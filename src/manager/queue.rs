//! Processing queue for completed, not yet imported channel archives.
//!
//! FIFO, deduplicated by content id. Not persisted: the next reconciliation
//! pass rebuilds it from transfer state.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use crate::types::ContentId;

/// A completed transfer waiting to be imported
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub content_id: ContentId,
    pub directory: PathBuf,
}

#[derive(Debug, Default)]
pub struct ProcessingQueue {
    order: VecDeque<QueueEntry>,
    queued: HashSet<ContentId>,
}

impl ProcessingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless an entry for the same content id is already queued.
    /// Returns whether the entry was added.
    pub fn push(&mut self, entry: QueueEntry) -> bool {
        if !self.queued.insert(entry.content_id) {
            return false;
        }
        self.order.push_back(entry);
        true
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        let entry = self.order.pop_front()?;
        self.queued.remove(&entry.content_id);
        Some(entry)
    }

    pub fn contains(&self, content_id: &ContentId) -> bool {
        self.queued.contains(content_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.queued.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.order.iter()
    }
}
