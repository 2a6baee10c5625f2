//! Immutable queue snapshots and the read-side projections built on them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::QueueError;
use crate::types::{FileId, FileItem, FileStatus};

/// Point-in-time view of the queue, in insertion order.
///
/// Every applied transition publishes a new snapshot with a higher
/// `version`, so readers can skip work by comparing versions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub version: u64,
    pub items: Arc<[FileItem]>,
}

impl Default for QueueSnapshot {
    fn default() -> Self {
        Self::new(0, &[])
    }
}

impl QueueSnapshot {
    pub(crate) fn new(version: u64, items: &[FileItem]) -> Self {
        Self {
            version,
            items: items.into(),
        }
    }

    pub fn get(&self, id: FileId) -> Option<&FileItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileItem> {
        self.items.iter()
    }

    pub fn with_status(&self, status: FileStatus) -> impl Iterator<Item = &FileItem> {
        self.items.iter().filter(move |item| item.status == status)
    }

    /// Per-status counts, recomputed on every call.
    pub fn counts(&self) -> StatusCounts {
        StatusCounts::from_items(&self.items)
    }
}

/// Number of files in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: usize,
    pub uploading: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn from_items(items: &[FileItem]) -> Self {
        items.iter().fold(Self::default(), |mut counts, item| {
            match item.status {
                FileStatus::Pending => counts.pending += 1,
                FileStatus::Uploading => counts.uploading += 1,
                FileStatus::Processing => counts.processing += 1,
                FileStatus::Completed => counts.completed += 1,
                FileStatus::Error => counts.error += 1,
            }
            counts
        })
    }

    pub fn total(&self) -> usize {
        self.pending + self.uploading + self.processing + self.completed + self.error
    }

    /// Files holding a transfer slot.
    pub fn active(&self) -> usize {
        self.uploading + self.processing
    }

    /// Nothing is waiting or in flight.
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.active() == 0
    }

    /// Share of files that reached a terminal state, as a percentage.
    pub fn overall_progress(&self) -> u8 {
        let total = self.total();
        if total == 0 {
            return 100;
        }
        ((self.completed + self.error) * 100 / total) as u8
    }
}

/// Read handle that follows the latest published snapshot.
///
/// All subscribers share one `watch` channel, so no subscriber can see an
/// older snapshot after another has seen a newer one.
#[derive(Debug, Clone)]
pub struct SnapshotSubscriber {
    rx: watch::Receiver<QueueSnapshot>,
}

impl SnapshotSubscriber {
    pub(crate) fn new(rx: watch::Receiver<QueueSnapshot>) -> Self {
        Self { rx }
    }

    /// The most recently published snapshot.
    pub fn current(&self) -> QueueSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait for a snapshot newer than the last one this subscriber saw.
    pub async fn changed(&mut self) -> Result<QueueSnapshot, QueueError> {
        self.rx.changed().await.map_err(|_| QueueError::Shutdown)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait until a snapshot satisfies `predicate`, checking the current one first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Result<QueueSnapshot, QueueError>
    where
        F: FnMut(&QueueSnapshot) -> bool,
    {
        let snapshot = self
            .rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| QueueError::Shutdown)?;
        Ok(snapshot.clone())
    }
}
