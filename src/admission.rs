//! Concurrency admission for file transfers.

use crate::types::{FileItem, FileStatus};

/// Bounds the number of files holding a transfer slot.
///
/// A slot is held from admission (`pending -> uploading`) until the file
/// leaves `uploading`/`processing`. The controller only counts; the caller
/// must pair every [`acquire`](Self::acquire) with one [`release`](Self::release).
#[derive(Debug, Clone)]
pub struct AdmissionController {
    limit: usize,
    active: usize,
}

impl AdmissionController {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            active: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn has_capacity(&self) -> bool {
        self.active < self.limit
    }

    /// Index of the next file to admit: the pending file that has waited
    /// longest, provided a slot is free.
    pub fn next_candidate(&self, items: &[FileItem]) -> Option<usize> {
        if !self.has_capacity() {
            return None;
        }
        items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status == FileStatus::Pending)
            .min_by_key(|(_, item)| item.queue_seq)
            .map(|(index, _)| index)
    }

    pub fn acquire(&mut self) {
        debug_assert!(self.has_capacity(), "acquired a slot beyond the limit");
        self.active += 1;
    }

    pub fn release(&mut self) {
        debug_assert!(self.active > 0, "released a slot that was never acquired");
        self.active = self.active.saturating_sub(1);
    }
}
