//! Per-transition events for frontends that prefer a push stream over
//! snapshot diffing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{FailureKind, FileId};

/// Event names for bridging to a frontend event bus.
pub mod event_names {
    pub const FILE_ADDED: &str = "upload:file_added";
    pub const FILE_STARTED: &str = "upload:file_started";
    pub const FILE_PROGRESS: &str = "upload:file_progress";
    pub const FILE_PROCESSING: &str = "upload:file_processing";
    pub const FILE_COMPLETED: &str = "upload:file_completed";
    pub const FILE_FAILED: &str = "upload:file_failed";
    pub const FILE_RETRIED: &str = "upload:file_retried";
    pub const FILE_REMOVED: &str = "upload:file_removed";
}

/// A single applied transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueueEvent {
    #[serde(rename_all = "camelCase")]
    FileAdded { file_id: FileId, filename: String },

    #[serde(rename_all = "camelCase")]
    FileStarted { file_id: FileId, attempt: u32 },

    #[serde(rename_all = "camelCase")]
    FileProgress { file_id: FileId, progress: u8 },

    #[serde(rename_all = "camelCase")]
    FileProcessing { file_id: FileId, document_id: String },

    #[serde(rename_all = "camelCase")]
    FileCompleted { file_id: FileId, chunks_created: u32 },

    #[serde(rename_all = "camelCase")]
    FileFailed {
        file_id: FileId,
        kind: FailureKind,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    FileRetried { file_id: FileId, attempt: u32 },

    #[serde(rename_all = "camelCase")]
    FileRemoved { file_id: FileId },
}

impl QueueEvent {
    pub fn file_id(&self) -> FileId {
        match self {
            QueueEvent::FileAdded { file_id, .. }
            | QueueEvent::FileStarted { file_id, .. }
            | QueueEvent::FileProgress { file_id, .. }
            | QueueEvent::FileProcessing { file_id, .. }
            | QueueEvent::FileCompleted { file_id, .. }
            | QueueEvent::FileFailed { file_id, .. }
            | QueueEvent::FileRetried { file_id, .. }
            | QueueEvent::FileRemoved { file_id } => *file_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::FileAdded { .. } => event_names::FILE_ADDED,
            QueueEvent::FileStarted { .. } => event_names::FILE_STARTED,
            QueueEvent::FileProgress { .. } => event_names::FILE_PROGRESS,
            QueueEvent::FileProcessing { .. } => event_names::FILE_PROCESSING,
            QueueEvent::FileCompleted { .. } => event_names::FILE_COMPLETED,
            QueueEvent::FileFailed { .. } => event_names::FILE_FAILED,
            QueueEvent::FileRetried { .. } => event_names::FILE_RETRIED,
            QueueEvent::FileRemoved { .. } => event_names::FILE_REMOVED,
        }
    }
}

/// Fans queue events out to any number of listeners.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: Arc<broadcast::Sender<QueueEvent>>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: QueueEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_receivers() {
        let broadcaster = EventBroadcaster::default();
        broadcaster.send(QueueEvent::FileRemoved {
            file_id: FileId::new(),
        });
    }

    #[test]
    fn test_send_receive() {
        let broadcaster = EventBroadcaster::new(4);
        let mut rx = broadcaster.subscribe();
        let file_id = FileId::new();

        broadcaster.send(QueueEvent::FileProgress {
            file_id,
            progress: 42,
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.file_id(), file_id);
        assert_eq!(event.name(), event_names::FILE_PROGRESS);
    }

    #[test]
    fn test_event_serialization() {
        let file_id = FileId::new();
        let event = QueueEvent::FileFailed {
            file_id,
            kind: FailureKind::Timeout,
            error: "Processing timed out".into(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "fileFailed");
        assert_eq!(json["fileId"], file_id.to_string());
        assert_eq!(json["kind"], "timeout");
    }
}
