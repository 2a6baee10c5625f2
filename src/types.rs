use std::fmt;
use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Stable identifier of a file in the queue.
///
/// Assigned at enqueue time and never reused, even after the file is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Binary content of a file plus the metadata needed to upload it.
///
/// `data` is reference counted, so cloning a payload (and therefore a
/// snapshot) never copies file contents. It is skipped when serializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub name: String,
    /// Length of `data` when the payload was built. Validation and uploads
    /// always measure `data` itself.
    pub size: u64,
    pub mime_type: String,
    #[serde(skip)]
    pub data: Bytes,
}

impl FilePayload {
    /// Create a payload, guessing the MIME type from the file name.
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let data = data.into();
        let mime_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Self {
            size: data.len() as u64,
            name,
            mime_type,
            data,
        }
    }

    /// Override the guessed MIME type (builder pattern).
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Read a file from disk into a payload.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        Ok(Self::new(name, data))
    }

    /// Lowercased extension of the file name, without the dot.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
    }
}

/// Lifecycle status of a file.
///
/// `Pending -> Uploading -> Processing -> Completed`, with `Uploading` and
/// `Processing` able to fall into `Error`. `Error -> Pending` only via retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Uploading,
    Processing,
    Completed,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Uploading => "uploading",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Error => "error",
        }
    }

    /// Holds one of the concurrency slots.
    pub fn is_active(&self) -> bool {
        matches!(self, FileStatus::Uploading | FileStatus::Processing)
    }

    /// No further automatic transition without user action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Error)
    }

    pub fn is_removable(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a file ended up in [`FileStatus::Error`].
///
/// Only used for messaging; every kind is handled the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected locally before transfer.
    Validation,
    /// Network or backend failure during upload.
    Transport,
    /// Backend accepted the upload but processing failed.
    Processing,
    /// Processing did not finish within the poll budget.
    Timeout,
    /// Cancelled by the user.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Validation => "validation",
            FailureKind::Transport => "upload",
            FailureKind::Processing => "processing",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// One tracked document and its lifecycle.
///
/// Values handed out in snapshots are copies; mutating them has no effect
/// on the queue. Only the orchestrator applies transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileItem {
    pub id: FileId,
    pub payload: FilePayload,
    pub status: FileStatus,
    /// Upload percentage. Only meaningful while `Uploading`.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_created: Option<u32>,
    /// Backend handle returned by a successful upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Zero-based retry counter.
    pub attempt: u32,
    /// Admission order among pending files. Renewed on retry, so a retried
    /// file waits behind everything already pending without moving in the list.
    #[serde(skip)]
    pub(crate) queue_seq: u64,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileItem {
    pub(crate) fn new(payload: FilePayload, queue_seq: u64) -> Self {
        let now = Utc::now();
        Self {
            id: FileId::new(),
            payload,
            status: FileStatus::Pending,
            progress: 0,
            error: None,
            error_kind: None,
            chunks_created: None,
            document_id: None,
            attempt: 0,
            queue_seq,
            enqueued_at: now,
            updated_at: now,
        }
    }

    /// Upload progress, or `None` outside of `Uploading`.
    pub fn upload_progress(&self) -> Option<u8> {
        (self.status == FileStatus::Uploading).then_some(self.progress)
    }

    pub(crate) fn start_upload(&mut self) {
        self.status = FileStatus::Uploading;
        self.progress = 0;
        self.touch();
    }

    /// Returns `true` if the visible progress changed.
    pub(crate) fn record_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent <= self.progress {
            return false;
        }
        self.progress = percent;
        self.touch();
        true
    }

    pub(crate) fn mark_processing(&mut self, document_id: String) {
        self.status = FileStatus::Processing;
        self.progress = 100;
        self.document_id = Some(document_id);
        self.touch();
    }

    pub(crate) fn mark_completed(&mut self, chunks_created: u32) {
        self.status = FileStatus::Completed;
        self.chunks_created = Some(chunks_created);
        self.touch();
    }

    pub(crate) fn mark_failed(&mut self, kind: FailureKind, error: String) {
        self.status = FileStatus::Error;
        self.error = Some(error);
        self.error_kind = Some(kind);
        self.touch();
    }

    pub(crate) fn reset_for_retry(&mut self, queue_seq: u64) {
        self.status = FileStatus::Pending;
        self.queue_seq = queue_seq;
        self.progress = 0;
        self.error = None;
        self.error_kind = None;
        self.chunks_created = None;
        self.document_id = None;
        self.attempt += 1;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
