use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::FilePayload;

/// Token returned by the backend once it has accepted an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub document_id: String,
}

impl UploadReceipt {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
        }
    }
}

/// Backend processing state of an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ProcessingStatus {
    InProgress,
    #[serde(rename_all = "camelCase")]
    Done {
        chunks_created: u32,
    },
    Failed {
        reason: String,
    },
}

/// Receives upload progress as integer percentages (0-100).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, percent: u8);
}

/// Reporter that discards everything, for transports used outside the queue.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _percent: u8) {}
}

/// Moves bytes to the ingestion backend and asks it how processing is going.
///
/// Implementations return `anyhow` errors; the queue turns them into a
/// failed file with the formatted error chain as its message, so include
/// enough context to be useful to a user.
///
/// # Example
///
/// ```ignore
/// use upload_queue::*;
///
/// struct LocalBackend;
///
/// impl Transport for LocalBackend {
///     async fn upload(
///         &self,
///         payload: &FilePayload,
///         progress: Arc<dyn ProgressReporter>,
///     ) -> anyhow::Result<UploadReceipt> {
///         progress.report(100);
///         Ok(UploadReceipt::new(payload.name.clone()))
///     }
///
///     async fn poll_status(&self, _receipt: &UploadReceipt) -> anyhow::Result<ProcessingStatus> {
///         Ok(ProcessingStatus::Done { chunks_created: 1 })
///     }
/// }
/// ```
pub trait Transport: Send + Sync + 'static {
    /// Upload one file, reporting progress along the way.
    fn upload(
        &self,
        payload: &FilePayload,
        progress: Arc<dyn ProgressReporter>,
    ) -> impl Future<Output = anyhow::Result<UploadReceipt>> + Send;

    /// Query processing status for a previously uploaded file.
    fn poll_status(
        &self,
        receipt: &UploadReceipt,
    ) -> impl Future<Output = anyhow::Result<ProcessingStatus>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn upload(
        &self,
        payload: &FilePayload,
        progress: Arc<dyn ProgressReporter>,
    ) -> impl Future<Output = anyhow::Result<UploadReceipt>> + Send {
        (**self).upload(payload, progress)
    }

    fn poll_status(
        &self,
        receipt: &UploadReceipt,
    ) -> impl Future<Output = anyhow::Result<ProcessingStatus>> + Send {
        (**self).poll_status(receipt)
    }
}
