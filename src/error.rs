use thiserror::Error;

use crate::types::{FileId, FileStatus};

/// Errors returned by queue operations.
///
/// These describe why a *request* was refused. Failures of an individual
/// file (validation, transfer, processing) never surface here: they are
/// recorded on the file itself and observed through snapshots.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Cannot {operation} file {id} while it is {status}")]
    InvalidOperation {
        id: FileId,
        status: FileStatus,
        operation: &'static str,
    },

    #[error("File not found: {0}")]
    NotFound(FileId),

    #[error("Upload queue has shut down")]
    Shutdown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Other(format!("{:#}", err))
    }
}

/// Reasons a file is rejected locally before any transfer starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{name} is empty")]
    EmptyFile { name: String },

    #[error("{name} is {size} bytes, which exceeds the {limit} byte limit")]
    TooLarge { name: String, size: u64, limit: u64 },

    #[error("{name} has an unsupported file type (allowed: {allowed})")]
    UnsupportedType { name: String, allowed: String },
}
