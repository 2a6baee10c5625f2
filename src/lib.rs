//! # Upload Queue
//!
//! Bounded-concurrency upload queue for document ingestion backends.
//!
//! ## Features
//!
//! - FIFO admission with a configurable concurrency limit (default 3)
//! - Per-file lifecycle: pending, uploading, processing, completed, error
//! - Upload progress and backend processing status polling
//! - Retry, cancel and remove per file; failures never stop the queue
//! - Versioned snapshots for any number of readers, plus a push event stream
//! - reqwest-based HTTP transport with bearer token support
//!
//! ## Quick Start
//!
//! 1. Pick a [`Transport`] ([`HttpTransport`] or your own implementation)
//! 2. Create an [`UploadQueue`] with a [`QueueConfig`]
//! 3. Add files with [`UploadQueue::enqueue()`]
//! 4. Render from [`UploadQueue::subscribe()`] or [`UploadQueue::events()`]
//!
//! See the `demos/` directory for complete usage examples.

pub mod admission;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
mod orchestrator;
pub mod queue;
pub mod snapshot;
pub mod transport;
pub mod types;
pub mod validation;
mod worker;

pub use config::{QueueConfig, QueueConfigBuilder};
pub use error::{QueueError, ValidationError};
pub use events::{EventBroadcaster, QueueEvent};
pub use http::{
    CredentialProvider, HttpError, HttpTransport, HttpTransportConfig, StaticCredentials,
    TokenHolder,
};
pub use queue::UploadQueue;
pub use snapshot::{QueueSnapshot, SnapshotSubscriber, StatusCounts};
pub use transport::{NoopProgress, ProcessingStatus, ProgressReporter, Transport, UploadReceipt};
pub use types::{FailureKind, FileId, FileItem, FilePayload, FileStatus};
