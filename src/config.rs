use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backend limit on accepted document size (50 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Document types the ingestion backend accepts.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["pdf", "txt", "docx", "doc"];

/// Configuration for the upload queue.
///
/// Use [`QueueConfig::builder()`] for ergonomic construction, or
/// [`QueueConfig::default()`] for the defaults (3 concurrent transfers,
/// 2s poll interval, 5 minute processing budget).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum files in `uploading` or `processing` at once. Never below 1.
    pub concurrency_limit: usize,

    /// Delay between processing status polls.
    pub poll_interval: Duration,

    /// Maximum number of status polls before a file is failed with a timeout.
    pub max_poll_attempts: u32,

    /// Wall-clock budget for the whole processing phase.
    pub processing_timeout: Duration,

    /// Largest accepted file in bytes. `None` leaves the limit to the backend.
    pub max_file_size: Option<u64>,

    /// Accepted extensions, compared case-insensitively. Empty accepts anything.
    pub allowed_extensions: Vec<String>,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 3,
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: 150,
            processing_timeout: Duration::from_secs(300),
            max_file_size: Some(DEFAULT_MAX_FILE_SIZE),
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            event_capacity: 100,
        }
    }
}

impl QueueConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::default()
    }

    /// The concurrency limit with the lower bound applied.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency_limit.max(1)
    }
}

/// Builder for [`QueueConfig`].
#[derive(Default)]
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl QueueConfigBuilder {
    /// Set how many files may transfer or process at the same time.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.config.concurrency_limit = limit;
        self
    }

    /// Set the delay between processing status polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the maximum number of status polls per file.
    pub fn with_max_poll_attempts(mut self, attempts: u32) -> Self {
        self.config.max_poll_attempts = attempts;
        self
    }

    /// Set the wall-clock budget for processing.
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.config.processing_timeout = timeout;
        self
    }

    /// Reject files larger than `bytes` before uploading.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = Some(bytes);
        self
    }

    /// Do not enforce a size limit locally.
    pub fn without_size_limit(mut self) -> Self {
        self.config.max_file_size = None;
        self
    }

    /// Replace the accepted extensions. A leading dot is ignored.
    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Accept files of any type.
    pub fn allow_any_extension(mut self) -> Self {
        self.config.allowed_extensions.clear();
        self
    }

    /// Set the capacity of the event broadcast channel.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Build the final [`QueueConfig`].
    pub fn build(mut self) -> QueueConfig {
        self.config.concurrency_limit = self.config.effective_concurrency();
        self.config.event_capacity = self.config.event_capacity.max(1);
        self.config
    }
}
