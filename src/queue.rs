use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::events::{EventBroadcaster, QueueEvent};
use crate::orchestrator::{Command, Orchestrator};
use crate::snapshot::{QueueSnapshot, SnapshotSubscriber, StatusCounts};
use crate::transport::Transport;
use crate::types::{FileId, FileItem, FilePayload};

/// Handle to a running upload queue.
///
/// Cheap to clone; every clone talks to the same orchestrator task. The
/// queue keeps running until [`shutdown`](Self::shutdown) is called or the
/// last handle is dropped.
///
/// Mutating calls resolve after the orchestrator has applied them, so the
/// snapshot read right after `enqueue(..).await` already reflects the new
/// files and any admissions they triggered.
#[derive(Clone)]
pub struct UploadQueue {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<QueueSnapshot>,
    events: EventBroadcaster,
    config: Arc<QueueConfig>,
}

impl UploadQueue {
    /// Start a queue on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new<T: Transport>(config: QueueConfig, transport: T) -> Self {
        let config = Arc::new(config);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshots) = watch::channel(QueueSnapshot::default());
        let events = EventBroadcaster::new(config.event_capacity);

        let orchestrator = Orchestrator::new(
            Arc::clone(&config),
            Arc::new(transport),
            snapshot_tx,
            events.clone(),
        );
        tokio::spawn(orchestrator.run(command_rx));

        Self {
            commands,
            snapshots,
            events,
            config,
        }
    }

    /// Start a queue with the default configuration.
    pub fn with_defaults<T: Transport>(transport: T) -> Self {
        Self::new(QueueConfig::default(), transport)
    }

    /// Add files to the end of the queue, returning their ids in call order.
    ///
    /// Files that fail local validation are still added, directly in the
    /// `error` state.
    pub async fn enqueue<I>(&self, files: I) -> Result<Vec<FileId>, QueueError>
    where
        I: IntoIterator<Item = FilePayload>,
    {
        let files: Vec<FilePayload> = files.into_iter().collect();
        self.request(|reply| Command::Enqueue { files, reply }).await
    }

    /// Add a single file.
    pub async fn enqueue_one(&self, file: FilePayload) -> Result<FileId, QueueError> {
        let ids = self.enqueue(std::iter::once(file)).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| QueueError::Other("Enqueue returned no id".to_string()))
    }

    /// Remove a pending, completed or failed file.
    ///
    /// Files that are uploading or processing are refused; use
    /// [`cancel`](Self::cancel) first.
    pub async fn remove(&self, id: FileId) -> Result<(), QueueError> {
        self.request(|reply| Command::Remove { id, reply }).await?
    }

    /// Put a failed file back at the end of the queue.
    pub async fn retry(&self, id: FileId) -> Result<(), QueueError> {
        self.request(|reply| Command::Retry { id, reply }).await?
    }

    /// Stop a pending or in-flight file. It ends up in `error` and can be
    /// retried or removed.
    pub async fn cancel(&self, id: FileId) -> Result<(), QueueError> {
        self.request(|reply| Command::Cancel { id, reply }).await?
    }

    /// Drop every completed file, returning how many were removed.
    pub async fn clear_completed(&self) -> Result<usize, QueueError> {
        self.request(|reply| Command::ClearCompleted { reply }).await
    }

    /// Abort in-flight transfers and stop the orchestrator.
    ///
    /// Later calls on any handle return [`QueueError::Shutdown`].
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> QueueSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Follow snapshots as they are published.
    pub fn subscribe(&self) -> SnapshotSubscriber {
        SnapshotSubscriber::new(self.snapshots.clone())
    }

    /// Receive per-transition events.
    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn counts(&self) -> StatusCounts {
        self.snapshots.borrow().counts()
    }

    pub fn get(&self, id: FileId) -> Option<FileItem> {
        self.snapshots.borrow().get(id).cloned()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Whether the orchestrator is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, QueueError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| QueueError::Shutdown)?;
        response.await.map_err(|_| QueueError::Shutdown)
    }
}
