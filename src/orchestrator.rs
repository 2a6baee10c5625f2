//! The single task that owns queue state.
//!
//! Commands from [`UploadQueue`](crate::UploadQueue) handles and reports from
//! transfer tasks are funnelled through one loop, so every transition is
//! applied in isolation. After each applied transition the orchestrator
//! publishes a new snapshot, then replies to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::admission::AdmissionController;
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::events::{EventBroadcaster, QueueEvent};
use crate::snapshot::QueueSnapshot;
use crate::transport::Transport;
use crate::types::{FailureKind, FileId, FileItem, FilePayload, FileStatus};
use crate::validation::Validator;
use crate::worker::{self, TransferOutcome, TransferReport};

const CANCELLED_MESSAGE: &str = "Cancelled by user";

pub(crate) enum Command {
    Enqueue {
        files: Vec<FilePayload>,
        reply: oneshot::Sender<Vec<FileId>>,
    },
    Remove {
        id: FileId,
        reply: oneshot::Sender<Result<(), QueueError>>,
    },
    Retry {
        id: FileId,
        reply: oneshot::Sender<Result<(), QueueError>>,
    },
    Cancel {
        id: FileId,
        reply: oneshot::Sender<Result<(), QueueError>>,
    },
    ClearCompleted {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Message {
    Report(TransferReport),
    Command(Option<Command>),
}

pub(crate) struct Orchestrator<T: Transport> {
    config: Arc<QueueConfig>,
    transport: Arc<T>,
    validator: Validator,
    admission: AdmissionController,
    items: Vec<FileItem>,
    transfers: HashMap<FileId, JoinHandle<()>>,
    version: u64,
    queue_seq: u64,
    snapshots: watch::Sender<QueueSnapshot>,
    events: EventBroadcaster,
    reports_tx: mpsc::UnboundedSender<TransferReport>,
    reports_rx: mpsc::UnboundedReceiver<TransferReport>,
}

impl<T: Transport> Orchestrator<T> {
    pub(crate) fn new(
        config: Arc<QueueConfig>,
        transport: Arc<T>,
        snapshots: watch::Sender<QueueSnapshot>,
        events: EventBroadcaster,
    ) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            validator: Validator::from_config(&config),
            admission: AdmissionController::new(config.effective_concurrency()),
            config,
            transport,
            items: Vec::new(),
            transfers: HashMap::new(),
            version: 0,
            queue_seq: 0,
            snapshots,
            events,
            reports_tx,
            reports_rx,
        }
    }

    /// Run until shut down or until every queue handle is dropped.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(
            concurrency = self.admission.limit(),
            "Upload queue started"
        );

        loop {
            let message = tokio::select! {
                biased;
                Some(report) = self.reports_rx.recv() => Message::Report(report),
                command = commands.recv() => Message::Command(command),
            };

            match message {
                Message::Report(report) => self.handle_report(report),
                Message::Command(Some(command)) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Message::Command(None) => {
                    debug!("All queue handles dropped");
                    self.abort_transfers();
                    break;
                }
            }
        }

        info!("Upload queue stopped");
    }

    /// Returns `false` once the queue should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Enqueue { files, reply } => {
                let ids = self.enqueue(files);
                let _ = reply.send(ids);
            }
            Command::Remove { id, reply } => {
                let _ = reply.send(self.remove(id));
            }
            Command::Retry { id, reply } => {
                let _ = reply.send(self.retry(id));
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(id));
            }
            Command::ClearCompleted { reply } => {
                let _ = reply.send(self.clear_completed());
            }
            Command::Shutdown { reply } => {
                self.abort_transfers();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn enqueue(&mut self, files: Vec<FilePayload>) -> Vec<FileId> {
        let mut ids = Vec::with_capacity(files.len());

        for payload in files {
            let mut item = FileItem::new(payload, self.next_queue_seq());
            self.events.send(QueueEvent::FileAdded {
                file_id: item.id,
                filename: item.payload.name.clone(),
            });

            if let Err(e) = self.validator.validate(&item.payload) {
                warn!(file_id = %item.id, "Rejected {}", e);
                item.mark_failed(FailureKind::Validation, e.to_string());
                self.events.send(QueueEvent::FileFailed {
                    file_id: item.id,
                    kind: FailureKind::Validation,
                    error: e.to_string(),
                });
            } else {
                debug!(file_id = %item.id, filename = %item.payload.name, "Queued");
            }

            ids.push(item.id);
            self.items.push(item);
        }

        if !ids.is_empty() {
            self.admit_pending();
            self.publish();
        }
        ids
    }

    fn remove(&mut self, id: FileId) -> Result<(), QueueError> {
        let index = self.position(id)?;
        let status = self.items[index].status;
        if !status.is_removable() {
            warn!(file_id = %id, %status, "Refusing to remove an active file");
            return Err(QueueError::InvalidOperation {
                id,
                status,
                operation: "remove",
            });
        }

        self.items.remove(index);
        debug!(file_id = %id, "Removed");
        self.events.send(QueueEvent::FileRemoved { file_id: id });
        self.publish();
        Ok(())
    }

    fn retry(&mut self, id: FileId) -> Result<(), QueueError> {
        let index = self.position(id)?;
        let status = self.items[index].status;
        if status != FileStatus::Error {
            return Err(QueueError::InvalidOperation {
                id,
                status,
                operation: "retry",
            });
        }

        let queue_seq = self.next_queue_seq();
        let item = &mut self.items[index];
        item.reset_for_retry(queue_seq);
        info!(file_id = %id, attempt = item.attempt, "Retrying");
        self.events.send(QueueEvent::FileRetried {
            file_id: id,
            attempt: item.attempt,
        });

        // Files are re-checked so a rejected file never reaches the transport.
        if let Err(e) = self.validator.validate(&item.payload) {
            warn!(file_id = %id, "Rejected {}", e);
            item.mark_failed(FailureKind::Validation, e.to_string());
            self.events.send(QueueEvent::FileFailed {
                file_id: id,
                kind: FailureKind::Validation,
                error: e.to_string(),
            });
        }

        self.admit_pending();
        self.publish();
        Ok(())
    }

    fn cancel(&mut self, id: FileId) -> Result<(), QueueError> {
        let index = self.position(id)?;
        let status = self.items[index].status;
        if status.is_terminal() {
            return Err(QueueError::InvalidOperation {
                id,
                status,
                operation: "cancel",
            });
        }

        if let Some(handle) = self.transfers.remove(&id) {
            handle.abort();
        }
        info!(file_id = %id, %status, "Cancelled");
        self.fail(index, FailureKind::Cancelled, CANCELLED_MESSAGE.to_string());
        Ok(())
    }

    fn clear_completed(&mut self) -> usize {
        let mut removed = Vec::new();
        self.items.retain(|item| {
            let keep = item.status != FileStatus::Completed;
            if !keep {
                removed.push(item.id);
            }
            keep
        });

        for file_id in &removed {
            self.events.send(QueueEvent::FileRemoved { file_id: *file_id });
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "Cleared completed files");
            self.publish();
        }
        removed.len()
    }

    fn handle_report(&mut self, report: TransferReport) {
        let TransferReport {
            id,
            attempt,
            outcome,
        } = report;

        let Some(index) = self.items.iter().position(|item| item.id == id) else {
            debug!(file_id = %id, "Dropping report for removed file");
            return;
        };
        if self.items[index].attempt != attempt {
            debug!(file_id = %id, attempt, "Dropping report from a previous attempt");
            return;
        }

        match (self.items[index].status, outcome) {
            (FileStatus::Uploading, TransferOutcome::Progress(percent)) => {
                if self.items[index].record_progress(percent) {
                    self.events.send(QueueEvent::FileProgress {
                        file_id: id,
                        progress: percent.min(100),
                    });
                    self.publish();
                }
            }
            (FileStatus::Uploading, TransferOutcome::Uploaded(receipt)) => {
                debug!(file_id = %id, document_id = %receipt.document_id, "Processing");
                self.events.send(QueueEvent::FileProcessing {
                    file_id: id,
                    document_id: receipt.document_id.clone(),
                });
                self.items[index].mark_processing(receipt.document_id);
                self.publish();
            }
            (FileStatus::Uploading, TransferOutcome::UploadFailed(error))
            | (FileStatus::Uploading, TransferOutcome::Crashed(error)) => {
                self.fail(index, FailureKind::Transport, error);
            }
            (FileStatus::Processing, TransferOutcome::Processed { chunks_created }) => {
                info!(file_id = %id, chunks_created, "Completed");
                self.items[index].mark_completed(chunks_created);
                self.transfers.remove(&id);
                self.admission.release();
                self.events.send(QueueEvent::FileCompleted {
                    file_id: id,
                    chunks_created,
                });
                self.admit_pending();
                self.publish();
            }
            (FileStatus::Processing, TransferOutcome::ProcessingFailed(error))
            | (FileStatus::Processing, TransferOutcome::Crashed(error)) => {
                self.fail(index, FailureKind::Processing, error);
            }
            (FileStatus::Processing, TransferOutcome::TimedOut(error)) => {
                self.fail(index, FailureKind::Timeout, error);
            }
            (status, outcome) => {
                debug!(file_id = %id, %status, ?outcome, "Ignoring report");
            }
        }
    }

    /// Move a file into `Error`, releasing its slot if it held one.
    fn fail(&mut self, index: usize, kind: FailureKind, error: String) {
        let item = &mut self.items[index];
        let id = item.id;
        let was_active = item.status.is_active();

        warn!(file_id = %id, %kind, "Failed: {}", error);
        item.mark_failed(kind, error.clone());

        if was_active {
            self.transfers.remove(&id);
            self.admission.release();
        }
        self.events.send(QueueEvent::FileFailed {
            file_id: id,
            kind,
            error,
        });

        self.admit_pending();
        self.publish();
    }

    /// Promote pending files, longest-waiting first, while slots are free.
    fn admit_pending(&mut self) {
        while let Some(index) = self.admission.next_candidate(&self.items) {
            self.admission.acquire();

            let item = &mut self.items[index];
            item.start_upload();
            info!(
                file_id = %item.id,
                attempt = item.attempt,
                filename = %item.payload.name,
                "Starting upload"
            );

            let handle = worker::spawn_transfer(
                Arc::clone(&self.transport),
                item.payload.clone(),
                item.id,
                item.attempt,
                Arc::clone(&self.config),
                self.reports_tx.clone(),
            );
            self.transfers.insert(item.id, handle);
            self.events.send(QueueEvent::FileStarted {
                file_id: item.id,
                attempt: item.attempt,
            });
        }

        debug_assert_eq!(
            self.admission.active(),
            self.items.iter().filter(|item| item.status.is_active()).count(),
            "slot count out of sync with active files"
        );
    }

    fn next_queue_seq(&mut self) -> u64 {
        self.queue_seq += 1;
        self.queue_seq
    }

    fn publish(&mut self) {
        self.version += 1;
        self.snapshots
            .send_replace(QueueSnapshot::new(self.version, &self.items));
    }

    fn position(&self, id: FileId) -> Result<usize, QueueError> {
        self.items
            .iter()
            .position(|item| item.id == id)
            .ok_or(QueueError::NotFound(id))
    }

    fn abort_transfers(&mut self) {
        for (id, handle) in self.transfers.drain() {
            debug!(file_id = %id, "Aborting transfer");
            handle.abort();
        }
    }
}
