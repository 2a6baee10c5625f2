//! Per-file transfer task: upload, then poll processing status until the
//! backend settles or the poll budget runs out.
//!
//! The task never touches queue state. Everything it learns is sent back to
//! the orchestrator as a [`TransferReport`] tagged with the attempt it
//! belongs to.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::config::QueueConfig;
use crate::transport::{ProcessingStatus, ProgressReporter, Transport, UploadReceipt};
use crate::types::{FileId, FilePayload};

#[derive(Debug)]
pub(crate) struct TransferReport {
    pub id: FileId,
    pub attempt: u32,
    pub outcome: TransferOutcome,
}

#[derive(Debug)]
pub(crate) enum TransferOutcome {
    Progress(u8),
    Uploaded(UploadReceipt),
    UploadFailed(String),
    Processed { chunks_created: u32 },
    ProcessingFailed(String),
    TimedOut(String),
    /// The task panicked; the message is the panic payload.
    Crashed(String),
}

/// Forwards transport progress into the orchestrator channel, dropping
/// values that would not move the bar forward.
struct ChannelProgress {
    id: FileId,
    attempt: u32,
    last: AtomicU8,
    tx: mpsc::UnboundedSender<TransferReport>,
}

impl ProgressReporter for ChannelProgress {
    fn report(&self, percent: u8) {
        let percent = percent.min(100);
        let previous = self.last.fetch_max(percent, Ordering::Relaxed);
        if percent > previous {
            let _ = self.tx.send(TransferReport {
                id: self.id,
                attempt: self.attempt,
                outcome: TransferOutcome::Progress(percent),
            });
        }
    }
}

/// Spawn the transfer for one admitted file.
///
/// A panic inside the transport is caught and reported as
/// [`TransferOutcome::Crashed`] so the slot is always released.
pub(crate) fn spawn_transfer<T: Transport>(
    transport: Arc<T>,
    payload: FilePayload,
    id: FileId,
    attempt: u32,
    config: Arc<QueueConfig>,
    tx: mpsc::UnboundedSender<TransferReport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let run = AssertUnwindSafe(run_transfer(
            transport.as_ref(),
            &payload,
            id,
            attempt,
            &config,
            &tx,
        ))
        .catch_unwind();

        if let Err(panic) = run.await {
            let detail = panic_message(panic.as_ref());
            error!(file_id = %id, attempt, "Transfer task panicked: {}", detail);
            let _ = tx.send(TransferReport {
                id,
                attempt,
                outcome: TransferOutcome::Crashed(format!("Transfer aborted: {}", detail)),
            });
        }
    })
}

async fn run_transfer<T: Transport>(
    transport: &T,
    payload: &FilePayload,
    id: FileId,
    attempt: u32,
    config: &QueueConfig,
    tx: &mpsc::UnboundedSender<TransferReport>,
) {
    let report = |outcome: TransferOutcome| {
        let _ = tx.send(TransferReport {
            id,
            attempt,
            outcome,
        });
    };

    let progress: Arc<dyn ProgressReporter> = Arc::new(ChannelProgress {
        id,
        attempt,
        last: AtomicU8::new(0),
        tx: tx.clone(),
    });

    debug!(file_id = %id, attempt, filename = %payload.name, size = payload.data.len(), "Uploading");

    let receipt = match transport.upload(payload, progress).await {
        Ok(receipt) => receipt,
        Err(e) => {
            report(TransferOutcome::UploadFailed(format!("{:#}", e)));
            return;
        }
    };

    debug!(file_id = %id, document_id = %receipt.document_id, "Upload accepted, polling processing status");
    report(TransferOutcome::Uploaded(receipt.clone()));

    let outcome = match tokio::time::timeout(
        config.processing_timeout,
        poll_until_settled(transport, &receipt, id, config),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => TransferOutcome::TimedOut(format!(
            "Processing did not finish within {}s",
            config.processing_timeout.as_secs()
        )),
    };
    report(outcome);
}

async fn poll_until_settled<T: Transport>(
    transport: &T,
    receipt: &UploadReceipt,
    id: FileId,
    config: &QueueConfig,
) -> TransferOutcome {
    let mut last_error: Option<String> = None;

    for check in 1..=config.max_poll_attempts {
        tokio::time::sleep(config.poll_interval).await;

        match transport.poll_status(receipt).await {
            Ok(ProcessingStatus::InProgress) => {
                trace!(file_id = %id, check, "Still processing");
            }
            Ok(ProcessingStatus::Done { chunks_created }) => {
                return TransferOutcome::Processed { chunks_created };
            }
            Ok(ProcessingStatus::Failed { reason }) => {
                return TransferOutcome::ProcessingFailed(reason);
            }
            Err(e) => {
                // A failed status request is not a processing failure; it
                // only uses up one check from the budget.
                warn!(file_id = %id, check, "Status check failed: {:#}", e);
                last_error = Some(format!("{:#}", e));
            }
        }
    }

    let checks = config.max_poll_attempts;
    TransferOutcome::TimedOut(match last_error {
        Some(e) => format!(
            "Processing status unavailable after {} checks: {}",
            checks, e
        ),
        None => format!("Processing did not finish after {} status checks", checks),
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
