//! Drives the queue against an in-process backend that takes a while to
//! upload and process, and fails now and then.
//!
//! Run with: RUST_LOG=upload_queue=debug cargo run --example simulated_backend

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload_queue::*;

struct SimulatedBackend {
    uploads: AtomicU32,
}

impl Transport for SimulatedBackend {
    async fn upload(
        &self,
        payload: &FilePayload,
        progress: Arc<dyn ProgressReporter>,
    ) -> anyhow::Result<UploadReceipt> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);

        for step in 1..=10u8 {
            tokio::time::sleep(Duration::from_millis(80)).await;
            progress.report(step * 10);
        }

        // Every fourth upload is dropped by the "network"
        if n % 4 == 3 {
            anyhow::bail!("connection reset while sending {}", payload.name);
        }
        Ok(UploadReceipt::new(format!("doc-{}", n)))
    }

    async fn poll_status(&self, receipt: &UploadReceipt) -> anyhow::Result<ProcessingStatus> {
        let n: u32 = receipt
            .document_id
            .trim_start_matches("doc-")
            .parse()
            .unwrap_or(0);

        if n == 5 {
            return Ok(ProcessingStatus::Failed {
                reason: "No extractable text".into(),
            });
        }
        Ok(ProcessingStatus::Done {
            chunks_created: 4 + n,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upload_queue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = QueueConfig::builder()
        .with_concurrency_limit(3)
        .with_poll_interval(Duration::from_millis(500))
        .build();
    let queue = UploadQueue::new(
        config,
        SimulatedBackend {
            uploads: AtomicU32::new(0),
        },
    );

    let files = (1..=8)
        .map(|i| FilePayload::new(format!("paper-{}.pdf", i), vec![0u8; 4096 * i]))
        .chain(std::iter::once(FilePayload::new("slides.pptx", vec![1u8; 64])));
    let ids = queue.enqueue(files).await?;
    println!("Queued {} files", ids.len());

    let mut subscriber = queue.subscribe();
    loop {
        let snapshot = subscriber.changed().await?;
        let counts = snapshot.counts();
        println!(
            "v{:<4} pending {} | uploading {} | processing {} | completed {} | error {} ({}%)",
            snapshot.version,
            counts.pending,
            counts.uploading,
            counts.processing,
            counts.completed,
            counts.error,
            counts.overall_progress()
        );
        if counts.is_settled() {
            break;
        }
    }

    // Give every failed upload one more try
    let failed: Vec<FileId> = queue
        .snapshot()
        .with_status(FileStatus::Error)
        .filter(|item| item.error_kind == Some(FailureKind::Transport))
        .map(|item| item.id)
        .collect();
    for id in &failed {
        queue.retry(*id).await?;
    }
    let snapshot = subscriber
        .wait_for(|snapshot| snapshot.counts().is_settled())
        .await?;

    println!();
    for item in snapshot.iter() {
        match item.status {
            FileStatus::Completed => println!(
                "  {:<14} completed, {} chunks (attempt {})",
                item.payload.name,
                item.chunks_created.unwrap_or(0),
                item.attempt
            ),
            status => println!(
                "  {:<14} {} ({})",
                item.payload.name,
                status,
                item.error.as_deref().unwrap_or("")
            ),
        }
    }

    let cleared = queue.clear_completed().await?;
    println!("\nCleared {} completed files", cleared);
    queue.shutdown().await?;
    Ok(())
}
