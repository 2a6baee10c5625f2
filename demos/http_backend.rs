//! Uploads files from disk to a running ingestion API.
//!
//! Run with:
//!   UPLOAD_API_URL=http://localhost:8000 UPLOAD_API_TOKEN=... \
//!     cargo run --example http_backend -- report.pdf notes.txt

use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload_queue::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upload_queue=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        anyhow::bail!("usage: http_backend <file>...");
    }

    let base_url =
        std::env::var("UPLOAD_API_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
    let token = TokenHolder::new();
    if let Ok(value) = std::env::var("UPLOAD_API_TOKEN") {
        token.set(value);
    }

    let transport = HttpTransport::new(
        HttpTransportConfig::new(base_url).with_upload_timeout(Duration::from_secs(600)),
    )
    .with_credentials(token.clone());
    let queue = UploadQueue::new(QueueConfig::default(), transport);

    let mut payloads = Vec::with_capacity(paths.len());
    for path in &paths {
        payloads.push(FilePayload::from_path(path).await?);
    }
    queue.enqueue(payloads).await?;

    let mut events = queue.events();
    let mut subscriber = queue.subscribe();
    let snapshot = loop {
        tokio::select! {
            event = events.recv() => {
                if let Ok(event) = event {
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
            snapshot = subscriber.changed() => {
                let snapshot = snapshot?;
                if snapshot.counts().is_settled() {
                    break snapshot;
                }
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    queue.shutdown().await?;
    Ok(())
}
