
use std::time::Duration;

use tempfile::tempdir;
use test_helpers::*;
use upload_queue::*;

#[tokio::test(start_paused = true)]
async fn test_enqueue_admits_up_to_limit() {
    let backend = FakeBackend::new();
    let queue = UploadQueue::new(config(3), backend.clone());

    let ids = queue
        .enqueue(["a.pdf", "b.pdf", "c.pdf", "d.pdf", "e.pdf"].map(pdf))
        .await
        .unwrap();
    assert_eq!(ids.len(), 5);

    let snapshot = queue.snapshot();
    let counts = snapshot.counts();
    assert_eq!(counts.uploading, 3);
    assert_eq!(counts.pending, 2);
    assert_eq!(
        names(&snapshot),
        vec!["a.pdf", "b.pdf", "c.pdf", "d.pdf", "e.pdf"]
    );
    for (item, id) in snapshot.iter().zip(&ids) {
        assert_eq!(item.id, *id);
    }
    assert_eq!(snapshot.get(ids[3]).unwrap().status, FileStatus::Pending);

    let done = settled(&queue).await;
    assert_eq!(done.counts().completed, 5);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_never_exceeded() {
    let backend = FakeBackend::new();
    let queue = UploadQueue::new(config(2), backend.clone());
    let mut subscriber = queue.subscribe();

    queue
        .enqueue((0..8).map(|i| pdf(&format!("{}.pdf", i))))
        .await
        .unwrap();

    loop {
        let snapshot = subscriber.changed().await.unwrap();
        assert!(snapshot.counts().active() <= 2, "{:?}", snapshot.counts());
        if snapshot.counts().is_settled() {
            break;
        }
    }
    assert!(backend.max_in_flight() <= 2);
    assert_eq!(queue.counts().completed, 8);
}

#[tokio::test(start_paused = true)]
async fn test_admission_is_fifo() {
    let backend = FakeBackend::new();
    let queue = UploadQueue::new(config(1), backend.clone());

    queue
        .enqueue(["first.pdf", "second.pdf", "third.pdf"].map(pdf))
        .await
        .unwrap();
    settled(&queue).await;

    assert_eq!(backend.uploads(), vec!["first.pdf", "second.pdf", "third.pdf"]);
}

#[tokio::test(start_paused = true)]
async fn test_upload_failure_releases_slot() {
    let backend = FakeBackend::new();
    backend.plan("bad.pdf", FilePlan::upload_fails("connection reset by peer"));
    let queue = UploadQueue::new(config(1), backend.clone());

    let ids = queue
        .enqueue(["bad.pdf", "good.pdf"].map(pdf))
        .await
        .unwrap();

    let failed = reached(&queue, ids[0], FileStatus::Error).await;
    assert_eq!(failed.error_kind, Some(FailureKind::Transport));
    assert!(failed
        .error
        .as_deref()
        .unwrap()
        .contains("connection reset by peer"));

    // The next file was admitted in the same turn.
    assert_eq!(queue.get(ids[1]).unwrap().status, FileStatus::Uploading);

    let snapshot = settled(&queue).await;
    assert_eq!(snapshot.get(ids[1]).unwrap().status, FileStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_processing_done_records_chunks() {
    let backend = FakeBackend::new();
    backend.plan("paper.pdf", FilePlan::done(7));
    let queue = UploadQueue::new(config(3), backend.clone());

    let id = queue.enqueue_one(pdf("paper.pdf")).await.unwrap();
    let item = reached(&queue, id, FileStatus::Completed).await;

    assert_eq!(item.chunks_created, Some(7));
    assert_eq!(item.document_id.as_deref(), Some("doc-paper.pdf-1"));
    assert!(item.error.is_none());
    assert!(item.upload_progress().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_processing_failure() {
    let backend = FakeBackend::new();
    backend.plan("scan.pdf", FilePlan::processing_fails("No text could be extracted"));
    let queue = UploadQueue::new(config(3), backend.clone());

    let id = queue.enqueue_one(pdf("scan.pdf")).await.unwrap();
    let item = reached(&queue, id, FileStatus::Error).await;

    assert_eq!(item.error_kind, Some(FailureKind::Processing));
    assert_eq!(item.error.as_deref(), Some("No text could be extracted"));
    assert!(item.document_id.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_poll_budget_exhaustion_times_out() {
    let backend = FakeBackend::new();
    backend.plan("slow.pdf", FilePlan::never_finishes());
    let config = QueueConfig::builder()
        .with_poll_interval(Duration::from_millis(100))
        .with_max_poll_attempts(5)
        .build();
    let queue = UploadQueue::new(config, backend.clone());

    let id = queue.enqueue_one(pdf("slow.pdf")).await.unwrap();
    let item = reached(&queue, id, FileStatus::Error).await;

    assert_eq!(item.error_kind, Some(FailureKind::Timeout));
    assert_eq!(backend.polls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_processing_wall_clock_timeout() {
    let backend = FakeBackend::new();
    backend.plan("slow.pdf", FilePlan::never_finishes());
    let config = QueueConfig::builder()
        .with_poll_interval(Duration::from_secs(2))
        .with_max_poll_attempts(1000)
        .with_processing_timeout(Duration::from_secs(5))
        .build();
    let queue = UploadQueue::new(config, backend.clone());

    let id = queue.enqueue_one(pdf("slow.pdf")).await.unwrap();
    let item = reached(&queue, id, FileStatus::Error).await;

    assert_eq!(item.error_kind, Some(FailureKind::Timeout));
    assert!(item.error.as_deref().unwrap().contains("within 5s"));
    assert_eq!(backend.polls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_status_request_errors_are_transient() {
    let backend = FakeBackend::new();
    backend.plan(
        "flaky.pdf",
        FilePlan::default().with_statuses(vec![
            Step::Unreachable,
            Step::InProgress,
            Step::Unreachable,
            Step::Done(2),
        ]),
    );
    let queue = UploadQueue::new(config(1), backend.clone());

    let id = queue.enqueue_one(pdf("flaky.pdf")).await.unwrap();
    let item = reached(&queue, id, FileStatus::Completed).await;
    assert_eq!(item.chunks_created, Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_remove_rules() {
    let backend = FakeBackend::new();
    backend.plan(
        "busy.pdf",
        FilePlan::default().with_upload_time(Duration::from_secs(60)),
    );
    let queue = UploadQueue::new(config(1), backend.clone());

    let ids = queue
        .enqueue(["busy.pdf", "waiting.pdf"].map(pdf))
        .await
        .unwrap();

    let err = queue.remove(ids[0]).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidOperation {
            status: FileStatus::Uploading,
            operation: "remove",
            ..
        }
    ));
    assert_eq!(queue.get(ids[0]).unwrap().status, FileStatus::Uploading);

    queue.remove(ids[1]).await.unwrap();
    assert!(queue.get(ids[1]).is_none());
    assert!(matches!(
        queue.remove(ids[1]).await,
        Err(QueueError::NotFound(_))
    ));

    reached(&queue, ids[0], FileStatus::Completed).await;
    queue.remove(ids[0]).await.unwrap();
    assert!(queue.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_failure_starts_fresh() {
    let backend = FakeBackend::new();
    backend.plan("doc.pdf", FilePlan::upload_fails("502 Bad Gateway"));
    let queue = UploadQueue::new(config(3), backend.clone());

    let id = queue.enqueue_one(pdf("doc.pdf")).await.unwrap();
    let failed = reached(&queue, id, FileStatus::Error).await;
    assert_eq!(failed.attempt, 0);
    assert!(failed.progress > 0);

    queue.retry(id).await.unwrap();
    let retried = queue.get(id).unwrap();
    assert_eq!(retried.status, FileStatus::Uploading);
    assert_eq!(retried.attempt, 1);
    assert_eq!(retried.upload_progress(), Some(0));
    assert!(retried.error.is_none());

    let item = reached(&queue, id, FileStatus::Completed).await;
    assert_eq!(item.attempt, 1);
    assert_eq!(backend.uploads(), vec!["doc.pdf", "doc.pdf"]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_only_from_error() {
    let backend = FakeBackend::new();
    let queue = UploadQueue::new(config(1), backend.clone());

    let ids = queue.enqueue(["a.pdf", "b.pdf"].map(pdf)).await.unwrap();
    assert!(matches!(
        queue.retry(ids[0]).await,
        Err(QueueError::InvalidOperation {
            status: FileStatus::Uploading,
            ..
        })
    ));
    assert!(matches!(
        queue.retry(ids[1]).await,
        Err(QueueError::InvalidOperation {
            status: FileStatus::Pending,
            ..
        })
    ));

    reached(&queue, ids[0], FileStatus::Completed).await;
    assert!(queue.retry(ids[0]).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_retried_file_queues_behind_waiting_files() {
    let backend = FakeBackend::new();
    backend.plan("a.pdf", FilePlan::upload_fails("timeout"));
    let queue = UploadQueue::new(config(1), backend.clone());

    let ids = queue
        .enqueue(["a.pdf", "b.pdf", "c.pdf"].map(pdf))
        .await
        .unwrap();
    reached(&queue, ids[0], FileStatus::Error).await;

    queue.retry(ids[0]).await.unwrap();
    // Display order is untouched; only admission order changes.
    assert_eq!(names(&queue.snapshot()), vec!["a.pdf", "b.pdf", "c.pdf"]);
    assert_eq!(queue.get(ids[0]).unwrap().status, FileStatus::Pending);
    assert_eq!(queue.get(ids[1]).unwrap().status, FileStatus::Uploading);

    let snapshot = settled(&queue).await;
    assert_eq!(backend.uploads(), vec!["a.pdf", "b.pdf", "c.pdf", "a.pdf"]);
    assert_eq!(names(&snapshot), vec!["a.pdf", "b.pdf", "c.pdf"]);
    assert_eq!(snapshot.get(ids[0]).unwrap().status, FileStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_remove_and_cancel_while_processing() {
    let backend = FakeBackend::new();
    backend.plan("stuck.pdf", FilePlan::never_finishes());
    backend.plan(
        "next.pdf",
        FilePlan::default().with_upload_time(Duration::from_secs(60)),
    );
    let queue = UploadQueue::new(config(1), backend.clone());

    let ids = queue
        .enqueue(["stuck.pdf", "next.pdf"].map(pdf))
        .await
        .unwrap();
    reached(&queue, ids[0], FileStatus::Processing).await;
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(backend.polls() > 0);

    let err = queue.remove(ids[0]).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidOperation {
            status: FileStatus::Processing,
            operation: "remove",
            ..
        }
    ));
    assert_eq!(queue.get(ids[0]).unwrap().status, FileStatus::Processing);
    assert_eq!(queue.get(ids[1]).unwrap().status, FileStatus::Pending);

    queue.cancel(ids[0]).await.unwrap();
    let cancelled = queue.get(ids[0]).unwrap();
    assert_eq!(cancelled.status, FileStatus::Error);
    assert_eq!(cancelled.error_kind, Some(FailureKind::Cancelled));
    assert_eq!(queue.get(ids[1]).unwrap().status, FileStatus::Uploading);

    // The aborted poll loop never asks about the cancelled document again.
    let polls = backend.polls();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(backend.polls(), polls);
    assert_eq!(queue.get(ids[0]).unwrap().status, FileStatus::Error);

    queue.remove(ids[0]).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_invalid_files_never_reach_transport() {
    let backend = FakeBackend::new();
    let queue = UploadQueue::new(config(1), backend.clone());

    let ids = queue
        .enqueue([
            FilePayload::new("empty.pdf", Vec::new()),
            FilePayload::new("setup.exe", vec![0x4d, 0x5a]),
            pdf("ok.pdf"),
        ])
        .await
        .unwrap();

    let snapshot = queue.snapshot();
    for id in &ids[..2] {
        let item = snapshot.get(*id).unwrap();
        assert_eq!(item.status, FileStatus::Error);
        assert_eq!(item.error_kind, Some(FailureKind::Validation));
    }
    assert!(snapshot
        .get(ids[1])
        .unwrap()
        .error
        .as_deref()
        .unwrap()
        .contains("unsupported file type"));
    // Rejected files never took the only slot.
    assert_eq!(snapshot.get(ids[2]).unwrap().status, FileStatus::Uploading);

    queue.retry(ids[0]).await.unwrap();
    let item = queue.get(ids[0]).unwrap();
    assert_eq!(item.status, FileStatus::Error);
    assert_eq!(item.attempt, 1);

    settled(&queue).await;
    assert_eq!(backend.uploads(), vec!["ok.pdf"]);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_file_rejected() {
    let backend = FakeBackend::new();
    let config = QueueConfig::builder().with_max_file_size(8).build();
    let queue = UploadQueue::new(config, backend.clone());

    let id = queue.enqueue_one(pdf("big.pdf")).await.unwrap();
    let item = queue.get(id).unwrap();
    assert_eq!(item.error_kind, Some(FailureKind::Validation));
    assert!(backend.uploads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_active_file_releases_slot() {
    let backend = FakeBackend::new();
    backend.plan(
        "huge.pdf",
        FilePlan::default().with_upload_time(Duration::from_secs(60)),
    );
    let queue = UploadQueue::new(config(1), backend.clone());

    let ids = queue
        .enqueue(["huge.pdf", "next.pdf"].map(pdf))
        .await
        .unwrap();
    queue.cancel(ids[0]).await.unwrap();

    let snapshot = queue.snapshot();
    let cancelled = snapshot.get(ids[0]).unwrap();
    assert_eq!(cancelled.status, FileStatus::Error);
    assert_eq!(cancelled.error_kind, Some(FailureKind::Cancelled));
    assert_eq!(cancelled.error.as_deref(), Some("Cancelled by user"));
    assert_eq!(snapshot.get(ids[1]).unwrap().status, FileStatus::Uploading);

    let snapshot = settled(&queue).await;
    assert_eq!(snapshot.get(ids[0]).unwrap().status, FileStatus::Error);
    assert_eq!(snapshot.get(ids[1]).unwrap().status, FileStatus::Completed);

    // Cancelled files can be retried like any other failure.
    queue.retry(ids[0]).await.unwrap();
    assert_eq!(queue.get(ids[0]).unwrap().attempt, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_pending_and_terminal() {
    let backend = FakeBackend::new();
    let queue = UploadQueue::new(config(1), backend.clone());

    let ids = queue.enqueue(["a.pdf", "b.pdf"].map(pdf)).await.unwrap();
    queue.cancel(ids[1]).await.unwrap();
    assert_eq!(
        queue.get(ids[1]).unwrap().error_kind,
        Some(FailureKind::Cancelled)
    );

    reached(&queue, ids[0], FileStatus::Completed).await;
    assert!(matches!(
        queue.cancel(ids[0]).await,
        Err(QueueError::InvalidOperation {
            operation: "cancel",
            ..
        })
    ));
    assert_eq!(backend.uploads(), vec!["a.pdf"]);
}

#[tokio::test(start_paused = true)]
async fn test_clear_completed_keeps_failures() {
    let backend = FakeBackend::new();
    backend.plan("bad.pdf", FilePlan::upload_fails("refused"));
    let queue = UploadQueue::new(config(3), backend.clone());

    queue
        .enqueue(["a.pdf", "bad.pdf", "b.pdf"].map(pdf))
        .await
        .unwrap();
    settled(&queue).await;

    assert_eq!(queue.clear_completed().await.unwrap(), 2);
    let snapshot = queue.snapshot();
    assert_eq!(names(&snapshot), vec!["bad.pdf"]);
    assert_eq!(queue.clear_completed().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transport_panic_fails_file() {
    let backend = FakeBackend::new();
    backend.plan("boom.pdf", FilePlan::panics());
    let queue = UploadQueue::new(config(1), backend.clone());

    let ids = queue
        .enqueue(["boom.pdf", "fine.pdf"].map(pdf))
        .await
        .unwrap();
    let snapshot = settled(&queue).await;

    let crashed = snapshot.get(ids[0]).unwrap();
    assert_eq!(crashed.error_kind, Some(FailureKind::Transport));
    assert!(crashed.error.as_deref().unwrap().contains("backend crashed"));
    assert_eq!(snapshot.get(ids[1]).unwrap().status, FileStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_versions_increase() {
    let backend = FakeBackend::new();
    let queue = UploadQueue::new(config(2), backend.clone());
    let mut subscriber = queue.subscribe();
    let mut last = subscriber.current().version;

    queue.enqueue(["a.pdf", "b.pdf", "c.pdf"].map(pdf)).await.unwrap();
    loop {
        let snapshot = subscriber.changed().await.unwrap();
        assert!(snapshot.version > last);
        last = snapshot.version;
        if snapshot.counts().is_settled() {
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_monotonic_while_uploading() {
    let backend = FakeBackend::new();
    let queue = UploadQueue::new(config(1), backend.clone());
    let mut subscriber = queue.subscribe();

    let id = queue.enqueue_one(pdf("a.pdf")).await.unwrap();
    let mut seen = Vec::new();
    loop {
        let snapshot = subscriber.changed().await.unwrap();
        let item = snapshot.get(id).unwrap();
        if let Some(progress) = item.upload_progress() {
            seen.push(progress);
        }
        if item.status.is_terminal() {
            break;
        }
    }

    assert_eq!(seen.first(), Some(&0));
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]), "{:?}", seen);
}

#[tokio::test(start_paused = true)]
async fn test_subscribers_converge() {
    let backend = FakeBackend::new();
    let queue = UploadQueue::new(config(2), backend.clone());
    let first = queue.subscribe();
    let second = queue.clone().subscribe();

    queue.enqueue(["a.pdf", "b.pdf", "c.pdf"].map(pdf)).await.unwrap();
    let snapshot = settled(&queue).await;

    assert_eq!(first.current().version, snapshot.version);
    assert_eq!(second.current().version, snapshot.version);
    assert_eq!(names(&first.current()), names(&second.current()));
}

#[tokio::test(start_paused = true)]
async fn test_event_stream_follows_lifecycle() {
    let backend = FakeBackend::new();
    backend.plan("a.pdf", FilePlan::done(4));
    let queue = UploadQueue::new(config(1), backend.clone());
    let mut events = queue.events();

    let id = queue.enqueue_one(pdf("a.pdf")).await.unwrap();
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        assert_eq!(event.file_id(), id);
        let done = matches!(event, QueueEvent::FileCompleted { .. });
        seen.push(event.name());
        if done {
            break;
        }
    }

    assert_eq!(seen[0], "upload:file_added");
    assert_eq!(seen[1], "upload:file_started");
    assert_eq!(seen.iter().filter(|n| **n == "upload:file_progress").count(), 4);
    assert_eq!(seen[seen.len() - 2], "upload:file_processing");
    assert_eq!(seen[seen.len() - 1], "upload:file_completed");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_queue() {
    let backend = FakeBackend::new();
    backend.plan(
        "a.pdf",
        FilePlan::default().with_upload_time(Duration::from_secs(60)),
    );
    let queue = UploadQueue::new(config(1), backend.clone());
    let mut subscriber = queue.subscribe();

    queue.enqueue_one(pdf("a.pdf")).await.unwrap();
    queue.shutdown().await.unwrap();

    assert!(matches!(
        queue.enqueue_one(pdf("b.pdf")).await,
        Err(QueueError::Shutdown)
    ));
    while subscriber.changed().await.is_ok() {}
    assert!(!queue.is_running());
}

#[tokio::test]
async fn test_payload_from_path() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("notes.txt");
    std::fs::write(&path, "hello upload queue").unwrap();

    let payload = FilePayload::from_path(&path).await.unwrap();
    assert_eq!(payload.name, "notes.txt");
    assert_eq!(payload.size, 18);
    assert_eq!(payload.mime_type, "text/plain");

    assert!(matches!(
        FilePayload::from_path(temp.path().join("missing.pdf")).await,
        Err(QueueError::Io(_))
    ));
}
