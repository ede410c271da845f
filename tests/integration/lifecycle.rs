//! Round-trip and idempotence laws.

use std::time::Duration;

use tq::{Job, JobPriority, JobStatus, Queue};

use crate::common::default_test_queue;

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_enqueue_dequeue_round_trip() {
    let queue = default_test_queue().await;

    let job = Job::builder("roundtrip", b"\x00\x01payload".to_vec())
        .priority(JobPriority::High)
        .metadata("tenant", "acme")
        .build();
    queue.enqueue(&job).await.expect("enqueue");

    let out = queue.dequeue().await.expect("dequeue").expect("job");
    // Equal modulo the dequeue transition: status running, started_at set.
    assert_eq!(out.id, job.id);
    assert_eq!(out.job_type, job.job_type);
    assert_eq!(out.payload, job.payload);
    assert_eq!(out.priority, job.priority);
    assert_eq!(out.max_retries, job.max_retries);
    assert_eq!(out.retry_count, 0);
    assert_eq!(out.metadata, job.metadata);
    assert_eq!(out.status, JobStatus::Running);
    assert!(out.started_at.is_some());
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_nack_increments_retry_count_once() {
    let queue = default_test_queue().await;

    let job = Job::new("roundtrip", b"x".to_vec(), JobPriority::Normal);
    queue.enqueue(&job).await.expect("enqueue");

    let claimed = queue.dequeue().await.expect("dequeue").expect("job");
    queue.nack(claimed.id, "transient").await.expect("nack");

    // Not redelivered before the backoff deadline passes.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let redelivered = queue.dequeue().await.expect("dequeue").expect("job");
    assert_eq!(redelivered.id, job.id);
    assert_eq!(redelivered.retry_count, 1);
    assert_eq!(redelivered.error.as_deref(), Some("transient"));
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_ack_removes_job() {
    let queue = default_test_queue().await;

    let job = Job::new("roundtrip", b"x".to_vec(), JobPriority::Normal);
    queue.enqueue(&job).await.expect("enqueue");

    let claimed = queue.dequeue().await.expect("dequeue").expect("job");
    queue.ack(claimed.id).await.expect("ack");

    assert_eq!(queue.size().await.expect("size"), 0);
    let stats = queue.stats().await.expect("stats");
    assert_eq!(stats.processing, 0);

    // A second ack is a caller bug and reports NotFound.
    let err = queue.ack(claimed.id).await.expect_err("double ack");
    assert!(err.is_not_found());
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_delete_from_pending_and_delayed() {
    let queue = default_test_queue().await;

    let pending = Job::new("roundtrip", b"p".to_vec(), JobPriority::Normal);
    let delayed = Job::builder("roundtrip", b"d".to_vec())
        .scheduled_at(chrono::Utc::now() + chrono::Duration::minutes(5))
        .build();
    queue.enqueue(&pending).await.expect("enqueue pending");
    queue.enqueue(&delayed).await.expect("enqueue delayed");
    assert_eq!(queue.size().await.expect("size"), 2);

    queue.delete(pending.id).await.expect("delete pending");
    queue.delete(delayed.id).await.expect("delete delayed");
    assert_eq!(queue.size().await.expect("size"), 0);

    let err = queue.delete(pending.id).await.expect_err("already gone");
    assert!(err.is_not_found());
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_stats_counters_accumulate() {
    let queue = default_test_queue().await;

    for _ in 0..3 {
        let job = Job::new("roundtrip", b"s".to_vec(), JobPriority::Normal);
        queue.enqueue(&job).await.expect("enqueue");
    }
    let job = queue.dequeue().await.expect("dequeue").expect("job");
    queue.ack(job.id).await.expect("ack");

    let stats = queue.stats().await.expect("stats");
    assert_eq!(stats.size, 2);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.dead_letter, 0);
    assert!(stats.last_enqueue_time.is_some());
    assert!(stats.last_dequeue_time.is_some());
    assert!(stats.avg_processing_time >= 0.0);
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_dequeue_batch_collects_prefix() {
    let queue = default_test_queue().await;

    for tag in ["1", "2", "3"] {
        let job = Job::new("roundtrip", tag.as_bytes().to_vec(), JobPriority::Normal);
        queue.enqueue(&job).await.expect("enqueue");
    }

    let jobs = queue.dequeue_batch(10).await.expect("batch");
    assert_eq!(jobs.len(), 3);
    // FIFO within one priority.
    assert_eq!(jobs[0].payload, b"1");
    assert_eq!(jobs[1].payload, b"2");
    assert_eq!(jobs[2].payload, b"3");
}
