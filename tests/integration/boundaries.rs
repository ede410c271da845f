//! Boundary behaviors.

use std::time::{Duration, Instant};

use tq::{Job, JobPriority, Queue, QueueConfig, RedisQueue};

use crate::common::{default_test_queue, redis_url};

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_empty_dequeue_returns_none_within_poll_budget() {
    let queue = default_test_queue().await;

    let start = Instant::now();
    let job = queue.dequeue().await.expect("dequeue");
    let elapsed = start.elapsed();

    assert!(job.is_none());
    // ~100 ms blocking wait per priority, four priorities, plus slack.
    assert!(
        elapsed < Duration::from_millis(1500),
        "empty dequeue took {elapsed:?}"
    );
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_zero_visibility_timeout_rejected_at_construction() {
    let config = QueueConfig {
        visibility_timeout: Duration::ZERO,
        ..QueueConfig::named("boundary")
    };
    let err = RedisQueue::connect(&redis_url(), config)
        .await
        .expect_err("zero visibility timeout must be rejected");
    assert_eq!(err.kind(), tq::ErrorKind::Configuration);
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_empty_batch_is_noop_success() {
    let queue = default_test_queue().await;
    queue.enqueue_batch(&[]).await.expect("empty batch");
    assert_eq!(queue.size().await.expect("size"), 0);
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_scheduled_now_is_immediately_available() {
    let queue = default_test_queue().await;

    let job = Job::builder("boundary", b"now".to_vec())
        .scheduled_at(chrono::Utc::now())
        .build();
    queue.enqueue(&job).await.expect("enqueue");

    let out = queue.dequeue().await.expect("dequeue").expect("job");
    assert_eq!(out.id, job.id);
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_unknown_ids_report_not_found() {
    let queue = default_test_queue().await;
    let id = uuid::Uuid::new_v4();

    assert!(queue.ack(id).await.expect_err("ack").is_not_found());
    assert!(queue.nack(id, "x").await.expect_err("nack").is_not_found());
    assert!(queue.delete(id).await.expect_err("delete").is_not_found());
    // Extend on a missing lease is a no-op, not an error.
    queue
        .extend(id, Duration::from_secs(5))
        .await
        .expect("extend is a no-op");
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_invalid_job_rejected_on_enqueue() {
    let queue = default_test_queue().await;
    let job = Job::new("bad type!", b"x".to_vec(), JobPriority::Normal);
    let err = queue.enqueue(&job).await.expect_err("invalid type");
    assert!(err.is_validation());
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_batch_aborts_on_any_invalid_job() {
    let queue = default_test_queue().await;
    let jobs = vec![
        Job::new("fine", b"1".to_vec(), JobPriority::Normal),
        Job::new("not valid!", b"2".to_vec(), JobPriority::Normal),
    ];
    let err = queue.enqueue_batch(&jobs).await.expect_err("batch aborts");
    assert!(err.is_validation());
    // Nothing was submitted.
    assert_eq!(queue.size().await.expect("size"), 0);
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_clear_preserves_dead_letter() {
    let queue = default_test_queue().await;

    let doomed = Job::builder("boundary", b"dl".to_vec()).max_retries(0).build();
    queue.enqueue(&doomed).await.expect("enqueue");
    let job = queue.dequeue().await.expect("dequeue").expect("job");
    queue.nack(job.id, "fatal").await.expect("nack");

    let live = Job::new("boundary", b"live".to_vec(), JobPriority::Normal);
    queue.enqueue(&live).await.expect("enqueue");

    queue.clear().await.expect("clear");

    let stats = queue.stats().await.expect("stats");
    assert_eq!(stats.size, 0);
    assert_eq!(stats.dead_letter, 1, "clear must not purge dead-letter");
}
