//! End-to-end queue scenarios.

use std::time::Duration;

use tq::{Job, JobPriority, Queue, Reaper};

use crate::common::{default_test_queue, test_queue};

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_critical_preempts_normal() {
    let queue = default_test_queue().await;

    let a = Job::new("scenario", b"a".to_vec(), JobPriority::Normal);
    let b = Job::new("scenario", b"b".to_vec(), JobPriority::Critical);
    queue.enqueue(&a).await.expect("enqueue a");
    queue.enqueue(&b).await.expect("enqueue b");

    // B was enqueued second but wins on priority.
    let first = queue.dequeue().await.expect("dequeue").expect("job");
    assert_eq!(first.id, b.id);
    let second = queue.dequeue().await.expect("dequeue").expect("job");
    assert_eq!(second.id, a.id);
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_scheduled_job_waits_until_due() {
    let queue = default_test_queue().await;

    let c = Job::builder("scenario", b"c".to_vec())
        .scheduled_at(chrono::Utc::now() + chrono::Duration::seconds(2))
        .build();
    queue.enqueue(&c).await.expect("enqueue");

    assert!(queue.dequeue().await.expect("dequeue").is_none());

    tokio::time::sleep(Duration::from_secs(3)).await;
    let job = queue.dequeue().await.expect("dequeue").expect("job due");
    assert_eq!(job.id, c.id);
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_retry_exhaustion_dead_letters() {
    let queue = default_test_queue().await;
    let (events_tx, mut events_rx) = tq::queue::channel();
    let queue = queue.with_events(events_tx);

    let d = Job::builder("scenario", b"d".to_vec()).max_retries(2).build();
    queue.enqueue(&d).await.expect("enqueue");

    // Each nack increments retry_count before the limit check, so the
    // second nack reaches max_retries and dead-letters the job. The fixed
    // 50 ms test backoff keeps the waits short.
    for _ in 0..2 {
        let mut claimed = None;
        for _ in 0..20 {
            if let Some(job) = queue.dequeue().await.expect("dequeue") {
                claimed = Some(job);
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let job = claimed.expect("job should become due again");
        assert_eq!(job.id, d.id);
        queue.nack(job.id, "boom").await.expect("nack");
    }

    assert_eq!(queue.size().await.expect("size"), 0);
    let stats = queue.stats().await.expect("stats");
    assert_eq!(stats.dead_letter, 1);
    assert_eq!(stats.failed, 2);

    // The final nack reports the job dead with both retries consumed.
    let mut last_nack = None;
    while let Ok(event) = events_rx.try_recv() {
        if let tq::JobEventKind::Nacked {
            retry_count, dead, ..
        } = event.kind
        {
            last_nack = Some((retry_count, dead));
        }
    }
    assert_eq!(last_nack, Some((2, true)));
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_worker_crash_is_reaped() {
    let queue = test_queue(Duration::from_secs(1)).await;

    let e = Job::new("scenario", b"e".to_vec(), JobPriority::Normal);
    queue.enqueue(&e).await.expect("enqueue");

    let job = queue.dequeue().await.expect("dequeue").expect("job");
    assert_eq!(job.id, e.id);
    assert_eq!(job.retry_count, 0);

    // No ack, no extend: the lease lapses and the reaper reclaims it.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    queue.recover().await.expect("reap");

    let mut redelivered = None;
    for _ in 0..20 {
        if let Some(job) = queue.dequeue().await.expect("dequeue") {
            redelivered = Some(job);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let job = redelivered.expect("job should be redelivered");
    assert_eq!(job.id, e.id);
    assert_eq!(job.retry_count, 1);
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_extend_outlives_original_lease() {
    let queue = test_queue(Duration::from_secs(1)).await;

    let f = Job::new("scenario", b"f".to_vec(), JobPriority::Normal);
    queue.enqueue(&f).await.expect("enqueue");

    let job = queue.dequeue().await.expect("dequeue").expect("job");
    queue
        .extend(job.id, Duration::from_secs(4))
        .await
        .expect("extend");

    // Past the original visibility timeout the extended lease still holds,
    // so a reaper pass must not move the job.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let report = queue.recover().await.expect("reap");
    assert_eq!(report.requeued, 0);
    assert_eq!(report.dead_lettered, 0);

    queue.ack(job.id).await.expect("ack succeeds");
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_batch_enqueue_then_clear() {
    let queue = default_test_queue().await;

    let jobs: Vec<Job> = ["g", "h", "i"]
        .iter()
        .map(|tag| Job::new("scenario", tag.as_bytes().to_vec(), JobPriority::Normal))
        .collect();
    queue.enqueue_batch(&jobs).await.expect("batch");

    assert_eq!(queue.size().await.expect("size"), 3);
    queue.clear().await.expect("clear");
    assert_eq!(queue.size().await.expect("size"), 0);
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_background_reaper_recovers_lease() {
    let queue = std::sync::Arc::new(test_queue(Duration::from_secs(1)).await);

    let job = Job::new("scenario", b"bg".to_vec(), JobPriority::Normal);
    queue.enqueue(&job).await.expect("enqueue");
    let claimed = queue.dequeue().await.expect("dequeue").expect("job");
    assert_eq!(claimed.id, job.id);

    let handle = Reaper::new(std::sync::Arc::clone(&queue))
        .with_interval(Duration::from_millis(300))
        .spawn();

    // The reaper should pick up the expired lease within a few passes.
    let mut redelivered = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(job) = queue.dequeue().await.expect("dequeue") {
            redelivered = Some(job);
            break;
        }
    }
    handle.shutdown().await;

    let job = redelivered.expect("reaper should requeue the job");
    assert_eq!(job.retry_count, 1);
}
