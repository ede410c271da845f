//! Queue contract: operation surface, configuration, and statistics.
//!
//! The backend owns every list/set/lease key; callers hold no per-job
//! state across calls. Delivery is at-least-once with bounded retries;
//! priority strictly preempts FIFO across levels.

pub mod events;
mod reaper;
mod redis;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Error;
use crate::models::Job;

pub use events::{channel, EventReceiver, EventSender, JobEvent, JobEventKind};
pub use reaper::{Reaper, ReaperHandle};
pub use self::redis::{ReapReport, RedisQueue};

/// Queue operation surface consumed by the gateway and workers.
///
/// Every operation is cancel-safe: dropping the future (for example under
/// `tokio::time::timeout`) abandons the round-trip without corrupting
/// backend state. A cancellation between the atomic pop and the lease arm
/// leaves the job in the processing list for the reaper to recover.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Adds a job to the queue, routing it to its priority list or, when
    /// `scheduled_at` is in the future, to the delayed set.
    async fn enqueue(&self, job: &Job) -> crate::Result<()>;

    /// Adds multiple jobs in one pipelined round-trip. Any serialization
    /// failure aborts the whole batch before submission.
    async fn enqueue_batch(&self, jobs: &[Job]) -> crate::Result<()>;

    /// Retrieves the next job, highest priority first, arming a visibility
    /// lease. Returns `None` when no job is available within the poll wait.
    async fn dequeue(&self) -> crate::Result<Option<Job>>;

    /// Dequeues up to `limit` jobs (the queue's default batch size when 0).
    /// An error on the first attempt is returned; an error mid-batch stops
    /// the batch and yields the jobs collected so far, which remain leased
    /// to the caller.
    async fn dequeue_batch(&self, limit: usize) -> crate::Result<Vec<Job>>;

    /// Acknowledges successful processing, removing the job.
    async fn ack(&self, job_id: Uuid) -> crate::Result<()>;

    /// Reports a processing failure. The job is retried with backoff or
    /// dead-lettered once `retry_count` reaches `max_retries`.
    async fn nack(&self, job_id: Uuid, reason: &str) -> crate::Result<()>;

    /// Resets the visibility lease to `duration`. No-op when the lease has
    /// already expired.
    async fn extend(&self, job_id: Uuid, duration: Duration) -> crate::Result<()>;

    /// Removes a job from whichever list or set currently holds it.
    async fn delete(&self, job_id: Uuid) -> crate::Result<()>;

    /// Number of queued jobs: priority list lengths plus delayed set size.
    async fn size(&self) -> crate::Result<i64>;

    /// Drops every key in the queue namespace except the dead-letter list.
    async fn clear(&self) -> crate::Result<()>;

    /// Reads queue statistics.
    async fn stats(&self) -> crate::Result<QueueStats>;
}

/// Configuration bound by a queue instance.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue name; namespaces every backend key.
    pub name: String,
    /// Soft cap advertised to producers.
    pub max_size: i64,
    /// Lease duration armed at dequeue.
    pub visibility_timeout: Duration,
    /// How long completed records are retained in the mirror.
    pub retention_period: Duration,
    /// Queue-level retry limit advertised to producers; each job carries
    /// its own `max_retries`, which the backend enforces.
    pub max_retries: u32,
    /// Name of the dead-letter list.
    pub dead_letter_queue: String,
    /// Blocking wait per priority during dequeue.
    pub poll_interval: Duration,
    /// Default batch size for batched operations.
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_size: 10_000,
            visibility_timeout: Duration::from_secs(30 * 60),
            retention_period: Duration::from_secs(7 * 24 * 60 * 60),
            max_retries: 3,
            dead_letter_queue: "dead_letter".to_string(),
            poll_interval: Duration::from_millis(100),
            batch_size: 10,
        }
    }
}

impl QueueConfig {
    /// Creates a config for the named queue with defaults.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` errors for an empty name, a zero visibility
    /// timeout, or a zero batch size.
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.is_empty() {
            return Err(Error::configuration("queue name must not be empty"));
        }
        if self.visibility_timeout.is_zero() {
            return Err(Error::configuration("visibility_timeout must be non-zero"));
        }
        if self.batch_size == 0 {
            return Err(Error::configuration("batch_size must be at least 1"));
        }
        Ok(())
    }
}

/// Queue statistics snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub name: String,
    /// Jobs waiting: priority lists plus delayed set.
    pub size: i64,
    /// Jobs currently leased to workers.
    pub processing: i64,
    /// Jobs in the delayed set.
    pub delayed: i64,
    /// Cumulative nack count.
    pub failed: i64,
    /// Jobs in the dead-letter list.
    pub dead_letter: i64,
    /// Enqueues per second over the sampling window.
    pub enqueue_rate: f64,
    /// Dequeues per second over the sampling window.
    pub dequeue_rate: f64,
    /// Mean ack latency in seconds, from lease arm to ack.
    pub avg_processing_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_enqueue_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_dequeue_time: Option<DateTime<Utc>>,
}

/// Derives a rate from successive observations of a monotonic counter.
///
/// The backend stores cumulative counters in its stats hash; each `stats`
/// call feeds the current totals through a tracker, and the rate is the
/// counter delta across the retained window divided by elapsed time.
#[derive(Debug)]
pub struct RateTracker {
    window: Duration,
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl RateTracker {
    /// Creates a tracker retaining samples for `window`.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Records the current counter total and returns the updated rate.
    pub fn observe(&self, total: u64) -> f64 {
        self.observe_at(Instant::now(), total)
    }

    /// Records a counter total at an explicit instant.
    pub fn observe_at(&self, at: Instant, total: u64) -> f64 {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(&(t, _)) = samples.front() {
            if at.duration_since(t) > self.window {
                samples.pop_front();
            } else {
                break;
            }
        }
        samples.push_back((at, total));

        let (&(first_t, first_v), &(last_t, last_v)) =
            match (samples.front(), samples.back()) {
                (Some(first), Some(last)) => (first, last),
                _ => return 0.0,
            };
        let elapsed = last_t.duration_since(first_t).as_secs_f64();
        if elapsed <= 0.0 || last_v <= first_v {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let delta = (last_v - first_v) as f64;
        delta / elapsed
    }
}
