//! Redis-backed queue implementation.
//!
//! Key layout under `queue:<name>`:
//! - `queue:<name>:{critical,high,normal,low}`: FIFO list per priority
//! - `queue:<name>:delayed`: sorted set scored by UNIX seconds of `scheduled_at`
//! - `queue:<name>:processing`: jobs currently leased to workers
//! - `queue:<name>:dead_letter`: terminally failed jobs
//! - `queue:<name>:visibility:<job_id>`: lease key whose TTL is the outstanding lease
//! - `queue:<name>:stats`: hash of counters
//!
//! A job lives in exactly one list or set at a time. Multi-step transitions
//! (nack, reap, promote) are submitted as MULTI/EXEC pipelines keyed off the
//! exact serialized entry, so concurrent actors cannot double-apply them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, ErrorKind};
use crate::models::{Backoff, Job, JobPriority, JobStatus, RetryPolicy};
use crate::validation::{self, Field};

use super::events::{EventSender, JobEvent, JobEventKind};
use super::{Queue, QueueConfig, QueueStats, RateTracker};

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Summary of one reaper pass.
#[derive(Debug, Default, Clone)]
pub struct ReapReport {
    /// Delayed jobs promoted into their priority lists.
    pub promoted: usize,
    /// Processing entries examined.
    pub scanned: usize,
    /// Expired leases re-enqueued with backoff.
    pub requeued: usize,
    /// Expired leases moved to the dead-letter list.
    pub dead_lettered: usize,
}

/// Backend key derivation for one queue namespace.
#[derive(Debug, Clone)]
struct Keys {
    prefix: String,
}

impl Keys {
    fn new(name: &str) -> Self {
        Self {
            prefix: format!("queue:{name}"),
        }
    }

    fn priority(&self, priority: JobPriority) -> String {
        format!("{}:{}", self.prefix, priority.queue_name())
    }

    fn processing(&self) -> String {
        format!("{}:processing", self.prefix)
    }

    fn delayed(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    fn dead_letter(&self) -> String {
        format!("{}:dead_letter", self.prefix)
    }

    fn visibility(&self, job_id: Uuid) -> String {
        format!("{}:visibility:{job_id}", self.prefix)
    }

    fn stats(&self) -> String {
        format!("{}:stats", self.prefix)
    }

    fn pattern(&self) -> String {
        format!("{}:*", self.prefix)
    }
}

/// Redis-backed queue. See the module docs for the key layout.
///
/// The instance is cheap to clone-share behind an `Arc`; it holds no
/// per-job state, only the connection, configuration, and write-through
/// stats trackers.
pub struct RedisQueue {
    client: redis::Client,
    conn: ConnectionManager,
    config: QueueConfig,
    keys: Keys,
    clock: Arc<dyn Clock>,
    backoff: Arc<dyn Backoff>,
    events: Option<EventSender>,
    enqueue_rate: RateTracker,
    dequeue_rate: RateTracker,
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl RedisQueue {
    /// Connects to Redis and builds a queue with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an invalid URL or config, `Network` when
    /// the connection cannot be established.
    pub async fn connect(url: &str, config: QueueConfig) -> crate::Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::wrap(e, "invalid redis url").with_kind(ErrorKind::Configuration))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::wrap(e, "failed to connect to redis").with_kind(ErrorKind::Network))?;
        Self::new(client, conn, config)
    }

    /// Builds a queue over an existing client and shared connection.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` when the config fails validation.
    pub fn new(
        client: redis::Client,
        conn: ConnectionManager,
        config: QueueConfig,
    ) -> crate::Result<Self> {
        config.validate()?;
        let keys = Keys::new(&config.name);
        Ok(Self {
            client,
            conn,
            config,
            keys,
            clock: Arc::new(SystemClock),
            backoff: Arc::new(RetryPolicy::default()),
            events: None,
            enqueue_rate: RateTracker::new(RATE_WINDOW),
            dequeue_rate: RateTracker::new(RATE_WINDOW),
        })
    }

    /// Replaces the clock. Defaults to the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the retry backoff strategy. Defaults to exponential with jitter.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Attaches a lifecycle event sender for the audit mirror.
    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Returns the bound configuration.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Runs one recovery pass: promote due delayed jobs and reclaim expired
    /// leases. Call once at startup before accepting traffic.
    ///
    /// # Errors
    ///
    /// Returns `Internal`/`Network` on backend failure.
    pub async fn recover(&self) -> crate::Result<ReapReport> {
        let report = self.reaper_pass().await?;
        tracing::info!(
            queue = %self.config.name,
            promoted = report.promoted,
            requeued = report.requeued,
            dead_lettered = report.dead_lettered,
            "startup recovery pass complete"
        );
        Ok(report)
    }

    /// One full maintenance pass: promote, then reap.
    pub(crate) async fn reaper_pass(&self) -> crate::Result<ReapReport> {
        let promoted = match self.promote_due().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(queue = %self.config.name, error = %e, "promotion pass failed");
                0
            }
        };
        let mut report = self.reap_expired().await?;
        report.promoted = promoted;
        Ok(report)
    }

    /// Opens a dedicated connection for blocking pops.
    ///
    /// Blocking commands hold their connection until they return; running
    /// them on the shared connection would stall every operation pipelined
    /// behind them.
    async fn pop_connection(&self) -> crate::Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                Error::wrap(e, "failed to open pop connection").with_kind(ErrorKind::Network)
            })
    }

    fn emit(&self, job_id: Uuid, kind: JobEventKind) {
        if let Some(events) = &self.events {
            let event = JobEvent::new(job_id, self.config.name.clone(), self.clock.now(), kind);
            let _ = events.send(event);
        }
    }

    fn validate_job(job: &Job) -> crate::Result<()> {
        validation::validate([
            Field::new("type", job.job_type.as_str())
                .rule(validation::required())
                .rule(validation::job_type()),
            Field::new("max_retries", i64::from(job.max_retries))
                .rule(validation::between(0.0, 10.0)),
        ])
    }

    /// Routes one serialized job into the right structure on `pipe`.
    fn push_enqueue(&self, pipe: &mut redis::Pipeline, job: &Job, blob: &str, now: DateTime<Utc>) {
        match job.scheduled_at {
            Some(at) if at > now => {
                pipe.zadd(self.keys.delayed(), blob, at.timestamp()).ignore();
            }
            _ => {
                pipe.rpush(self.keys.priority(job.priority), blob).ignore();
            }
        }
    }

    async fn bump_enqueue_stats(&self, conn: &mut ConnectionManager, count: i64) {
        let now = self.clock.now().timestamp();
        let result: redis::RedisResult<()> = redis::pipe()
            .hincr(self.keys.stats(), "total_enqueued", count)
            .ignore()
            .hset(self.keys.stats(), "last_enqueue_time", now)
            .ignore()
            .query_async(conn)
            .await;
        if let Err(e) = result {
            tracing::warn!(queue = %self.config.name, error = %e, "failed to update enqueue stats");
        }
    }

    async fn bump_dequeue_stats(&self, conn: &mut ConnectionManager) {
        let now = self.clock.now().timestamp();
        let result: redis::RedisResult<()> = redis::pipe()
            .hincr(self.keys.stats(), "total_dequeued", 1)
            .ignore()
            .hset(self.keys.stats(), "last_dequeue_time", now)
            .ignore()
            .query_async(conn)
            .await;
        if let Err(e) = result {
            tracing::warn!(queue = %self.config.name, error = %e, "failed to update dequeue stats");
        }
    }

    /// Moves every due delayed job into its priority list.
    ///
    /// Each promotion is its own MULTI/EXEC pair: rewrite the member as
    /// pending into the priority list, remove it from the delayed set.
    async fn promote_due(&self) -> crate::Result<usize> {
        let mut conn = self.conn.clone();
        let now = self.clock.now();
        let due: Vec<String> = conn
            .zrangebyscore(self.keys.delayed(), 0i64, now.timestamp())
            .await
            .map_err(Error::from)?;
        if due.is_empty() {
            return Ok(0);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        let mut promoted = Vec::new();
        for member in &due {
            let Ok(mut job) = serde_json::from_str::<Job>(member) else {
                tracing::warn!(queue = %self.config.name, "skipping undecodable delayed entry");
                continue;
            };
            job.status = JobStatus::Pending;
            job.updated_at = now;
            let Ok(blob) = serde_json::to_string(&job) else {
                continue;
            };
            pipe.rpush(self.keys.priority(job.priority), blob).ignore();
            pipe.zrem(self.keys.delayed(), member).ignore();
            promoted.push(job.id);
        }
        if promoted.is_empty() {
            return Ok(0);
        }

        let () = pipe.query_async(&mut conn).await.map_err(Error::from)?;
        for job_id in &promoted {
            self.emit(*job_id, JobEventKind::Promoted);
        }
        counter!("tq.jobs.promoted").increment(promoted.len() as u64);
        tracing::debug!(queue = %self.config.name, count = promoted.len(), "promoted delayed jobs");
        Ok(promoted.len())
    }

    /// Finds a processing entry by decoded job id.
    ///
    /// The scan is O(processing depth); the entry blob is returned verbatim
    /// so removals can be keyed off the exact stored value.
    async fn find_processing(
        &self,
        conn: &mut ConnectionManager,
        job_id: Uuid,
    ) -> crate::Result<Option<(String, Job)>> {
        let entries: Vec<String> = conn
            .lrange(self.keys.processing(), 0, -1)
            .await
            .map_err(Error::from)?;
        for blob in entries {
            let Ok(job) = serde_json::from_str::<Job>(&blob) else {
                continue;
            };
            if job.id == job_id {
                return Ok(Some((blob, job)));
            }
        }
        Ok(None)
    }

    /// Atomically replaces a processing entry with its retry/dead-letter
    /// successor. Returns `false` when the entry was already gone (a
    /// concurrent actor won the race); the inserted successor is rolled
    /// back in that case.
    async fn requeue_processing_entry(
        &self,
        conn: &mut ConnectionManager,
        old_blob: &str,
        job: &Job,
    ) -> crate::Result<bool> {
        let new_blob = serde_json::to_string(job)?;
        let dead = job.status == JobStatus::Dead;

        let mut pipe = redis::pipe();
        pipe.atomic();
        if dead {
            pipe.rpush(self.keys.dead_letter(), &new_blob).ignore();
        } else {
            let score = job
                .scheduled_at
                .map_or_else(|| self.clock.now().timestamp(), |at| at.timestamp());
            pipe.zadd(self.keys.delayed(), &new_blob, score).ignore();
        }
        pipe.lrem(self.keys.processing(), 1, old_blob);
        let (removed,): (i64,) = pipe.query_async(conn).await.map_err(Error::from)?;

        if removed == 0 {
            if dead {
                let _: i64 = conn
                    .lrem(self.keys.dead_letter(), 1, &new_blob)
                    .await
                    .map_err(Error::from)?;
            } else {
                let _: i64 = conn
                    .zrem(self.keys.delayed(), &new_blob)
                    .await
                    .map_err(Error::from)?;
            }
            return Ok(false);
        }
        Ok(true)
    }

    /// Reclaims every processing entry whose visibility lease expired.
    async fn reap_expired(&self) -> crate::Result<ReapReport> {
        let mut conn = self.conn.clone();
        let mut report = ReapReport::default();
        let entries: Vec<String> = conn
            .lrange(self.keys.processing(), 0, -1)
            .await
            .map_err(Error::from)?;

        for blob in entries {
            report.scanned += 1;
            let Ok(mut job) = serde_json::from_str::<Job>(&blob) else {
                tracing::warn!(queue = %self.config.name, "skipping undecodable processing entry");
                continue;
            };
            let leased: bool = conn
                .exists(self.keys.visibility(job.id))
                .await
                .map_err(Error::from)?;
            if leased {
                continue;
            }

            let job_id = job.id;
            prepare_retry(&mut job, None, self.clock.now(), self.backoff.as_ref());
            let dead = job.status == JobStatus::Dead;
            if !self.requeue_processing_entry(&mut conn, &blob, &job).await? {
                continue;
            }

            if dead {
                report.dead_lettered += 1;
            } else {
                report.requeued += 1;
            }
            counter!("tq.jobs.reaped").increment(1);
            self.emit(
                job_id,
                JobEventKind::Reaped {
                    retry_count: job.retry_count,
                    dead,
                },
            );
            tracing::debug!(
                queue = %self.config.name,
                job_id = %job_id,
                retry_count = job.retry_count,
                dead,
                "reclaimed expired lease"
            );
        }

        Ok(report)
    }
}

/// Applies the retry decision to a job whose lease ended in failure.
///
/// Increments `retry_count`; at or over `max_retries` the job goes dead,
/// otherwise it is rescheduled at `now + backoff(retry_count)`.
fn prepare_retry(job: &mut Job, reason: Option<&str>, now: DateTime<Utc>, backoff: &dyn Backoff) {
    job.retry_count += 1;
    job.updated_at = now;
    job.started_at = None;
    job.worker_id = None;
    if let Some(reason) = reason {
        job.error = Some(reason.to_string());
    }

    if job.retry_count >= job.max_retries {
        job.status = JobStatus::Dead;
        job.completed_at = Some(now);
        job.scheduled_at = None;
    } else {
        let delay = backoff.delay(job.retry_count);
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        job.status = JobStatus::Retrying;
        job.scheduled_at = Some(now + chrono::Duration::milliseconds(delay_ms));
        job.completed_at = None;
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn enqueue(&self, job: &Job) -> crate::Result<()> {
        Self::validate_job(job)?;
        let blob = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        let now = self.clock.now();

        let mut pipe = redis::pipe();
        self.push_enqueue(&mut pipe, job, &blob, now);
        let () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::wrap(e, "failed to enqueue job").with_kind(ErrorKind::Internal))?;

        self.bump_enqueue_stats(&mut conn, 1).await;
        counter!("tq.jobs.enqueued").increment(1);
        self.emit(
            job.id,
            JobEventKind::Enqueued {
                job: Box::new(job.clone()),
            },
        );
        tracing::debug!(
            queue = %self.config.name,
            job_id = %job.id,
            job_type = %job.job_type,
            priority = ?job.priority,
            "job enqueued"
        );
        Ok(())
    }

    async fn enqueue_batch(&self, jobs: &[Job]) -> crate::Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        // Serialize everything up front: any failure aborts the whole batch.
        let now = self.clock.now();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for job in jobs {
            Self::validate_job(job)?;
            let blob = serde_json::to_string(job).map_err(|e| {
                Error::wrap(e, format!("failed to serialize job {}", job.id))
                    .with_kind(ErrorKind::Serialization)
            })?;
            self.push_enqueue(&mut pipe, job, &blob, now);
        }

        let mut conn = self.conn.clone();
        let () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::wrap(e, "failed to enqueue batch").with_kind(ErrorKind::Internal))?;

        self.bump_enqueue_stats(&mut conn, jobs.len() as i64).await;
        counter!("tq.jobs.enqueued").increment(jobs.len() as u64);
        for job in jobs {
            self.emit(
                job.id,
                JobEventKind::Enqueued {
                    job: Box::new(job.clone()),
                },
            );
        }
        tracing::debug!(queue = %self.config.name, count = jobs.len(), "batch enqueued");
        Ok(())
    }

    async fn dequeue(&self) -> crate::Result<Option<Job>> {
        if let Err(e) = self.promote_due().await {
            tracing::warn!(queue = %self.config.name, error = %e, "failed to promote delayed jobs");
        }

        let mut conn = self.conn.clone();
        // The blocking pop gets its own connection so it suspends only this
        // caller, never operations sharing the multiplexed connection.
        let mut pop_conn = self.pop_connection().await?;
        let wait = self.config.poll_interval.as_secs_f64();

        for &priority in JobPriority::DESCENDING {
            // Atomic move from the priority list into processing; blocks
            // briefly so an empty queue polls without spinning.
            let moved: Option<String> = redis::cmd("BLMOVE")
                .arg(self.keys.priority(priority))
                .arg(self.keys.processing())
                .arg("LEFT")
                .arg("RIGHT")
                .arg(wait)
                .query_async(&mut pop_conn)
                .await
                .map_err(|e| {
                    Error::wrap(e, "failed to dequeue job").with_kind(ErrorKind::Internal)
                })?;

            let Some(blob) = moved else {
                continue;
            };

            let mut job: Job = serde_json::from_str(&blob)?;
            let now = self.clock.now();

            // Arm the visibility lease. The value records when the lease was
            // armed so ack can derive processing time. A failure here is
            // recoverable: the reaper treats a missing lease as expired.
            let ttl = self.config.visibility_timeout.as_secs().max(1);
            let armed: redis::RedisResult<()> = conn
                .set_ex(self.keys.visibility(job.id), now.to_rfc3339(), ttl)
                .await;
            if let Err(e) = armed {
                tracing::warn!(
                    queue = %self.config.name,
                    job_id = %job.id,
                    error = %e,
                    "failed to arm visibility lease"
                );
            }

            job.status = JobStatus::Running;
            job.started_at = Some(now);
            job.updated_at = now;

            self.bump_dequeue_stats(&mut conn).await;
            counter!("tq.jobs.dequeued").increment(1);
            self.emit(job.id, JobEventKind::Dequeued);
            tracing::debug!(
                queue = %self.config.name,
                job_id = %job.id,
                job_type = %job.job_type,
                "job dequeued"
            );
            return Ok(Some(job));
        }

        Ok(None)
    }

    async fn dequeue_batch(&self, limit: usize) -> crate::Result<Vec<Job>> {
        let limit = if limit == 0 {
            self.config.batch_size
        } else {
            limit
        };

        let mut jobs = Vec::with_capacity(limit);
        for _ in 0..limit {
            match self.dequeue().await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => break,
                Err(e) => {
                    if jobs.is_empty() {
                        return Err(e);
                    }
                    tracing::warn!(
                        queue = %self.config.name,
                        collected = jobs.len(),
                        error = %e,
                        "dequeue batch stopped early"
                    );
                    break;
                }
            }
        }
        Ok(jobs)
    }

    async fn ack(&self, job_id: Uuid) -> crate::Result<()> {
        let mut conn = self.conn.clone();
        let Some((blob, _)) = self.find_processing(&mut conn, job_id).await? else {
            return Err(Error::not_found(format!(
                "job {job_id} not found in processing queue"
            )));
        };

        let vis_key = self.keys.visibility(job_id);
        let armed_at: Option<String> = conn.get(&vis_key).await.map_err(Error::from)?;

        let removed: i64 = conn
            .lrem(self.keys.processing(), 1, &blob)
            .await
            .map_err(Error::from)?;
        if removed == 0 {
            return Err(Error::not_found(format!(
                "job {job_id} not found in processing queue"
            )));
        }

        let cleared: redis::RedisResult<i64> = conn.del(&vis_key).await;
        if let Err(e) = cleared {
            tracing::warn!(job_id = %job_id, error = %e, "failed to clear visibility key");
        }

        // Derive processing time from the lease-arm timestamp.
        if let Some(armed) = armed_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()) {
            let elapsed = self.clock.now() - armed.with_timezone(&Utc);
            let elapsed_ms = elapsed.num_milliseconds().max(0);
            histogram!("tq.job.processing_seconds").record(elapsed_ms as f64 / 1000.0);
            let result: redis::RedisResult<()> = redis::pipe()
                .hincr(self.keys.stats(), "processing_time_total_ms", elapsed_ms)
                .ignore()
                .hincr(self.keys.stats(), "total_acked", 1)
                .ignore()
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                tracing::warn!(job_id = %job_id, error = %e, "failed to update ack stats");
            }
        }

        counter!("tq.jobs.acked").increment(1);
        self.emit(job_id, JobEventKind::Acked);
        tracing::debug!(queue = %self.config.name, job_id = %job_id, "job acknowledged");
        Ok(())
    }

    async fn nack(&self, job_id: Uuid, reason: &str) -> crate::Result<()> {
        let mut conn = self.conn.clone();
        let Some((blob, mut job)) = self.find_processing(&mut conn, job_id).await? else {
            return Err(Error::not_found(format!(
                "job {job_id} not found in processing queue"
            )));
        };

        prepare_retry(&mut job, Some(reason), self.clock.now(), self.backoff.as_ref());
        let dead = job.status == JobStatus::Dead;

        if !self.requeue_processing_entry(&mut conn, &blob, &job).await? {
            return Err(Error::not_found(format!(
                "job {job_id} not found in processing queue"
            )));
        }

        let cleared: redis::RedisResult<i64> = conn.del(self.keys.visibility(job_id)).await;
        if let Err(e) = cleared {
            tracing::warn!(job_id = %job_id, error = %e, "failed to clear visibility key");
        }
        let failed: redis::RedisResult<i64> =
            conn.hincr(self.keys.stats(), "total_failed", 1).await;
        if let Err(e) = failed {
            tracing::warn!(job_id = %job_id, error = %e, "failed to update failure stats");
        }

        counter!("tq.jobs.nacked", "dead" => if dead { "true" } else { "false" }).increment(1);
        self.emit(
            job_id,
            JobEventKind::Nacked {
                retry_count: job.retry_count,
                dead,
                error: reason.to_string(),
            },
        );
        tracing::debug!(
            queue = %self.config.name,
            job_id = %job_id,
            retry_count = job.retry_count,
            dead,
            reason,
            "job nacked"
        );
        Ok(())
    }

    async fn extend(&self, job_id: Uuid, duration: Duration) -> crate::Result<()> {
        let mut conn = self.conn.clone();
        let secs = i64::try_from(duration.as_secs()).unwrap_or(i64::MAX).max(1);
        // EXPIRE on a missing key is a no-op: the lease already lapsed and
        // the reaper owns the job now.
        let refreshed: bool = conn
            .expire(self.keys.visibility(job_id), secs)
            .await
            .map_err(Error::from)?;
        if refreshed {
            self.emit(
                job_id,
                JobEventKind::Extended {
                    duration_secs: duration.as_secs(),
                },
            );
            tracing::debug!(queue = %self.config.name, job_id = %job_id, secs, "lease extended");
        }
        Ok(())
    }

    async fn delete(&self, job_id: Uuid) -> crate::Result<()> {
        let mut conn = self.conn.clone();

        let mut list_keys: Vec<String> = JobPriority::DESCENDING
            .iter()
            .map(|&p| self.keys.priority(p))
            .collect();
        list_keys.push(self.keys.processing());

        for key in &list_keys {
            let entries: Vec<String> = conn.lrange(key, 0, -1).await.map_err(Error::from)?;
            for blob in entries {
                let Ok(job) = serde_json::from_str::<Job>(&blob) else {
                    continue;
                };
                if job.id != job_id {
                    continue;
                }
                let removed: i64 = conn.lrem(key, 1, &blob).await.map_err(Error::from)?;
                if removed > 0 {
                    if *key == self.keys.processing() {
                        let _: redis::RedisResult<i64> =
                            conn.del(self.keys.visibility(job_id)).await;
                    }
                    self.emit(job_id, JobEventKind::Deleted);
                    tracing::debug!(queue = %self.config.name, job_id = %job_id, "job deleted");
                    return Ok(());
                }
            }
        }

        let members: Vec<String> = conn
            .zrange(self.keys.delayed(), 0, -1)
            .await
            .map_err(Error::from)?;
        for member in members {
            let Ok(job) = serde_json::from_str::<Job>(&member) else {
                continue;
            };
            if job.id != job_id {
                continue;
            }
            let removed: i64 = conn
                .zrem(self.keys.delayed(), &member)
                .await
                .map_err(Error::from)?;
            if removed > 0 {
                self.emit(job_id, JobEventKind::Deleted);
                tracing::debug!(queue = %self.config.name, job_id = %job_id, "job deleted");
                return Ok(());
            }
        }

        let entries: Vec<String> = conn
            .lrange(self.keys.dead_letter(), 0, -1)
            .await
            .map_err(Error::from)?;
        for blob in entries {
            let Ok(job) = serde_json::from_str::<Job>(&blob) else {
                continue;
            };
            if job.id != job_id {
                continue;
            }
            let removed: i64 = conn
                .lrem(self.keys.dead_letter(), 1, &blob)
                .await
                .map_err(Error::from)?;
            if removed > 0 {
                self.emit(job_id, JobEventKind::Deleted);
                tracing::debug!(queue = %self.config.name, job_id = %job_id, "job deleted");
                return Ok(());
            }
        }

        Err(Error::not_found(format!("job {job_id} not found")))
    }

    async fn size(&self) -> crate::Result<i64> {
        let mut conn = self.conn.clone();
        let mut total: i64 = 0;
        for &priority in JobPriority::DESCENDING {
            let len: i64 = conn
                .llen(self.keys.priority(priority))
                .await
                .map_err(Error::from)?;
            total += len;
        }
        let delayed: i64 = conn.zcard(self.keys.delayed()).await.map_err(Error::from)?;
        Ok(total + delayed)
    }

    async fn clear(&self) -> crate::Result<()> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn.keys(self.keys.pattern()).await.map_err(Error::from)?;
        let dead_letter = self.keys.dead_letter();
        let doomed: Vec<String> = keys.into_iter().filter(|k| *k != dead_letter).collect();
        if !doomed.is_empty() {
            let () = conn.del(doomed).await.map_err(Error::from)?;
        }
        tracing::info!(queue = %self.config.name, "queue cleared");
        Ok(())
    }

    async fn stats(&self) -> crate::Result<QueueStats> {
        let mut conn = self.conn.clone();
        let size = self.size().await?;
        let processing: i64 = conn
            .llen(self.keys.processing())
            .await
            .map_err(Error::from)?;
        let delayed: i64 = conn.zcard(self.keys.delayed()).await.map_err(Error::from)?;
        let dead_letter: i64 = conn
            .llen(self.keys.dead_letter())
            .await
            .map_err(Error::from)?;

        let hash: std::collections::HashMap<String, String> = conn
            .hgetall(self.keys.stats())
            .await
            .map_err(Error::from)?;
        let counter = |field: &str| hash.get(field).and_then(|v| v.parse::<u64>().ok());
        let total_enqueued = counter("total_enqueued").unwrap_or(0);
        let total_dequeued = counter("total_dequeued").unwrap_or(0);
        let total_acked = counter("total_acked").unwrap_or(0);
        let processing_time_total_ms = counter("processing_time_total_ms").unwrap_or(0);
        let failed = counter("total_failed").unwrap_or(0);

        let last_time = |field: &str| {
            hash.get(field)
                .and_then(|v| v.parse::<i64>().ok())
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
        };

        #[allow(clippy::cast_precision_loss)]
        let avg_processing_time = if total_acked == 0 {
            0.0
        } else {
            processing_time_total_ms as f64 / total_acked as f64 / 1000.0
        };

        Ok(QueueStats {
            name: self.config.name.clone(),
            size,
            processing,
            delayed,
            failed: i64::try_from(failed).unwrap_or(i64::MAX),
            dead_letter,
            enqueue_rate: self.enqueue_rate.observe(total_enqueued),
            dequeue_rate: self.dequeue_rate.observe(total_dequeued),
            avg_processing_time,
            last_enqueue_time: last_time("last_enqueue_time"),
            last_dequeue_time: last_time("last_dequeue_time"),
        })
    }
}
