//! tq - distributed task-queue core
//!
//! A Redis-backed priority job queue with visibility-timeout leases,
//! bounded retries, and dead-lettering. Producers enqueue jobs into
//! per-priority lists (or a delayed set for scheduled work); consumers
//! dequeue under a lease and finish with ack, nack, extend, or delete.
//! Delivery is at-least-once: a worker that dies mid-job loses its lease
//! and the reaper re-enqueues the work.
//!
//! An optional write-behind Postgres mirror records every lifecycle
//! transition for audit and query, fed through a one-way event channel so
//! the queue never depends on the mirror.

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod queue;
pub mod retry;
pub mod storage;
pub mod validation;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use models::{
    Backoff, FixedBackoff, Job, JobBuilder, JobPriority, JobRequest, JobResult, JobStatus,
    LinearBackoff, RetryPolicy,
};
pub use queue::{
    JobEvent, JobEventKind, Queue, QueueConfig, QueueStats, ReapReport, Reaper, ReaperHandle,
    RedisQueue,
};
pub use storage::{AuditMirror, JobRepository};
