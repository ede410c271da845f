//! Lifecycle events emitted by the queue backend.
//!
//! The backend owns only the sender side of a one-way channel; the audit
//! mirror (or any other subscriber) consumes the receiver. The backend
//! never learns whether a subscriber exists, and a send failure means the
//! subscriber is gone and is silently ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::Job;

/// Sender half handed to the queue backend.
pub type EventSender = mpsc::UnboundedSender<JobEvent>;

/// Receiver half handed to a subscriber such as the audit mirror.
pub type EventReceiver = mpsc::UnboundedReceiver<JobEvent>;

/// Creates a lifecycle event channel.
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A state transition observed by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub queue: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: JobEventKind,
}

/// The transition that occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEventKind {
    /// Job accepted into a priority list or the delayed set.
    ///
    /// Carries the full job so the mirror can create its row.
    Enqueued { job: Box<Job> },
    /// Job handed to a worker under a fresh lease.
    Dequeued,
    /// Worker acknowledged completion; job removed.
    Acked,
    /// Worker reported failure; job retried or dead-lettered.
    Nacked {
        retry_count: u32,
        dead: bool,
        error: String,
    },
    /// Lease deadline extended.
    Extended { duration_secs: u64 },
    /// Job purged by an operator.
    Deleted,
    /// Reaper reclaimed an expired lease.
    Reaped { retry_count: u32, dead: bool },
    /// Promoter moved a due delayed job into its priority list.
    Promoted,
}

impl JobEvent {
    /// Creates an event stamped at `at`.
    #[must_use]
    pub fn new(job_id: Uuid, queue: impl Into<String>, at: DateTime<Utc>, kind: JobEventKind) -> Self {
        Self {
            job_id,
            queue: queue.into(),
            at,
            kind,
        }
    }

    /// Stable name of the event type for the audit log.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self.kind {
            JobEventKind::Enqueued { .. } => "enqueued",
            JobEventKind::Dequeued => "dequeued",
            JobEventKind::Acked => "acked",
            JobEventKind::Nacked { .. } => "nacked",
            JobEventKind::Extended { .. } => "extended",
            JobEventKind::Deleted => "deleted",
            JobEventKind::Reaped { .. } => "reaped",
            JobEventKind::Promoted => "promoted",
        }
    }
}
