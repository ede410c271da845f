//! Write-behind audit mirror.
//!
//! Consumes lifecycle events from the queue's event channel and mirrors
//! them into Postgres. The queue never waits on the mirror: writes are
//! best-effort, failures are logged, and the subscriber simply stops when
//! every sender is dropped.

use tokio::task::JoinHandle;

use crate::queue::EventReceiver;

use super::JobRepository;

/// Subscriber bridging the event channel to the relational store.
pub struct AuditMirror {
    repo: JobRepository,
    events: EventReceiver,
}

impl AuditMirror {
    /// Creates a mirror over the repository and the receiver half of the
    /// queue's event channel.
    #[must_use]
    pub const fn new(repo: JobRepository, events: EventReceiver) -> Self {
        Self { repo, events }
    }

    /// Spawns the mirror loop. The task exits when the channel closes.
    #[must_use]
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = self.events.recv().await {
                if let Err(e) = self.repo.apply_event(&event).await {
                    tracing::warn!(
                        job_id = %event.job_id,
                        queue = %event.queue,
                        event = event.event_type(),
                        error = %e,
                        "audit mirror write failed"
                    );
                }
            }
            tracing::debug!("audit mirror stopped");
        })
    }
}
