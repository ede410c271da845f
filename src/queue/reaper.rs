//! Background lease reaper.
//!
//! Periodically promotes due delayed jobs and reclaims processing entries
//! whose visibility lease expired. A single reaper per queue name
//! suffices; running more is safe because each reclaim is keyed off the
//! exact processing entry, so only one actor wins.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::redis::RedisQueue;

const MIN_INTERVAL: Duration = Duration::from_secs(5);

/// Periodic maintenance task for one queue.
pub struct Reaper {
    queue: Arc<RedisQueue>,
    interval: Duration,
}

impl Reaper {
    /// Creates a reaper with the interval derived from the queue's
    /// visibility timeout.
    #[must_use]
    pub fn new(queue: Arc<RedisQueue>) -> Self {
        let interval = Self::interval_for(queue.config().visibility_timeout);
        Self { queue, interval }
    }

    /// Overrides the pass interval (tests and aggressive deployments).
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Derives the pass interval: a third of the visibility timeout, with
    /// a five second floor.
    #[must_use]
    pub fn interval_for(visibility_timeout: Duration) -> Duration {
        (visibility_timeout / 3).max(MIN_INTERVAL)
    }

    /// Spawns the reaper loop on the current runtime.
    #[must_use]
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let queue = self.queue;
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately, giving one pass at startup.
            loop {
                tokio::select! {
                    _ = ticker.tick() => match queue.reaper_pass().await {
                        Ok(report) => {
                            if report.promoted > 0 || report.requeued > 0 || report.dead_lettered > 0 {
                                tracing::info!(
                                    queue = %queue.config().name,
                                    promoted = report.promoted,
                                    requeued = report.requeued,
                                    dead_lettered = report.dead_lettered,
                                    "reaper pass complete"
                                );
                            }
                        }
                        Err(e) => {
                            tracing::warn!(queue = %queue.config().name, error = %e, "reaper pass failed");
                        }
                    },
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(queue = %queue.config().name, "reaper stopped");
        });

        ReaperHandle { shutdown_tx, task }
    }
}

/// Handle controlling a spawned reaper.
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signals the reaper to stop and waits for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }

    /// Aborts the reaper without waiting.
    pub fn abort(&self) {
        self.task.abort();
    }
}
