//! Postgres job repository.
//!
//! Holds the `jobs` table (one row per job, mirroring the primary store)
//! and the append-only `job_events` audit log. Also provides a
//! `SKIP LOCKED` claim for installations that run relational-primary
//! without Redis; both paths observe the same lifecycle invariants.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::error::{Error, ErrorKind};
use crate::models::{Job, JobPriority, JobStatus};
use crate::queue::{JobEvent, JobEventKind};

/// Schema for the mirror. Idempotent; applied by [`JobRepository::migrate`].
pub(crate) const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS jobs (
    id           UUID PRIMARY KEY,
    type         VARCHAR(100) NOT NULL,
    payload      BYTEA NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',
    priority     SMALLINT NOT NULL DEFAULT 1,
    max_retries  INTEGER NOT NULL DEFAULT 3,
    retry_count  INTEGER NOT NULL DEFAULT 0,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    scheduled_at TIMESTAMPTZ,
    started_at   TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    error        TEXT,
    result       BYTEA,
    worker_id    TEXT,
    metadata     JSONB NOT NULL DEFAULT '{}'::jsonb
);

CREATE INDEX IF NOT EXISTS idx_jobs_status       ON jobs (status);
CREATE INDEX IF NOT EXISTS idx_jobs_priority     ON jobs (priority);
CREATE INDEX IF NOT EXISTS idx_jobs_type         ON jobs (type);
CREATE INDEX IF NOT EXISTS idx_jobs_worker_id    ON jobs (worker_id);
CREATE INDEX IF NOT EXISTS idx_jobs_scheduled_at ON jobs (scheduled_at);

CREATE TABLE IF NOT EXISTS job_events (
    id          BIGSERIAL PRIMARY KEY,
    job_id      UUID NOT NULL,
    queue       TEXT NOT NULL,
    event_type  TEXT NOT NULL,
    detail      JSONB NOT NULL DEFAULT '{}'::jsonb,
    occurred_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_events_job_id      ON job_events (job_id);
CREATE INDEX IF NOT EXISTS idx_job_events_occurred_at ON job_events (occurred_at);
";

const POSTGRES_UNIQUE_VIOLATION: &str = "23505";

/// Repository over the relational mirror.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    #[sqlx(rename = "type")]
    job_type: String,
    payload: Vec<u8>,
    status: String,
    priority: i16,
    max_retries: i32,
    retry_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    scheduled_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    result: Option<Vec<u8>>,
    worker_id: Option<String>,
    metadata: Json<BTreeMap<String, Value>>,
}

impl TryFrom<JobRow> for Job {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|()| Error::internal(format!("unknown job status '{}'", row.status)))?;
        let priority = u8::try_from(row.priority)
            .ok()
            .and_then(|p| JobPriority::try_from(p).ok())
            .ok_or_else(|| Error::internal(format!("invalid priority {}", row.priority)))?;
        Ok(Self {
            id: row.id,
            job_type: row.job_type,
            payload: row.payload,
            status,
            priority,
            max_retries: u32::try_from(row.max_retries).unwrap_or(0),
            retry_count: u32::try_from(row.retry_count).unwrap_or(0),
            created_at: row.created_at,
            updated_at: row.updated_at,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error: row.error,
            result: row.result,
            worker_id: row.worker_id,
            metadata: row.metadata.0,
        })
    }
}

impl JobRepository {
    /// Creates a repository over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the schema. Safe to run repeatedly.
    ///
    /// # Errors
    ///
    /// Returns `Database` on DDL failure.
    pub async fn migrate(&self) -> crate::Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    /// Inserts a new job row.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` on a duplicate id, `Database` otherwise.
    pub async fn create(&self, job: &Job) -> crate::Result<()> {
        let result = sqlx::query(
            r"INSERT INTO jobs (
                id, type, payload, status, priority, max_retries, retry_count,
                created_at, updated_at, scheduled_at, started_at, completed_at,
                error, result, worker_id, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(i16::from(u8::from(job.priority)))
        .bind(i32::try_from(job.max_retries).unwrap_or(i32::MAX))
        .bind(i32::try_from(job.retry_count).unwrap_or(i32::MAX))
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error)
        .bind(&job.result)
        .bind(&job.worker_id)
        .bind(Json(&job.metadata))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::debug!(job_id = %job.id, job_type = %job.job_type, "job row created");
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(Error::wrap(
                e,
                format!("job with ID {} already exists", job.id),
            )
            .with_kind(ErrorKind::AlreadyExists)),
            Err(e) => Err(Error::wrap(e, "failed to create job").with_kind(ErrorKind::Database)),
        }
    }

    /// Inserts or fully replaces a job row.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    pub async fn upsert(&self, job: &Job) -> crate::Result<()> {
        sqlx::query(
            r"INSERT INTO jobs (
                id, type, payload, status, priority, max_retries, retry_count,
                created_at, updated_at, scheduled_at, started_at, completed_at,
                error, result, worker_id, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                retry_count = EXCLUDED.retry_count,
                updated_at = EXCLUDED.updated_at,
                scheduled_at = EXCLUDED.scheduled_at,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                error = EXCLUDED.error,
                result = EXCLUDED.result,
                worker_id = EXCLUDED.worker_id,
                metadata = EXCLUDED.metadata",
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(i16::from(u8::from(job.priority)))
        .bind(i32::try_from(job.max_retries).unwrap_or(i32::MAX))
        .bind(i32::try_from(job.retry_count).unwrap_or(i32::MAX))
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.scheduled_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error)
        .bind(&job.result)
        .bind(&job.worker_id)
        .bind(Json(&job.metadata))
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    /// Fetches a job by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing row, `Database` otherwise.
    pub async fn get(&self, id: Uuid) -> crate::Result<Job> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::from)?;
        row.map_or_else(
            || Err(Error::not_found(format!("job {id} not found"))),
            Job::try_from,
        )
    }

    /// Lists jobs in a status, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    pub async fn list_by_status(&self, status: JobStatus, limit: i64) -> crate::Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM jobs WHERE status = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?;
        rows.into_iter().map(Job::try_from).collect()
    }

    /// Atomically claims the next due pending job for `claimed_by`.
    ///
    /// Relational-primary counterpart of the Redis dequeue: one claimant
    /// wins via `FOR UPDATE SKIP LOCKED`; losers see the next row. Returns
    /// `None` when nothing is due.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    pub async fn claim_next_job(&self, claimed_by: &str) -> crate::Result<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(
            r"UPDATE jobs SET
                status = 'running',
                started_at = now(),
                updated_at = now(),
                worker_id = $1
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                  AND (scheduled_at IS NULL OR scheduled_at <= now())
                ORDER BY priority DESC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *",
        )
        .bind(claimed_by)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)?;
        row.map(Job::try_from).transpose()
    }

    /// Appends an event to the audit log.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    pub async fn append_event(&self, event: &JobEvent) -> crate::Result<()> {
        let detail = serde_json::to_value(&event.kind)?;
        sqlx::query(
            "INSERT INTO job_events (job_id, queue, event_type, detail, occurred_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.job_id)
        .bind(&event.queue)
        .bind(event.event_type())
        .bind(Json(detail))
        .bind(event.at)
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    /// Mirrors one lifecycle event: updates the job row and appends to the
    /// audit log.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    pub async fn apply_event(&self, event: &JobEvent) -> crate::Result<()> {
        match &event.kind {
            JobEventKind::Enqueued { job } => self.upsert(job).await?,
            JobEventKind::Dequeued => {
                sqlx::query(
                    "UPDATE jobs SET status = 'running', started_at = $2, updated_at = $2
                     WHERE id = $1",
                )
                .bind(event.job_id)
                .bind(event.at)
                .execute(&self.pool)
                .await
                .map_err(Error::from)?;
            }
            JobEventKind::Acked => {
                sqlx::query(
                    "UPDATE jobs SET status = 'completed', completed_at = $2, updated_at = $2
                     WHERE id = $1",
                )
                .bind(event.job_id)
                .bind(event.at)
                .execute(&self.pool)
                .await
                .map_err(Error::from)?;
            }
            JobEventKind::Nacked {
                retry_count,
                dead,
                error,
            } => {
                let status = if *dead { JobStatus::Dead } else { JobStatus::Retrying };
                sqlx::query(
                    "UPDATE jobs SET status = $2, retry_count = $3, error = $4, updated_at = $5,
                         completed_at = CASE WHEN $2 = 'dead' THEN $5 ELSE completed_at END
                     WHERE id = $1",
                )
                .bind(event.job_id)
                .bind(status.as_str())
                .bind(i32::try_from(*retry_count).unwrap_or(i32::MAX))
                .bind(error)
                .bind(event.at)
                .execute(&self.pool)
                .await
                .map_err(Error::from)?;
            }
            JobEventKind::Reaped { retry_count, dead } => {
                let status = if *dead { JobStatus::Dead } else { JobStatus::Retrying };
                sqlx::query(
                    "UPDATE jobs SET status = $2, retry_count = $3, updated_at = $4,
                         completed_at = CASE WHEN $2 = 'dead' THEN $4 ELSE completed_at END
                     WHERE id = $1",
                )
                .bind(event.job_id)
                .bind(status.as_str())
                .bind(i32::try_from(*retry_count).unwrap_or(i32::MAX))
                .bind(event.at)
                .execute(&self.pool)
                .await
                .map_err(Error::from)?;
            }
            JobEventKind::Promoted => {
                sqlx::query("UPDATE jobs SET status = 'pending', updated_at = $2 WHERE id = $1")
                    .bind(event.job_id)
                    .bind(event.at)
                    .execute(&self.pool)
                    .await
                    .map_err(Error::from)?;
            }
            // Extensions and deletions only touch the audit log; deleted
            // rows are retained for audit until pruned by retention.
            JobEventKind::Extended { .. } | JobEventKind::Deleted => {}
        }

        self.append_event(event).await
    }

    /// Prunes terminal job rows older than `cutoff` (retention cleanup).
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    pub async fn prune_terminal_before(&self, cutoff: DateTime<Utc>) -> crate::Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'dead') AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(result.rows_affected())
    }

    /// Counts audit events recorded for a job.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    pub async fn event_count(&self, job_id: Uuid) -> crate::Result<i64> {
        let row = sqlx::query("SELECT count(*) AS n FROM job_events WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::from)?;
        row.try_get("n").map_err(Error::from)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == POSTGRES_UNIQUE_VIOLATION)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_covers_required_indexes() {
        for index in [
            "idx_jobs_status",
            "idx_jobs_priority",
            "idx_jobs_type",
            "idx_jobs_worker_id",
            "idx_jobs_scheduled_at",
        ] {
            assert!(SCHEMA.contains(index), "missing index {index}");
        }
        assert!(SCHEMA.contains("job_events"));
    }

    #[test]
    fn test_row_conversion() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = JobRow {
            id,
            job_type: "send_email".to_string(),
            payload: b"{}".to_vec(),
            status: "retrying".to_string(),
            priority: 2,
            max_retries: 5,
            retry_count: 1,
            created_at: now,
            updated_at: now,
            scheduled_at: Some(now),
            started_at: None,
            completed_at: None,
            error: Some("boom".to_string()),
            result: None,
            worker_id: Some("worker-1".to_string()),
            metadata: Json(BTreeMap::new()),
        };

        let job = Job::try_from(row).expect("convert");
        assert_eq!(job.id, id);
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.priority, JobPriority::High);
        assert_eq!(job.max_retries, 5);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_row_conversion_rejects_unknown_status() {
        let now = Utc::now();
        let row = JobRow {
            id: Uuid::new_v4(),
            job_type: "t".to_string(),
            payload: Vec::new(),
            status: "archived".to_string(),
            priority: 1,
            max_retries: 3,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            worker_id: None,
            metadata: Json(BTreeMap::new()),
        };
        assert!(Job::try_from(row).is_err());
    }

    #[test]
    fn test_row_conversion_rejects_invalid_priority() {
        let now = Utc::now();
        let row = JobRow {
            id: Uuid::new_v4(),
            job_type: "t".to_string(),
            payload: Vec::new(),
            status: "pending".to_string(),
            priority: 9,
            max_retries: 3,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            worker_id: None,
            metadata: Json(BTreeMap::new()),
        };
        assert!(Job::try_from(row).is_err());
    }
}
