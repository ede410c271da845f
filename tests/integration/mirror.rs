//! Audit mirror tests against live Postgres.

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use tq::{Job, JobEvent, JobEventKind, JobPriority, JobRepository, JobStatus};

use crate::common::database_url;

async fn test_repo() -> JobRepository {
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&database_url())
        .await
        .expect("failed to connect to Postgres - is it running?");
    let repo = JobRepository::new(pool);
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Postgres (enable feature integration)"
)]
async fn test_create_get_round_trip() {
    let repo = test_repo().await;

    let job = Job::builder("mirror", b"payload".to_vec())
        .priority(JobPriority::High)
        .metadata("tenant", "acme")
        .build();
    repo.create(&job).await.expect("create");

    let loaded = repo.get(job.id).await.expect("get");
    assert_eq!(loaded.id, job.id);
    assert_eq!(loaded.job_type, "mirror");
    assert_eq!(loaded.payload, b"payload");
    assert_eq!(loaded.priority, JobPriority::High);
    assert_eq!(loaded.metadata.get("tenant").unwrap(), "acme");
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Postgres (enable feature integration)"
)]
async fn test_duplicate_create_reports_already_exists() {
    let repo = test_repo().await;

    let job = Job::new("mirror", b"x".to_vec(), JobPriority::Normal);
    repo.create(&job).await.expect("create");
    let err = repo.create(&job).await.expect_err("duplicate");
    assert!(err.is_conflict());
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Postgres (enable feature integration)"
)]
async fn test_get_missing_reports_not_found() {
    let repo = test_repo().await;
    let err = repo.get(uuid::Uuid::new_v4()).await.expect_err("missing");
    assert!(err.is_not_found());
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Postgres (enable feature integration)"
)]
async fn test_claim_next_job_prefers_priority() {
    let repo = test_repo().await;

    // Unique type per run keeps this isolated from other test rows.
    let tag = format!("claim-{}", uuid::Uuid::new_v4().simple());
    let normal = Job::builder(tag.clone(), b"n".to_vec()).build();
    let critical = Job::builder(tag.clone(), b"c".to_vec())
        .priority(JobPriority::Critical)
        .build();
    repo.create(&normal).await.expect("create normal");
    repo.create(&critical).await.expect("create critical");

    let claimed = repo
        .claim_next_job("worker-1")
        .await
        .expect("claim")
        .expect("job available");
    assert_eq!(claimed.id, critical.id);
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Postgres (enable feature integration)"
)]
async fn test_apply_event_lifecycle() {
    let repo = test_repo().await;

    let job = Job::new("mirror", b"ev".to_vec(), JobPriority::Normal);
    let id = job.id;

    let enqueued = JobEvent::new(
        id,
        "default",
        Utc::now(),
        JobEventKind::Enqueued {
            job: Box::new(job),
        },
    );
    repo.apply_event(&enqueued).await.expect("enqueued");
    assert_eq!(repo.get(id).await.expect("get").status, JobStatus::Pending);

    let dequeued = JobEvent::new(id, "default", Utc::now(), JobEventKind::Dequeued);
    repo.apply_event(&dequeued).await.expect("dequeued");
    assert_eq!(repo.get(id).await.expect("get").status, JobStatus::Running);

    let nacked = JobEvent::new(
        id,
        "default",
        Utc::now(),
        JobEventKind::Nacked {
            retry_count: 3,
            dead: true,
            error: "boom".to_string(),
        },
    );
    repo.apply_event(&nacked).await.expect("nacked");

    let final_row = repo.get(id).await.expect("get");
    assert_eq!(final_row.status, JobStatus::Dead);
    assert_eq!(final_row.retry_count, 3);
    assert_eq!(final_row.error.as_deref(), Some("boom"));
    assert!(final_row.completed_at.is_some());

    assert_eq!(repo.event_count(id).await.expect("count"), 3);
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Postgres (enable feature integration)"
)]
async fn test_list_by_status() {
    let repo = test_repo().await;

    let job = Job::new("mirror", b"ls".to_vec(), JobPriority::Low);
    repo.create(&job).await.expect("create");

    let pending = repo
        .list_by_status(JobStatus::Pending, 100)
        .await
        .expect("list");
    assert!(pending.iter().any(|j| j.id == job.id));
}
