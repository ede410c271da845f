use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Represents the status of a job in the queue.
///
/// Jobs progress through states: `Pending` -> `Running` -> acked (removed)
/// or `Failed`. A nacked job passes through `Retrying` back to `Pending`,
/// or lands in `Dead` once retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in a priority list or the delayed set.
    Pending,
    /// Job has been dequeued and is leased to a worker.
    Running,
    /// Job finished successfully (mirror-side record only).
    Completed,
    /// Job failed and is awaiting a retry decision.
    Failed,
    /// Job was nacked and is scheduled for a backoff retry.
    Retrying,
    /// Job exhausted its retries and sits in the dead-letter list.
    Dead,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl JobStatus {
    /// All status variants, for lookups and exhaustive listings.
    pub const ALL: &'static [Self] = &[
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Retrying,
        Self::Dead,
    ];

    /// Lowercase string used on the wire and in the relational mirror.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Dead => "dead",
        }
    }
}

impl FromStr for JobStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "dead" => Ok(Self::Dead),
            _ => Err(()),
        }
    }
}

/// Priority level of a job. Higher levels strictly preempt lower ones
/// at dequeue time; within one level ordering is FIFO.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum JobPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl JobPriority {
    /// Priorities in dequeue order: critical first.
    pub const DESCENDING: &'static [Self] =
        &[Self::Critical, Self::High, Self::Normal, Self::Low];

    /// Queue-name suffix for this priority's list.
    #[must_use]
    pub const fn queue_name(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl From<JobPriority> for u8 {
    fn from(priority: JobPriority) -> Self {
        priority as Self
    }
}

impl TryFrom<u8> for JobPriority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Low),
            1 => Ok(Self::Normal),
            2 => Ok(Self::High),
            3 => Ok(Self::Critical),
            other => Err(format!("invalid priority {other}, expected 0-3")),
        }
    }
}

/// A job in the distributed queue.
///
/// Jobs are serialized to JSON at rest; `payload` and `result` are opaque
/// byte strings carried as base64. `id` and `priority` are immutable after
/// creation. Use [`Job::builder`] for anything beyond the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for the job.
    pub id: Uuid,

    /// Type tag routing the job to a handler (1-100 chars, `[A-Za-z0-9_-]+`).
    #[serde(rename = "type")]
    pub job_type: String,

    /// Opaque payload bytes, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,

    /// Current status of the job.
    #[serde(default)]
    pub status: JobStatus,

    /// Priority level; immutable after creation.
    #[serde(default)]
    pub priority: JobPriority,

    /// Maximum number of retries before dead-lettering (0-10).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Number of retries consumed so far.
    #[serde(default)]
    pub retry_count: u32,

    /// Timestamp when the job was created.
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,

    /// When set and in the future, the job resides in the delayed set
    /// until this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,

    /// Timestamp when the current lease was armed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Timestamp when the job reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Error message from the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Result bytes from a completed execution, base64 on the wire.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_opt_bytes"
    )]
    pub result: Option<Vec<u8>>,

    /// ID of the worker currently holding the lease.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    /// Producer-supplied metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

const fn default_max_retries() -> u32 {
    3
}

impl Job {
    /// Creates a new pending job with default retry settings.
    #[must_use]
    pub fn new(job_type: impl Into<String>, payload: Vec<u8>, priority: JobPriority) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            payload,
            status: JobStatus::Pending,
            priority,
            max_retries: default_max_retries(),
            retry_count: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            worker_id: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a builder for fluent configuration.
    #[must_use]
    pub fn builder(job_type: impl Into<String>, payload: Vec<u8>) -> JobBuilder {
        JobBuilder::new(job_type, payload)
    }

    /// True if another retry is allowed.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// True if the job is due for execution at `now`.
    ///
    /// Jobs without a schedule are always due; a future `scheduled_at`
    /// keeps the job in the delayed set.
    #[must_use]
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_none_or(|at| at <= now)
    }
}

/// Builder for [`Job`] instances.
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    /// Creates a builder with the required fields and normal priority.
    #[must_use]
    pub fn new(job_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            job: Job::new(job_type, payload, JobPriority::Normal),
        }
    }

    /// Sets a specific job ID instead of generating one.
    #[must_use]
    pub fn id(mut self, id: Uuid) -> Self {
        self.job.id = id;
        self
    }

    /// Sets the priority level.
    #[must_use]
    pub const fn priority(mut self, priority: JobPriority) -> Self {
        self.job.priority = priority;
        self
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.job.max_retries = max_retries;
        self
    }

    /// Schedules the job for future execution.
    #[must_use]
    pub const fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.job.scheduled_at = Some(at);
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.job.metadata.insert(key.into(), value.into());
        self
    }

    /// Builds the job.
    #[must_use]
    pub fn build(self) -> Job {
        self.job
    }
}

/// Producer-facing request to create a job.
///
/// Validated by [`JobRequest::validate`] before conversion into a [`Job`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Type tag (1-100 chars, `[A-Za-z0-9_-]+`).
    #[serde(rename = "type")]
    pub job_type: String,

    /// Opaque payload bytes, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,

    /// Priority level, normal when omitted.
    #[serde(default)]
    pub priority: JobPriority,

    /// Maximum retries (0-10), default 3 when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Optional future execution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,

    /// Producer-supplied metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl JobRequest {
    /// Validates the request fields.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error listing every offending field.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::validation::{job_type, max_retries, required, Field};

        crate::validation::validate([
            Field::new("type", self.job_type.as_str())
                .rule(required())
                .rule(job_type()),
            Field::new("payload", self.payload.as_slice()).rule(required()),
            Field::new("max_retries", self.max_retries.map(i64::from)).rule(max_retries()),
        ])
    }

    /// Converts the request into a [`Job`].
    #[must_use]
    pub fn into_job(self) -> Job {
        let mut job = Job::new(self.job_type, self.payload, self.priority);
        if let Some(max_retries) = self.max_retries {
            job.max_retries = max_retries;
        }
        job.scheduled_at = self.scheduled_at;
        job.metadata = self.metadata;
        job
    }
}

/// Completion record for a finished job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_opt_bytes"
    )]
    pub result: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
    /// Wall-clock processing duration in milliseconds.
    pub duration_ms: u64,
}

impl JobResult {
    /// Processing duration as a [`Duration`].
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_opt_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&BASE64.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|s| BASE64.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
