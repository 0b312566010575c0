//! Job metadata and lifecycle enforcement.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use vframe_models::{JobId, JobRecord, JobState};

use crate::error::{ProgressError, ProgressResult};

/// Persistent job metadata.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a pending record. Returns the existing record if one is present.
    async fn create(&self, job_id: &JobId) -> ProgressResult<JobRecord>;

    async fn get(&self, job_id: &JobId) -> ProgressResult<JobRecord>;

    /// Store a new state, with an error message for failed jobs.
    async fn set_state(
        &self,
        job_id: &JobId,
        state: JobState,
        error_message: Option<String>,
    ) -> ProgressResult<()>;

    async fn set_frame_count(&self, job_id: &JobId, frame_count: u32) -> ProgressResult<()>;
}

/// Repository held in process memory.
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: DashMap<JobId, JobRecord>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(
        &self,
        job_id: &JobId,
        f: impl FnOnce(&mut JobRecord),
    ) -> ProgressResult<()> {
        let mut record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ProgressError::not_found(job_id))?;
        f(record.value_mut());
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job_id: &JobId) -> ProgressResult<JobRecord> {
        let record = self
            .jobs
            .entry(job_id.clone())
            .or_insert_with(|| JobRecord::new(job_id.clone()));
        Ok(record.value().clone())
    }

    async fn get(&self, job_id: &JobId) -> ProgressResult<JobRecord> {
        self.jobs
            .get(job_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| ProgressError::not_found(job_id))
    }

    async fn set_state(
        &self,
        job_id: &JobId,
        state: JobState,
        error_message: Option<String>,
    ) -> ProgressResult<()> {
        self.update(job_id, |record| {
            record.processing_state = state;
            if error_message.is_some() {
                record.error_message = error_message;
            }
        })
    }

    async fn set_frame_count(&self, job_id: &JobId, frame_count: u32) -> ProgressResult<()> {
        self.update(job_id, |record| record.frame_count = Some(frame_count))
    }
}

/// Repository stored as one Redis hash per job.
pub struct RedisJobRepository {
    client: redis::Client,
}

impl RedisJobRepository {
    pub fn new(redis_url: &str) -> ProgressResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Hash key for a job record.
    pub fn key(job_id: &JobId) -> String {
        format!("vframe:job:{}", job_id)
    }

    fn parse_record(job_id: &JobId, fields: HashMap<String, String>) -> ProgressResult<JobRecord> {
        let state = fields
            .get("processing_state")
            .ok_or_else(|| ProgressError::corrupt(format!("job {} has no state", job_id)))?
            .parse::<JobState>()
            .map_err(|e| ProgressError::corrupt(e.to_string()))?;

        let timestamp = |name: &str| -> ProgressResult<DateTime<Utc>> {
            let raw = fields
                .get(name)
                .ok_or_else(|| ProgressError::corrupt(format!("job {} has no {}", job_id, name)))?;
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ProgressError::corrupt(format!("bad {}: {}", name, e)))
        };

        let frame_count = match fields.get("frame_count") {
            Some(raw) => Some(
                raw.parse::<u32>()
                    .map_err(|e| ProgressError::corrupt(format!("bad frame_count: {}", e)))?,
            ),
            None => None,
        };

        Ok(JobRecord {
            job_id: job_id.clone(),
            processing_state: state,
            frame_count,
            error_message: fields.get("error_message").cloned(),
            created_at: timestamp("created_at")?,
            updated_at: timestamp("updated_at")?,
        })
    }

    async fn ensure_exists(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job_id: &JobId,
    ) -> ProgressResult<()> {
        let exists: bool = conn.exists(Self::key(job_id)).await?;
        if exists {
            Ok(())
        } else {
            Err(ProgressError::not_found(job_id))
        }
    }
}

#[async_trait]
impl JobRepository for RedisJobRepository {
    async fn create(&self, job_id: &JobId) -> ProgressResult<JobRecord> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = Self::key(job_id);
        let record = JobRecord::new(job_id.clone());
        let created_at = record.created_at.to_rfc3339();

        redis::pipe()
            .atomic()
            .hset_nx(&key, "processing_state", record.processing_state.as_str())
            .ignore()
            .hset_nx(&key, "created_at", &created_at)
            .ignore()
            .hset_nx(&key, "updated_at", &created_at)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(job_id = %job_id, "Created job record");
        self.get(job_id).await
    }

    async fn get(&self, job_id: &JobId) -> ProgressResult<JobRecord> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(Self::key(job_id)).await?;
        if fields.is_empty() {
            return Err(ProgressError::not_found(job_id));
        }
        Self::parse_record(job_id, fields)
    }

    async fn set_state(
        &self,
        job_id: &JobId,
        state: JobState,
        error_message: Option<String>,
    ) -> ProgressResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        self.ensure_exists(&mut conn, job_id).await?;

        let mut fields = vec![
            ("processing_state", state.as_str().to_string()),
            ("updated_at", Utc::now().to_rfc3339()),
        ];
        if let Some(message) = error_message {
            fields.push(("error_message", message));
        }
        conn.hset_multiple::<_, _, _, ()>(Self::key(job_id), &fields)
            .await?;
        Ok(())
    }

    async fn set_frame_count(&self, job_id: &JobId, frame_count: u32) -> ProgressResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        self.ensure_exists(&mut conn, job_id).await?;

        conn.hset_multiple::<_, _, _, ()>(
            Self::key(job_id),
            &[
                ("frame_count", frame_count.to_string()),
                ("updated_at", Utc::now().to_rfc3339()),
            ],
        )
        .await?;
        Ok(())
    }
}

/// Enforces the job lifecycle against a repository.
///
/// Each job has a single owning orchestrator, so a read followed by a write
/// cannot interleave with another transition of the same job.
#[derive(Clone)]
pub struct JobStateMachine {
    repo: Arc<dyn JobRepository>,
}

impl JobStateMachine {
    pub fn new(repo: Arc<dyn JobRepository>) -> Self {
        Self { repo }
    }

    /// Register a job in the pending state.
    pub async fn create(&self, job_id: &JobId) -> ProgressResult<JobRecord> {
        self.repo.create(job_id).await
    }

    pub async fn get(&self, job_id: &JobId) -> ProgressResult<JobRecord> {
        self.repo.get(job_id).await
    }

    pub async fn state(&self, job_id: &JobId) -> ProgressResult<JobState> {
        Ok(self.repo.get(job_id).await?.processing_state)
    }

    /// Frames are extracted: record the count and move to processing.
    pub async fn start_processing(&self, job_id: &JobId, frame_count: u32) -> ProgressResult<()> {
        self.transition(job_id, JobState::Processing, None).await?;
        self.repo.set_frame_count(job_id, frame_count).await
    }

    pub async fn succeed(&self, job_id: &JobId) -> ProgressResult<()> {
        self.transition(job_id, JobState::Success, None).await
    }

    pub async fn fail(&self, job_id: &JobId, message: impl Into<String>) -> ProgressResult<()> {
        self.transition(job_id, JobState::Error, Some(message.into()))
            .await
    }

    async fn transition(
        &self,
        job_id: &JobId,
        next: JobState,
        error_message: Option<String>,
    ) -> ProgressResult<()> {
        let current = self.state(job_id).await?;
        let next = current.transition(next).map_err(|source| {
            warn!(job_id = %job_id, "Rejected transition: {}", source);
            ProgressError::InvalidTransition {
                job_id: job_id.clone(),
                source,
            }
        })?;

        self.repo.set_state(job_id, next, error_message).await?;
        info!(job_id = %job_id, from = %current, to = %next, "Job state changed");
        Ok(())
    }
}
