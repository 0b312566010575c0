//! Progress error types.

use thiserror::Error;
use vframe_models::{InvalidTransition, JobId};

pub type ProgressResult<T> = Result<T, ProgressError>;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Total frames already set for job {0}")]
    TotalAlreadySet(JobId),

    #[error("Frame {index} out of range for job {job_id} ({total} frames)")]
    FrameOutOfRange { job_id: JobId, index: u32, total: u32 },

    #[error("Job {job_id}: {source}")]
    InvalidTransition {
        job_id: JobId,
        #[source]
        source: InvalidTransition,
    },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProgressError {
    pub fn not_found(job_id: &JobId) -> Self {
        Self::JobNotFound(job_id.clone())
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptRecord(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProgressError::JobNotFound(_))
    }
}
