//! Worker error types.

use thiserror::Error;

use vframe_models::{JobId, JobState};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Frame extraction failed: {0}")]
    ExtractionFailed(#[from] vframe_media::MediaError),

    #[error("Frame {index} failed: {message}")]
    FrameFailed { index: u32, message: String },

    #[error("Job {job_id} already finished ({state})")]
    AlreadyFinished { job_id: JobId, state: JobState },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Progress error: {0}")]
    Progress(#[from] vframe_progress::ProgressError),

    #[error("ML service error: {0}")]
    Ml(#[from] vframe_ml_client::MlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn frame_failed(index: u32, message: impl Into<String>) -> Self {
        Self::FrameFailed {
            index,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the error ended the job before any frame was processed.
    pub fn is_extraction_failure(&self) -> bool {
        matches!(self, WorkerError::ExtractionFailed(_))
    }
}
