//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information.

use tracing::{error, info, Span};
use vframe_models::JobId;

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a new job logger for a specific job and operation.
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Create a tracing span for this job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "frame_processing");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.operation(), "frame_processing");
    }
}
