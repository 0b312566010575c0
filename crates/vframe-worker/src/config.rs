//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use vframe_ml_client::MlClientConfig;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Redis URL for the progress store, event bus and job records
    pub redis_url: String,
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Maximum frames described in parallel within one job
    pub frame_concurrency: usize,
    /// Sampling rate used when a job does not name one
    pub default_fps: f64,
    /// Root directory for extracted frames
    pub frames_dir: PathBuf,
    /// Prefix of viewer-facing frame URLs
    pub frame_url_prefix: String,
    /// Port for the Prometheus exporter, disabled when unset
    pub metrics_port: Option<u16>,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Captioning, embedding and vector-store clients
    pub ml: MlClientConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            max_concurrent_jobs: 2,
            frame_concurrency: 4,
            default_fps: 1.0,
            frames_dir: PathBuf::from("/tmp/vframe/frames"),
            frame_url_prefix: "/frames".to_string(),
            metrics_port: None,
            shutdown_timeout: Duration::from_secs(60),
            ml: MlClientConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            frame_concurrency: std::env::var("WORKER_FRAME_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
            default_fps: std::env::var("WORKER_DEFAULT_FPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0),
            frames_dir: std::env::var("WORKER_FRAMES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/vframe/frames")),
            frame_url_prefix: std::env::var("FRAME_URL_PREFIX")
                .unwrap_or_else(|_| "/frames".to_string()),
            metrics_port: std::env::var("WORKER_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            ml: MlClientConfig::from_env(),
        }
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_JOBS must be at least 1"));
        }
        if !self.default_fps.is_finite() || self.default_fps <= 0.0 {
            return Err(WorkerError::config_error(format!(
                "WORKER_DEFAULT_FPS must be positive, got {}",
                self.default_fps
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.frame_concurrency, 4);
        assert_eq!(config.default_fps, 1.0);
        assert_eq!(config.frame_url_prefix, "/frames");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = WorkerConfig {
            default_fps: 0.0,
            ..WorkerConfig::default()
        };
        assert!(matches!(config.validate(), Err(WorkerError::ConfigError(_))));

        let config = WorkerConfig {
            max_concurrent_jobs: 0,
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
