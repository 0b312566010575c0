//! Job intake queue using Redis Streams.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vframe_models::JobId;

use crate::error::{ProgressError, ProgressResult};

/// Request to extract and describe the frames of one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessFramesJob {
    /// Job ID
    pub job_id: JobId,
    /// Path of the uploaded video
    pub video_path: String,
    /// Target extraction rate; the worker default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl ProcessFramesJob {
    pub fn new(job_id: JobId, video_path: impl Into<String>) -> Self {
        Self {
            job_id,
            video_path: video_path.into(),
            fps: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "vframe:jobs".to_string(),
            consumer_group: "vframe:workers".to_string(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
        }
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> ProgressResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> ProgressResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> ProgressResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ProgressError::connection_failed(e.to_string()))?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(ProgressError::Redis(e)),
        }

        Ok(())
    }

    /// Enqueue a job. Returns the stream message ID.
    pub async fn enqueue(&self, job: &ProcessFramesJob) -> ProgressResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        info!("Enqueued job {} with message ID {}", job.job_id, message_id);
        Ok(message_id)
    }

    /// Acknowledge a job and drop it from the stream.
    pub async fn ack(&self, message_id: &str) -> ProgressResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Get queue length.
    pub async fn len(&self) -> ProgressResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Read up to `count` new jobs for this consumer, blocking for `block_ms`.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> ProgressResult<Vec<(String, ProcessFramesJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        let Some(result) = result else {
            return Ok(jobs);
        };

        for stream_key in result.keys {
            for entry in stream_key.ids {
                let message_id = entry.id.clone();

                if let Some(redis::Value::BulkString(payload)) = entry.map.get("job") {
                    match parse_payload(payload) {
                        Ok(job) => {
                            debug!("Consumed job {} from stream", job.job_id);
                            jobs.push((message_id, job));
                        }
                        Err(e) => {
                            warn!("Failed to parse job payload: {}", e);
                            // Ack the malformed message so it is not redelivered
                            self.ack(&message_id).await.ok();
                        }
                    }
                }
            }
        }

        Ok(jobs)
    }
}

fn parse_payload(payload: &[u8]) -> ProgressResult<ProcessFramesJob> {
    let payload_str = String::from_utf8_lossy(payload);
    Ok(serde_json::from_str(&payload_str)?)
}
