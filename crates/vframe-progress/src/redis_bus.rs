//! Event bus over Redis Pub/Sub.
//!
//! Lets the worker process publish events that the API process relays to
//! viewers.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use tracing::{debug, warn};

use vframe_models::{JobEvent, JobId};

use crate::bus::{EventBus, EventStream};
use crate::error::ProgressResult;

/// Redis Pub/Sub implementation of [`EventBus`].
pub struct RedisEventBus {
    client: redis::Client,
}

impl RedisEventBus {
    /// Create a new Redis event bus.
    pub fn new(redis_url: &str) -> ProgressResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Get the channel name for a job.
    pub fn channel_name(job_id: &JobId) -> String {
        format!("progress:{}", job_id)
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, job_id: &JobId, event: &JobEvent) -> ProgressResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let channel = Self::channel_name(job_id);
        let payload = serde_json::to_string(event)?;

        debug!("Publishing {} event to {}", event.kind().as_str(), channel);
        conn.publish::<_, _, ()>(channel, payload).await?;

        Ok(())
    }

    async fn subscribe(&self, job_id: &JobId) -> ProgressResult<EventStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = Self::channel_name(job_id);

        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            match serde_json::from_str::<JobEvent>(&payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Dropping undecodable event: {}", e);
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name() {
        assert_eq!(
            RedisEventBus::channel_name(&JobId::from_string("abc")),
            "progress:abc"
        );
    }

    #[test]
    fn test_new_rejects_bad_url() {
        assert!(RedisEventBus::new("not a url").is_err());
    }
}
