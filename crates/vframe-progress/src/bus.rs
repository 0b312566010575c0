//! Per-job event fan-out.
//!
//! Publishers never block: a subscriber that falls behind skips the events it
//! missed instead of stalling the workers producing them.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::Stream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use vframe_models::{JobEvent, JobId};

use crate::error::ProgressResult;

/// Stream of events for one job.
pub type EventStream = Pin<Box<dyn Stream<Item = JobEvent> + Send>>;

/// Default per-job buffer before slow subscribers start lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Publish/subscribe channel keyed by job.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Deliver `event` to every current subscriber of `job_id`.
    ///
    /// Publishing with no subscribers succeeds and drops the event.
    async fn publish(&self, job_id: &JobId, event: &JobEvent) -> ProgressResult<()>;

    /// Receive events published to `job_id` from now on, in publish order.
    async fn subscribe(&self, job_id: &JobId) -> ProgressResult<EventStream>;
}

/// In-process bus built on one broadcast channel per job.
pub struct InMemoryEventBus {
    channels: Arc<DashMap<JobId, broadcast::Sender<JobEvent>>>,
    capacity: usize,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscribers for a job.
    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        self.channels
            .get(job_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of jobs with an open channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, job_id: &JobId, event: &JobEvent) -> ProgressResult<()> {
        let Some(tx) = self.channels.get(job_id).map(|entry| entry.value().clone()) else {
            debug!(job_id = %job_id, kind = event.kind().as_str(), "No subscribers, dropping event");
            return Ok(());
        };

        if tx.send(event.clone()).is_err() {
            // Every receiver is gone
            self.channels
                .remove_if(job_id, |_, sender| sender.receiver_count() == 0);
            debug!(job_id = %job_id, "Pruned channel without subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, job_id: &JobId) -> ProgressResult<EventStream> {
        let rx = self
            .channels
            .entry(job_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let subscription = Subscription {
            rx: Some(rx),
            channels: self.channels.clone(),
            job_id: job_id.clone(),
        };
        let stream = futures_util::stream::unfold(subscription, |mut subscription| async move {
            let event = subscription.recv().await?;
            Some((event, subscription))
        });

        Ok(Box::pin(stream))
    }
}

/// One subscriber's receiver; dropping the last one for a job removes its channel.
struct Subscription {
    rx: Option<broadcast::Receiver<JobEvent>>,
    channels: Arc<DashMap<JobId, broadcast::Sender<JobEvent>>>,
    job_id: JobId,
}

impl Subscription {
    async fn recv(&mut self) -> Option<JobEvent> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(job_id = %self.job_id, skipped, "Subscriber lagged, events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Release the receiver before checking the count
        drop(self.rx.take());
        if self
            .channels
            .remove_if(&self.job_id, |_, tx| tx.receiver_count() == 0)
            .is_some()
        {
            debug!(job_id = %self.job_id, "Last subscriber left, channel removed");
        }
    }
}
