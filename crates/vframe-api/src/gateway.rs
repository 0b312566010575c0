//! Bridges one viewer connection to a job's event bus and progress store.
//!
//! The gateway is transport agnostic: it reads [`Inbound`] messages from any
//! stream and writes [`Outbound`] messages to a bounded channel drained by the
//! socket writer. Bus events and viewer messages are awaited together, so
//! neither source can starve the other.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use vframe_models::{JobEvent, JobId, ProgressSnapshot, ViewerRequest};
use vframe_progress::{EventBus, ProgressResult, ProgressStore};

use crate::metrics;
use crate::registry::ConnectionRegistry;

/// Shortest heartbeat interval accepted by [`ProgressGateway::new`].
pub const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Message received from a viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Pong,
    Close,
}

/// Message for the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Ping,
}

/// Why a connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// The viewer closed the connection
    ClientClosed,
    /// The socket writer is gone
    WriterClosed,
    /// A newer connection for the same job took over
    Superseded,
    /// The bus subscription ended
    BusClosed,
}

pub struct ProgressGateway {
    store: Arc<dyn ProgressStore>,
    bus: Arc<dyn EventBus>,
    registry: Arc<ConnectionRegistry>,
    heartbeat: Duration,
}

impl ProgressGateway {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        bus: Arc<dyn EventBus>,
        registry: Arc<ConnectionRegistry>,
        heartbeat: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            registry,
            heartbeat: heartbeat.max(MIN_HEARTBEAT),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Snapshot for a viewer, `extracting` for jobs the store does not know yet.
    pub async fn snapshot(&self, job_id: &JobId) -> ProgressResult<ProgressSnapshot> {
        match self.store.snapshot(job_id).await {
            Err(e) if e.is_not_found() => Ok(ProgressSnapshot::extracting()),
            other => other,
        }
    }

    /// Serve one viewer until it disconnects or is superseded.
    ///
    /// The registry entry and the bus subscription are released on every
    /// exit path.
    pub async fn serve<S>(
        &self,
        job_id: JobId,
        inbound: S,
        outbound: mpsc::Sender<Outbound>,
    ) -> ProgressResult<Disconnect>
    where
        S: Stream<Item = Inbound>,
    {
        let (connection, closed) = self.registry.register(&job_id);
        let result = self
            .relay(&job_id, inbound, &outbound, closed)
            .await;
        self.registry.remove(&job_id, connection);

        match &result {
            Ok(reason) => info!(job_id = %job_id, connection, ?reason, "Viewer disconnected"),
            Err(e) => warn!(job_id = %job_id, connection, "Viewer connection failed: {}", e),
        }
        result
    }

    async fn relay<S>(
        &self,
        job_id: &JobId,
        inbound: S,
        outbound: &mpsc::Sender<Outbound>,
        mut closed: tokio::sync::oneshot::Receiver<()>,
    ) -> ProgressResult<Disconnect>
    where
        S: Stream<Item = Inbound>,
    {
        let mut events = self.bus.subscribe(job_id).await?;
        let mut inbound = std::pin::pin!(inbound);

        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_activity = Instant::now();

        debug!(job_id = %job_id, "Viewer attached");

        loop {
            tokio::select! {
                _ = &mut closed => {
                    metrics::record_ws_superseded();
                    return Ok(Disconnect::Superseded);
                }
                event = events.next() => {
                    let Some(event) = event else {
                        return Ok(Disconnect::BusClosed);
                    };
                    last_activity = Instant::now();
                    if !send_event(outbound, &event).await {
                        return Ok(Disconnect::WriterClosed);
                    }
                }
                message = inbound.next() => {
                    last_activity = Instant::now();
                    match message {
                        Some(Inbound::Text(text)) => {
                            metrics::record_ws_message_received();
                            if !self.handle_request(job_id, &text, outbound).await {
                                return Ok(Disconnect::WriterClosed);
                            }
                        }
                        Some(Inbound::Pong) => {}
                        Some(Inbound::Close) | None => return Ok(Disconnect::ClientClosed),
                    }
                }
                _ = heartbeat.tick() => {
                    if last_activity.elapsed() >= self.heartbeat / 2
                        && outbound.send(Outbound::Ping).await.is_err()
                    {
                        return Ok(Disconnect::WriterClosed);
                    }
                }
            }
        }
    }

    /// Answer one viewer message. Returns false once the writer is gone.
    async fn handle_request(
        &self,
        job_id: &JobId,
        text: &str,
        outbound: &mpsc::Sender<Outbound>,
    ) -> bool {
        match serde_json::from_str::<ViewerRequest>(text) {
            Ok(ViewerRequest::GetProgress) => match self.snapshot(job_id).await {
                Ok(snapshot) => send_event(outbound, &JobEvent::progress_state(snapshot)).await,
                Err(e) => {
                    warn!(job_id = %job_id, "Failed to read progress: {}", e);
                    true
                }
            },
            Err(e) => {
                warn!(job_id = %job_id, "Ignoring malformed viewer message: {}", e);
                true
            }
        }
    }
}

/// Queue an event for the writer, waiting when its buffer is full.
async fn send_event(outbound: &mpsc::Sender<Outbound>, event: &JobEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.kind().as_str(), e);
            return true;
        }
    };

    match outbound.try_send(Outbound::Text(json)) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(message)) => {
            debug!("WebSocket send buffer full, applying backpressure");
            if outbound.send(message).await.is_err() {
                return false;
            }
        }
        Err(mpsc::error::TrySendError::Closed(_)) => return false,
    }

    metrics::record_ws_message_sent(event.kind().as_str());
    true
}
