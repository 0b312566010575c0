//! Live viewer connections keyed by job.
//!
//! One connection is tracked per job. Registering a second connection for the
//! same job closes the first one.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::info;

use vframe_models::JobId;

/// Identifies one physical connection.
pub type ConnectionId = u64;

struct Entry {
    id: ConnectionId,
    close: oneshot::Sender<()>,
}

/// Registry of the active viewer per job.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<JobId, Entry>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for `job_id`, superseding any previous one.
    ///
    /// The returned receiver resolves when this connection is superseded.
    pub fn register(&self, job_id: &JobId) -> (ConnectionId, oneshot::Receiver<()>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (close, closed) = oneshot::channel();

        if let Some(previous) = self.entries.insert(job_id.clone(), Entry { id, close }) {
            info!(
                job_id = %job_id,
                previous = previous.id,
                connection = id,
                "Closing superseded viewer connection"
            );
            // The previous connection may already be gone
            let _ = previous.close.send(());
        }

        (id, closed)
    }

    /// Remove the entry for `job_id` if it still belongs to `id`.
    pub fn remove(&self, job_id: &JobId, id: ConnectionId) -> bool {
        self.entries
            .remove_if(job_id, |_, entry| entry.id == id)
            .is_some()
    }

    /// Connection currently registered for a job.
    pub fn active(&self, job_id: &JobId) -> Option<ConnectionId> {
        self.entries.get(job_id).map(|entry| entry.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
