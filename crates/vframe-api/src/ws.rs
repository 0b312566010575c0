//! WebSocket progress endpoint.

use std::sync::atomic::{AtomicI64, Ordering};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use vframe_models::JobId;

use crate::error::{ApiError, ApiResult};
use crate::gateway::{Inbound, Outbound};
use crate::metrics;
use crate::state::AppState;

/// Buffer between the gateway and the socket writer.
const WS_SEND_BUFFER_SIZE: usize = 32;

const MAX_JOB_ID_LENGTH: usize = 128;

static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// Job ids are path segments and Redis key parts.
pub fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= MAX_JOB_ID_LENGTH
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

/// `GET /ws/progress/:job_id`
pub async fn ws_progress(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    if !is_valid_job_id(&job_id) {
        return Err(ApiError::bad_request("Invalid job ID format"));
    }

    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection();

    let job_id = JobId::from_string(job_id);
    Ok(ws
        .on_upgrade(move |socket| async move {
            handle_socket(socket, state, job_id).await;
            let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
            metrics::set_ws_active_connections(count);
        })
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState, job_id: JobId) {
    info!(job_id = %job_id, "Viewer connected");
    let (mut ws_sender, receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(WS_SEND_BUFFER_SIZE);

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let message = match message {
                Outbound::Text(text) => Message::Text(text),
                Outbound::Ping => Message::Ping(Vec::new()),
            };
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let inbound = receiver.filter_map(|message| async move {
        match message {
            Ok(Message::Text(text)) => Some(Inbound::Text(text)),
            Ok(Message::Pong(_)) => Some(Inbound::Pong),
            Ok(Message::Close(_)) => Some(Inbound::Close),
            Ok(_) => None,
            Err(e) => {
                debug!("WebSocket receive error: {}", e);
                Some(Inbound::Close)
            }
        }
    });

    // Errors are logged by the gateway
    let _ = state.gateway.serve(job_id, inbound, tx).await;
    let _ = send_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_validation() {
        assert!(is_valid_job_id("v1"));
        assert!(is_valid_job_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(is_valid_job_id("upload:2024_clip.mp4"));
        assert!(!is_valid_job_id(""));
        assert!(!is_valid_job_id("../etc"));
        assert!(!is_valid_job_id("a b"));
        assert!(!is_valid_job_id(&"x".repeat(129)));
    }
}
