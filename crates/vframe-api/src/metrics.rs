//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for `/metrics`.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "vframe_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vframe_http_request_duration_seconds";

    pub const WS_CONNECTIONS_TOTAL: &str = "vframe_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "vframe_ws_connections_active";
    pub const WS_MESSAGES_SENT: &str = "vframe_ws_messages_sent_total";
    pub const WS_MESSAGES_RECEIVED: &str = "vframe_ws_messages_received_total";
    pub const WS_SUPERSEDED_TOTAL: &str = "vframe_ws_superseded_total";
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_ws_connection() {
    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
}

pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

pub fn record_ws_message_sent(message_type: &str) {
    let labels = [("type", message_type.to_string())];
    counter!(names::WS_MESSAGES_SENT, &labels).increment(1);
}

pub fn record_ws_message_received() {
    counter!(names::WS_MESSAGES_RECEIVED).increment(1);
}

pub fn record_ws_superseded() {
    counter!(names::WS_SUPERSEDED_TOTAL).increment(1);
}

/// Metrics middleware for HTTP requests.
///
/// Requests are labelled with the matched route so job ids never become
/// label values.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(request).await;

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
