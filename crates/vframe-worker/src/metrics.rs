//! Worker metrics.

use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_PROCESSED_TOTAL: &str = "vframe_frames_processed_total";
    pub const FRAMES_FAILED_TOTAL: &str = "vframe_frames_failed_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vframe_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vframe_jobs_failed_total";
}

/// Serve Prometheus metrics on `0.0.0.0:{port}`.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .install()
}

pub fn record_frame_processed() {
    counter!(names::FRAMES_PROCESSED_TOTAL).increment(1);
}

pub fn record_frame_failed() {
    counter!(names::FRAMES_FAILED_TOTAL).increment(1);
}

pub fn record_job_completed() {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
}

pub fn record_job_failed(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}
