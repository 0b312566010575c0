//! Axum server exposing live job progress.
//!
//! This crate provides:
//! - The progress gateway relaying bus events and answering snapshot requests
//! - A per-job connection registry
//! - The WebSocket endpoint, health checks and Prometheus metrics

pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use gateway::{Disconnect, Inbound, Outbound, ProgressGateway};
pub use registry::ConnectionRegistry;
pub use routes::create_router;
pub use state::AppState;
