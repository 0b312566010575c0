//! Frame extraction and description worker.
//!
//! This crate provides:
//! - The per-frame pipeline (caption, embed, persist)
//! - A bounded frame pool that processes frames out of order
//! - The job orchestrator driving extraction and the pool
//! - A queue executor running jobs with graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use orchestrator::{JobOrchestrator, JobOutcome};
pub use pipeline::FramePipeline;
pub use pool::{FramePool, PoolSummary};
