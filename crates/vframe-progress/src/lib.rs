//! Shared job progress plumbing.
//!
//! This crate provides:
//! - Per-job progress sets (in-memory and Redis)
//! - A per-job event bus (broadcast channels and Redis Pub/Sub)
//! - The job lifecycle state machine over a job repository
//! - Job intake via Redis Streams

pub mod bus;
pub mod error;
pub mod jobs;
pub mod queue;
pub mod redis_bus;
pub mod redis_store;
pub mod store;

pub use bus::{EventBus, EventStream, InMemoryEventBus};
pub use error::{ProgressError, ProgressResult};
pub use jobs::{InMemoryJobRepository, JobRepository, JobStateMachine, RedisJobRepository};
pub use queue::{JobQueue, ProcessFramesJob, QueueConfig};
pub use redis_bus::RedisEventBus;
pub use redis_store::RedisProgressStore;
pub use store::{InMemoryProgressStore, ProgressStore};
