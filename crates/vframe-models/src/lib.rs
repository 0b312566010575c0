//! Shared data models for the vframe pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle states
//! - Frame descriptors and viewer-facing frame info
//! - Progress snapshots
//! - WebSocket event schemas

pub mod frame;
pub mod job;
pub mod progress;
pub mod ws;

// Re-export common types
pub use frame::{FrameDescriptor, FrameInfo, FrameUrls};
pub use job::{InvalidTransition, JobId, JobRecord, JobState, ParseJobStateError};
pub use progress::ProgressSnapshot;
pub use ws::{EventKind, JobEvent, ProgressStateData, ViewerRequest};
