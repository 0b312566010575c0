//! Job identity, lifecycle states, and the persisted job record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Vector-store key for one frame of this job.
    pub fn frame_key(&self, index: u32) -> String {
        format!("{}_frame_{}", self.0, index)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a frame-processing job.
///
/// `pending -> processing -> success | error`, with `pending -> error` for
/// jobs that die before extraction completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job created, extraction not started or not finished
    #[default]
    Pending,
    /// Frames extracted, workers running
    Processing,
    /// Every frame reached a terminal outcome
    Success,
    /// Job died before completion
    Error,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Success => "success",
            JobState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Error)
    }

    /// Whether moving from `self` to `next` respects the lifecycle order.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Processing)
                | (JobState::Pending, JobState::Error)
                | (JobState::Processing, JobState::Success)
                | (JobState::Processing, JobState::Error)
        )
    }

    /// Validate a transition, returning the target state on success.
    pub fn transition(self, next: JobState) -> Result<JobState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job state: {0}")]
pub struct ParseJobStateError(pub String);

impl FromStr for JobState {
    type Err = ParseJobStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "success" => Ok(JobState::Success),
            "error" => Ok(JobState::Error),
            other => Err(ParseJobStateError(other.to_string())),
        }
    }
}

/// Job metadata as kept by the job repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Job ID
    pub job_id: JobId,

    /// Current lifecycle state
    #[serde(default)]
    pub processing_state: JobState,

    /// Number of extracted frames, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u32>,

    /// Fatal error message, if the job died
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a new pending record.
    pub fn new(job_id: JobId) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            processing_state: JobState::Pending,
            frame_count: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.processing_state.is_terminal()
    }
}
