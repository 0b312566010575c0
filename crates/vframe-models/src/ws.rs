//! WebSocket message types.
//!
//! Every pushed message is `{"type": <kind>, "data": {...}}`; the shapes
//! match what the progress viewer already consumes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{FrameInfo, JobId, ProgressSnapshot};

/// Event kinds on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FramesExtracted,
    FrameProcessing,
    FrameProcessed,
    FrameError,
    AllFramesProcessed,
    JobFailed,
    ProgressState,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FramesExtracted => "frames_extracted",
            EventKind::FrameProcessing => "frame_processing",
            EventKind::FrameProcessed => "frame_processed",
            EventKind::FrameError => "frame_error",
            EventKind::AllFramesProcessed => "all_frames_processed",
            EventKind::JobFailed => "job_failed",
            EventKind::ProgressState => "progress_state",
        }
    }
}

/// Progress event for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobEvent {
    /// Extraction finished; the total is now fixed
    FramesExtracted { frame_count: u32, job_id: JobId },

    /// A worker picked up a frame
    FrameProcessing(FrameInfo),

    /// A frame was described, embedded and persisted
    FrameProcessed(FrameInfo),

    /// A frame failed; other frames continue
    FrameError { frame_idx: u32, error: String },

    /// Every frame reached a terminal outcome
    AllFramesProcessed { job_id: JobId },

    /// The job died before frames could be processed
    JobFailed { job_id: JobId, error: String },

    /// Reply to a viewer's snapshot request
    ProgressState(ProgressStateData),
}

/// Payload of a `progress_state` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressStateData {
    #[serde(flatten)]
    pub snapshot: ProgressSnapshot,
    pub extraction_in_progress: bool,
}

impl JobEvent {
    pub fn frames_extracted(job_id: &JobId, frame_count: u32) -> Self {
        JobEvent::FramesExtracted {
            frame_count,
            job_id: job_id.clone(),
        }
    }

    pub fn frame_error(frame_idx: u32, error: impl Into<String>) -> Self {
        JobEvent::FrameError {
            frame_idx,
            error: error.into(),
        }
    }

    pub fn all_frames_processed(job_id: &JobId) -> Self {
        JobEvent::AllFramesProcessed {
            job_id: job_id.clone(),
        }
    }

    pub fn job_failed(job_id: &JobId, error: impl Into<String>) -> Self {
        JobEvent::JobFailed {
            job_id: job_id.clone(),
            error: error.into(),
        }
    }

    /// Build a `progress_state` reply from a snapshot.
    pub fn progress_state(snapshot: ProgressSnapshot) -> Self {
        let extraction_in_progress = snapshot.extraction_in_progress();
        JobEvent::ProgressState(ProgressStateData {
            snapshot,
            extraction_in_progress,
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            JobEvent::FramesExtracted { .. } => EventKind::FramesExtracted,
            JobEvent::FrameProcessing(_) => EventKind::FrameProcessing,
            JobEvent::FrameProcessed(_) => EventKind::FrameProcessed,
            JobEvent::FrameError { .. } => EventKind::FrameError,
            JobEvent::AllFramesProcessed { .. } => EventKind::AllFramesProcessed,
            JobEvent::JobFailed { .. } => EventKind::JobFailed,
            JobEvent::ProgressState(_) => EventKind::ProgressState,
        }
    }

    /// Whether this event ends the job's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::AllFramesProcessed { .. } | JobEvent::JobFailed { .. }
        )
    }

    /// Frame index for per-frame events.
    pub fn frame_idx(&self) -> Option<u32> {
        match self {
            JobEvent::FrameProcessing(info) | JobEvent::FrameProcessed(info) => Some(info.frame_idx),
            JobEvent::FrameError { frame_idx, .. } => Some(*frame_idx),
            _ => None,
        }
    }
}

/// Control message sent by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerRequest {
    /// Ask for an immediate `progress_state` reply
    GetProgress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_frames_extracted_wire_shape() {
        let event = JobEvent::frames_extracted(&JobId::from_string("v1"), 5);
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "frames_extracted", "data": {"frame_count": 5, "job_id": "v1"}})
        );
    }

    #[test]
    fn test_frame_processed_carries_description() {
        let event = JobEvent::FrameProcessed(FrameInfo {
            frame_idx: 3,
            frame_url: "/frames/v1/frame_00004.jpg".to_string(),
            description: Some("a red car".to_string()),
            timestamp: Some(3.0),
            total_frames: Some(10),
        });
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "frame_processed");
        assert_eq!(value["data"]["frame_idx"], 3);
        assert_eq!(value["data"]["description"], "a red car");
        assert_eq!(event.frame_idx(), Some(3));
        assert_eq!(event.kind().as_str(), "frame_processed");
    }

    #[test]
    fn test_progress_state_flattens_snapshot() {
        let event = JobEvent::progress_state(ProgressSnapshot::extracting());
        let value: Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "progress_state");
        assert_eq!(value["data"]["extraction_in_progress"], true);
        assert_eq!(value["data"]["total_frames"], 0);
        assert_eq!(value["data"]["in_process"], json!([]));
        assert_eq!(value["data"]["done"], json!([]));
        assert_eq!(value["data"]["first_frame_url"], Value::Null);
    }

    #[test]
    fn test_terminal_events() {
        let job = JobId::from_string("v1");
        assert!(JobEvent::all_frames_processed(&job).is_terminal());
        assert!(JobEvent::job_failed(&job, "corrupt").is_terminal());
        assert!(!JobEvent::frame_error(1, "timeout").is_terminal());
    }

    #[test]
    fn test_event_roundtrip_through_json() {
        let event = JobEvent::frame_error(2, "caption service timed out");
        let json = serde_json::to_string(&event).unwrap();
        let back: JobEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_viewer_request_parsing() {
        let request: ViewerRequest = serde_json::from_str(r#"{"type":"get_progress"}"#).unwrap();
        assert_eq!(request, ViewerRequest::GetProgress);

        assert!(serde_json::from_str::<ViewerRequest>(r#"{"type":"bogus"}"#).is_err());
        assert!(serde_json::from_str::<ViewerRequest>("not json").is_err());
    }
}
