//! Point-in-time progress of a job.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::FrameInfo;

/// Consistent read of a job's frame sets.
///
/// Before extraction completes every list is empty and `total_frames` is 0.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ProgressSnapshot {
    /// Frames currently being computed, ascending by index
    pub in_process: Vec<FrameInfo>,
    /// Frames fully computed and persisted, ascending by index
    pub done: Vec<FrameInfo>,
    /// Frames whose computation failed, ascending by index
    #[serde(default)]
    pub failed: Vec<FrameInfo>,
    /// Total extracted frames, 0 while extraction is running
    pub total_frames: u32,
    /// Preview image for the job
    pub first_frame_url: Option<String>,
    /// Whether the total is known. A video may genuinely have zero frames.
    #[serde(skip)]
    pub total_known: bool,
}

impl ProgressSnapshot {
    /// Snapshot of a job whose frames have not been extracted yet.
    pub fn extracting() -> Self {
        Self::default()
    }

    /// True until the frame total is recorded. A video that yields zero
    /// frames reports `false` with `total_frames == 0`.
    pub fn extraction_in_progress(&self) -> bool {
        !self.total_known
    }

    pub fn done_indices(&self) -> Vec<u32> {
        self.done.iter().map(|f| f.frame_idx).collect()
    }

    pub fn in_process_indices(&self) -> Vec<u32> {
        self.in_process.iter().map(|f| f.frame_idx).collect()
    }

    pub fn failed_indices(&self) -> Vec<u32> {
        self.failed.iter().map(|f| f.frame_idx).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracting_snapshot() {
        let snapshot = ProgressSnapshot::extracting();
        assert!(snapshot.extraction_in_progress());
        assert_eq!(snapshot.total_frames, 0);
        assert!(snapshot.in_process.is_empty());
        assert!(snapshot.done.is_empty());
        assert!(snapshot.first_frame_url.is_none());
    }

    #[test]
    fn test_zero_frame_video_is_not_extracting() {
        let snapshot = ProgressSnapshot {
            total_known: true,
            ..ProgressSnapshot::default()
        };
        assert!(!snapshot.extraction_in_progress());
        assert_eq!(snapshot.total_frames, 0);
    }
}
