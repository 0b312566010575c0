//! Frame descriptors and their viewer-facing form.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Builds viewer-facing URLs for extracted frame images.
///
/// Frame files are numbered from 1 (`frame_00001.jpg`) while frame indices
/// start at 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameUrls {
    prefix: String,
}

impl FrameUrls {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// URL of the frame at `index` for `job_id`.
    pub fn frame_url(&self, job_id: &JobId, index: u32) -> String {
        format!("{}/{}/{}", self.prefix, job_id, Self::file_name(index))
    }

    /// File name ffmpeg writes for the frame at `index`.
    pub fn file_name(index: u32) -> String {
        format!("frame_{:05}.jpg", u64::from(index) + 1)
    }
}

impl Default for FrameUrls {
    fn default() -> Self {
        Self::new("/frames")
    }
}

/// One extracted frame moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FrameDescriptor {
    /// 0-based, dense index
    pub index: u32,
    /// Seconds from the start of the video
    pub timestamp: f64,
    /// Opaque reference to the extracted image (a file path for ffmpeg output)
    pub locator: String,
    /// Viewer-facing URL of the image
    pub url: String,
    /// Caption, once computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Embedding of the caption, once computed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl FrameDescriptor {
    /// Create a descriptor for a freshly extracted frame.
    ///
    /// The timestamp is derived from the index and the extraction rate.
    pub fn new(index: u32, fps: f64, locator: impl Into<String>, url: impl Into<String>) -> Self {
        let timestamp = if fps > 0.0 { f64::from(index) / fps } else { 0.0 };
        Self {
            index,
            timestamp,
            locator: locator.into(),
            url: url.into(),
            description: None,
            embedding: None,
        }
    }

    /// Wire form, optionally carrying the job's total frame count.
    pub fn info(&self, total_frames: Option<u32>) -> FrameInfo {
        FrameInfo {
            frame_idx: self.index,
            frame_url: self.url.clone(),
            description: self.description.clone(),
            timestamp: Some(self.timestamp),
            total_frames,
        }
    }
}

/// Frame as sent to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FrameInfo {
    pub frame_idx: u32,
    pub frame_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u32>,
}

impl FrameInfo {
    /// Bare frame reference used in snapshots.
    pub fn reference(frame_idx: u32, frame_url: impl Into<String>) -> Self {
        Self {
            frame_idx,
            frame_url: frame_url.into(),
            description: None,
            timestamp: None,
            total_frames: None,
        }
    }
}
