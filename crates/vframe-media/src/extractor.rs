//! Extraction collaborator used by the worker.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{MediaError, MediaResult};
use crate::extract::extract_frames;
use crate::probe::{probe_video, VideoInfo};

/// Turns a video into an ordered list of frame assets.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Read the video's native frame rate and duration.
    async fn probe(&self, video: &Path) -> MediaResult<VideoInfo>;

    /// Sample frames at `fps` into `out_dir`, ordered by frame index.
    async fn extract(&self, video: &Path, fps: f64, out_dir: &Path) -> MediaResult<Vec<PathBuf>>;

    /// Load the bytes of one extracted frame.
    async fn load_frame(&self, locator: &str) -> MediaResult<Vec<u8>>;
}

/// [`FrameExtractor`] backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFrameExtractor;

impl FfmpegFrameExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn probe(&self, video: &Path) -> MediaResult<VideoInfo> {
        probe_video(video).await
    }

    async fn extract(&self, video: &Path, fps: f64, out_dir: &Path) -> MediaResult<Vec<PathBuf>> {
        extract_frames(video, fps, out_dir).await
    }

    async fn load_frame(&self, locator: &str) -> MediaResult<Vec<u8>> {
        tokio::fs::read(locator).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MediaError::FileNotFound(PathBuf::from(locator)),
            _ => MediaError::Io(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_frame_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_00001.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF]).unwrap();

        let extractor = FfmpegFrameExtractor::new();
        let bytes = extractor
            .load_frame(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn test_load_missing_frame() {
        let extractor = FfmpegFrameExtractor::new();
        let err = extractor.load_frame("/nope/frame_00001.jpg").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
