//! FFmpeg CLI wrapper for frame extraction.
//!
//! This crate provides:
//! - Video probing through `ffprobe`
//! - Frame extraction at a target rate through `ffmpeg`
//! - The `FrameExtractor` seam used by the worker

pub mod command;
pub mod error;
pub mod extract;
pub mod extractor;
pub mod probe;

pub use command::FfmpegCommand;
pub use error::{MediaError, MediaResult};
pub use extract::{extract_frames, list_frames};
pub use extractor::{FfmpegFrameExtractor, FrameExtractor};
pub use probe::{probe_video, VideoInfo};
