//! Frame extraction at a fixed sampling rate.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};

/// Output pattern; ffmpeg numbers frames from 1.
pub const FRAME_PATTERN: &str = "frame_%05d.jpg";

/// JPEG quality for extracted frames (2 is best, 31 is worst).
pub const FRAME_JPEG_QUALITY: u8 = 2;

const FRAME_PREFIX: &str = "frame_";
const FRAME_EXT: &str = "jpg";

/// Extract frames from `video` at `fps` into `out_dir`.
///
/// Returns the frame paths sorted by frame number; position `i` in the result
/// is frame index `i`. Frames left over from an earlier run are removed first.
pub async fn extract_frames(
    video: impl AsRef<Path>,
    fps: f64,
    out_dir: impl AsRef<Path>,
) -> MediaResult<Vec<PathBuf>> {
    let video = video.as_ref();
    let out_dir = out_dir.as_ref();

    if !fps.is_finite() || fps <= 0.0 {
        return Err(MediaError::InvalidFps(fps));
    }
    if !video.exists() {
        return Err(MediaError::FileNotFound(video.to_path_buf()));
    }

    fs::create_dir_all(out_dir).await?;
    let stale = clear_frames(out_dir).await?;
    if stale > 0 {
        debug!("Removed {} stale frames from {}", stale, out_dir.display());
    }

    extraction_command(video, fps, out_dir).run().await?;

    let frames = list_frames(out_dir).await?;
    info!(
        "Extracted {} frames from {} at {} fps",
        frames.len(),
        video.display(),
        fps
    );
    Ok(frames)
}

/// Command that samples `video` at `fps` into numbered JPEGs under `out_dir`.
pub fn extraction_command(video: &Path, fps: f64, out_dir: &Path) -> FfmpegCommand {
    FfmpegCommand::new(video, out_dir.join(FRAME_PATTERN))
        .fps(fps)
        .jpeg_quality(FRAME_JPEG_QUALITY)
        .log_level("error")
}

/// List extracted frames in `dir`, sorted by frame number.
pub async fn list_frames(dir: impl AsRef<Path>) -> MediaResult<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let mut entries = fs::read_dir(dir.as_ref()).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(number) = frame_number(&path) {
            frames.push((number, path));
        }
    }

    frames.sort_by_key(|(number, _)| *number);
    Ok(frames.into_iter().map(|(_, path)| path).collect())
}

/// Parse the number out of `frame_00012.jpg`.
fn frame_number(path: &Path) -> Option<u32> {
    if path.extension()?.to_str()? != FRAME_EXT {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(FRAME_PREFIX)?
        .parse()
        .ok()
}

async fn clear_frames(dir: &Path) -> MediaResult<usize> {
    let mut removed = 0;
    for path in list_frames(dir).await? {
        fs::remove_file(&path).await?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_number() {
        assert_eq!(frame_number(Path::new("/x/frame_00001.jpg")), Some(1));
        assert_eq!(frame_number(Path::new("frame_12345.jpg")), Some(12345));
        assert_eq!(frame_number(Path::new("frame_00001.png")), None);
        assert_eq!(frame_number(Path::new("thumb_00001.jpg")), None);
        assert_eq!(frame_number(Path::new("frame_abc.jpg")), None);
    }

    #[test]
    fn test_extraction_command_sets_rate_and_quality() {
        let args =
            extraction_command(Path::new("/in/v.mp4"), 0.5, Path::new("/out/v1")).build_args();

        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[vf + 1], "fps=0.5");
        let quality = args.iter().position(|a| a == "-q:v").unwrap();
        assert_eq!(args[quality + 1], "2");
        assert_eq!(args.last().unwrap(), "/out/v1/frame_%05d.jpg");
    }

    #[tokio::test]
    async fn test_list_frames_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["frame_00010.jpg", "frame_00002.jpg", "frame_00001.jpg", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        // Wider than the padding still sorts by number
        std::fs::write(dir.path().join("frame_100000.jpg"), b"x").unwrap();

        let frames = list_frames(dir.path()).await.unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            ["frame_00001.jpg", "frame_00002.jpg", "frame_00010.jpg", "frame_100000.jpg"]
        );
    }

    #[tokio::test]
    async fn test_clear_frames_keeps_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("frame_00001.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("video.mp4"), b"x").unwrap();

        assert_eq!(clear_frames(dir.path()).await.unwrap(), 1);
        assert!(dir.path().join("video.mp4").exists());
        assert!(list_frames(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_rejects_bad_fps() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_frames("video.mp4", 0.0, dir.path()).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidFps(_)));
    }

    #[tokio::test]
    async fn test_extract_missing_video() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_frames(dir.path().join("missing.mp4"), 1.0, dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
