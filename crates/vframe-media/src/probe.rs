//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{MediaError, MediaResult};

/// Video file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Native frame rate (fps)
    pub fps: f64,
    /// Video codec
    pub codec: String,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Probe a video file for information.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed on {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

/// Turn ffprobe's JSON into [`VideoInfo`].
pub(crate) fn parse_probe_output(stdout: &[u8]) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::invalid_video("No video stream found"))?;

    // Container duration first, then the stream's own
    let duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video_stream.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    // avg_frame_rate is "0/0" for some containers
    let fps = video_stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .ok_or_else(|| MediaError::invalid_video("Video stream has no usable frame rate"))?;

    Ok(VideoInfo {
        duration,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        fps,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
///
/// Returns `None` for zero or non-finite rates.
pub(crate) fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            num / den
        }
        None => s.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 1280, "height": 720,
                 "avg_frame_rate": "25/1", "r_frame_rate": "25/1"}
            ],
            "format": {"duration": "12.480000"}
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.codec, "h264");
        assert_eq!((info.width, info.height), (1280, 720));
        assert!((info.fps - 25.0).abs() < f64::EPSILON);
        assert!((info.duration - 12.48).abs() < 1e-9);
    }

    #[test]
    fn test_falls_back_to_r_frame_rate() {
        let json = br#"{"streams": [{"codec_type": "video", "avg_frame_rate": "0/0",
            "r_frame_rate": "24/1", "duration": "3.0"}]}"#;
        let info = parse_probe_output(json).unwrap();
        assert!((info.fps - 24.0).abs() < f64::EPSILON);
        assert!((info.duration - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_video_stream() {
        let json = br#"{"streams": [{"codec_type": "audio"}], "format": {}}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(MediaError::InvalidVideo(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = probe_video("/definitely/not/here.mp4").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
