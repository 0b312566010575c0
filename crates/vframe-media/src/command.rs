//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path or pattern
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Sample frames at a fixed rate.
    pub fn fps(self, fps: f64) -> Self {
        self.video_filter(format!("fps={}", fps))
    }

    /// Set JPEG quality (2 is best, 31 is worst).
    pub fn jpeg_quality(self, q: u8) -> Self {
        self.output_arg("-q:v").output_arg(q.to_string())
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-loglevel".to_string());
        args.push(self.log_level.clone());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Run the command to completion.
    pub async fn run(&self) -> MediaResult<()> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let args = self.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = child.wait_with_output().await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                (!stderr.is_empty()).then_some(stderr),
                output.status.code(),
            ))
        }
    }
}
