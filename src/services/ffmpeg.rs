//! FFmpeg-based probing and transcoding
//!
//! Uses ffprobe (command-line) to find the codec of a produced video, and ffmpeg
//! to re-encode it when it is not H.264.
//!
//! This approach is more reliable than Rust FFmpeg bindings as ffprobe's JSON
//! output format is stable and well-documented.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::Config;

/// Video codec every served video is normalised to.
pub const DISTRIBUTION_CODEC: &str = "h264";

/// External engine used to inspect and re-encode produced videos
#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    /// Codec name of the first video stream, `None` when there is no video.
    async fn video_codec(&self, path: &Path) -> Result<Option<String>>;

    /// Re-encode the video track to H.264, copying audio unchanged.
    async fn transcode_to_h264(&self, input: &Path, output: &Path) -> Result<()>;

    async fn is_available(&self) -> bool {
        true
    }
}

/// FFprobe JSON output structures
mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_name: Option<String>,
        pub codec_type: Option<String>,
    }
}

/// ffprobe/ffmpeg command-line wrapper
#[derive(Debug, Clone)]
pub struct FfmpegService {
    /// Path to ffmpeg executable
    ffmpeg_path: String,
    /// Path to ffprobe executable
    ffprobe_path: String,
}

impl FfmpegService {
    /// Create a new FFmpeg service
    pub fn new() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }

    /// Create with custom executable paths
    pub fn with_paths(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_paths(&config.ffmpeg_path, &config.ffprobe_path)
    }
}

impl Default for FfmpegService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaTranscoder for FfmpegService {
    async fn video_codec(&self, path: &Path) -> Result<Option<String>> {
        debug!(path = %path.display(), "Probing video codec with ffprobe");

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            anyhow::bail!(
                "ffprobe failed for '{}': file does not exist",
                path.display()
            );
        }

        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error"])
            .args(["-print_format", "json"])
            .arg("-show_streams")
            .arg(path)
            .output()
            .await
            .with_context(|| format!("Failed to execute ffprobe for '{}'", path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "ffprobe failed for '{}': {}",
                path.display(),
                if stderr.trim().is_empty() {
                    "no error output"
                } else {
                    stderr.trim()
                }
            );
        }

        let probe: ffprobe::FfprobeOutput = serde_json::from_slice(&output.stdout)
            .context("Failed to parse ffprobe JSON output")?;

        Ok(first_video_codec(probe))
    }

    async fn transcode_to_h264(&self, input: &Path, output: &Path) -> Result<()> {
        info!(
            input = %input.display(),
            output = %output.display(),
            "Transcoding video to H.264"
        );

        let result = Command::new(&self.ffmpeg_path)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-c:v", "libx264"])
            .args(["-c:a", "copy"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to execute ffmpeg for '{}'", input.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let last = stderr
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .next_back()
                .unwrap_or("no error output");
            anyhow::bail!("FFmpeg failed: {}", last);
        }

        Ok(())
    }

    /// Check if both ffmpeg and ffprobe are available
    async fn is_available(&self) -> bool {
        for binary in [&self.ffmpeg_path, &self.ffprobe_path] {
            let ok = Command::new(binary)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false);
            if !ok {
                return false;
            }
        }
        true
    }
}

fn first_video_codec(probe: ffprobe::FfprobeOutput) -> Option<String> {
    probe
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|s| s.codec_name)
}

/// Whether a probed codec needs re-encoding before it is served.
pub fn needs_transcode(codec: Option<&str>) -> bool {
    matches!(codec, Some(name) if name != DISTRIBUTION_CODEC)
}
