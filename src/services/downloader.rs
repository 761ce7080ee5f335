//! yt-dlp based media downloader
//!
//! Runs the `yt-dlp` command-line tool rather than embedding an extractor. The
//! child's stdout carries two kinds of lines: progress lines in the format of
//! [progress_template](super::progress::progress_template), and the final file
//! path printed after all post-processing has moved the file into place.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::progress::{ProgressSink, parse_progress_line, progress_template};
use crate::config::Config;

/// Format selection for video downloads: best mp4 video with m4a audio, then
/// the best single mp4, then anything.
pub const VIDEO_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// Format selection for audio-only downloads.
pub const AUDIO_FORMAT: &str = "bestaudio/best";

/// Codecs yt-dlp's `--audio-format` accepts.
pub const AUDIO_CODECS: &[&str] = &[
    "best", "aac", "alac", "flac", "m4a", "mp3", "opus", "vorbis", "wav",
];

/// File extension yt-dlp gives an audio file extracted to `codec`.
///
/// `None` for `best`, which keeps the source codec and its extension.
pub fn audio_extension(codec: &str) -> Option<&'static str> {
    match codec {
        "aac" | "alac" | "m4a" => Some("m4a"),
        "vorbis" => Some("ogg"),
        "flac" => Some("flac"),
        "mp3" => Some("mp3"),
        "opus" => Some("opus"),
        "wav" => Some("wav"),
        _ => None,
    }
}

/// What the caller asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub audio_only: bool,
}

impl DownloadRequest {
    pub fn video(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            audio_only: false,
        }
    }

    pub fn audio(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            audio_only: true,
        }
    }
}

/// External engine that fetches a URL into the output directory
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Download the media, reporting progress to `progress`, and return the
    /// path of the produced file.
    async fn download(
        &self,
        request: &DownloadRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf>;

    /// Whether the engine can be invoked at all.
    async fn is_available(&self) -> bool {
        true
    }
}

/// [MediaDownloader] backed by the `yt-dlp` executable
#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    binary: String,
    output_dir: PathBuf,
    audio_format: String,
    audio_quality: String,
}

impl YtDlpDownloader {
    pub fn new(binary: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            output_dir: output_dir.into(),
            audio_format: "mp3".to_string(),
            audio_quality: "192K".to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.yt_dlp_path, &config.output_dir)
            .with_audio(&config.audio_format, &config.audio_quality)
    }

    /// Override the codec and quality used for audio extraction
    pub fn with_audio(mut self, format: impl Into<String>, quality: impl Into<String>) -> Self {
        self.audio_format = format.into();
        self.audio_quality = quality.into();
        self
    }

    /// Command-line arguments for one request (without the binary).
    pub fn build_args(&self, request: &DownloadRequest) -> Vec<String> {
        let output_template = self.output_dir.join("%(id)s.%(ext)s");

        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-colors".to_string(),
            "--newline".to_string(),
            // --print implies --quiet, which would also silence progress
            "--progress".to_string(),
            "--progress-template".to_string(),
            progress_template(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "-o".to_string(),
            output_template.to_string_lossy().to_string(),
        ];

        if request.audio_only {
            args.extend([
                "-f".to_string(),
                AUDIO_FORMAT.to_string(),
                "-x".to_string(),
                "--audio-format".to_string(),
                self.audio_format.clone(),
                "--audio-quality".to_string(),
                self.audio_quality.clone(),
            ]);
        } else {
            args.extend(["-f".to_string(), VIDEO_FORMAT.to_string()]);
        }

        args.push("--".to_string());
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl MediaDownloader for YtDlpDownloader {
    async fn download(
        &self,
        request: &DownloadRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf> {
        let args = self.build_args(request);
        debug!(url = %request.url, audio_only = request.audio_only, "Starting yt-dlp");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    anyhow::anyhow!("yt-dlp is not installed (looked for '{}')", self.binary)
                } else {
                    anyhow::anyhow!("Failed to execute yt-dlp: {}", e)
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .context("yt-dlp stdout was not captured")?;
        let mut stderr = child
            .stderr
            .take()
            .context("yt-dlp stderr was not captured")?;

        // Drain stderr concurrently so a chatty child cannot block on a full pipe
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                debug!(error = %e, "Failed to read yt-dlp stderr");
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let mut produced: Option<String> = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .context("Failed to read yt-dlp output")?
        {
            if let Some(event) = parse_progress_line(&line) {
                progress.on_progress(event);
            } else if !line.trim().is_empty() {
                produced = Some(line.trim().to_string());
            }
        }

        let status = child.wait().await.context("Failed to wait for yt-dlp")?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let exit_code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            warn!(url = %request.url, exit_code = %exit_code, "yt-dlp failed");
            anyhow::bail!(
                "yt-dlp failed (exit code {}): {}",
                exit_code,
                last_error_line(&stderr)
            );
        }

        let path = produced
            .map(PathBuf::from)
            .context("yt-dlp did not report the downloaded file")?;
        let path = if path.is_absolute() || path.starts_with(&self.output_dir) {
            path
        } else {
            self.output_dir.join(path)
        };

        info!(url = %request.url, path = %path.display(), "Download finished");
        Ok(path)
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Last meaningful line of the child's stderr.
fn last_error_line(stderr: &str) -> &str {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("no error output")
}
