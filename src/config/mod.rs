//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::services::downloader::AUDIO_CODECS;

/// Default lifetime of a finished file before the sweeper removes it (15 minutes).
pub const DEFAULT_FILE_LIFETIME_SECS: u64 = 900;

/// Default interval between two expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default maximum request body size (16 MB).
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 16 * 1024 * 1024;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Directory the downloader writes into and the fetch endpoint serves from
    pub output_dir: PathBuf,

    /// How long a file may stay in the output directory
    pub file_lifetime: Duration,

    /// How often the expiry sweeper runs
    pub sweep_interval: Duration,

    /// Maximum accepted request body in bytes
    pub max_content_length: usize,

    /// Number of downloads processed at the same time
    pub max_concurrent_downloads: usize,

    /// yt-dlp executable
    pub yt_dlp_path: String,

    /// ffmpeg executable
    pub ffmpeg_path: String,

    /// ffprobe executable
    pub ffprobe_path: String,

    /// Codec audio-only downloads are extracted to (also the file extension)
    pub audio_format: String,

    /// Quality target handed to yt-dlp's audio extraction
    pub audio_quality: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            output_dir: PathBuf::from("downloads"),
            file_lifetime: Duration::from_secs(DEFAULT_FILE_LIFETIME_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            max_concurrent_downloads: 2,
            yt_dlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            audio_format: "mp3".to_string(),
            audio_quality: "192K".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // UPLOAD_FOLDER is what existing deployments set; OUTPUT_DIR reads better
        let output_dir = lookup("UPLOAD_FOLDER")
            .or_else(|| lookup("OUTPUT_DIR"))
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let max_concurrent_downloads: usize = parse_var(&lookup, "MAX_CONCURRENT_DOWNLOADS")?
            .unwrap_or(defaults.max_concurrent_downloads);
        if max_concurrent_downloads == 0 {
            anyhow::bail!("MAX_CONCURRENT_DOWNLOADS must be at least 1");
        }

        let audio_format = lookup("AUDIO_FORMAT").unwrap_or(defaults.audio_format);
        if !AUDIO_CODECS.contains(&audio_format.as_str()) {
            anyhow::bail!(
                "Invalid AUDIO_FORMAT '{}', expected one of: {}",
                audio_format,
                AUDIO_CODECS.join(", ")
            );
        }

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),

            port: parse_var(&lookup, "PORT")?.unwrap_or(defaults.port),

            output_dir,

            file_lifetime: parse_var(&lookup, "FILE_LIFETIME_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.file_lifetime),

            sweep_interval: parse_var(&lookup, "SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),

            max_content_length: parse_var(&lookup, "MAX_CONTENT_LENGTH")?
                .unwrap_or(defaults.max_content_length),

            max_concurrent_downloads,

            yt_dlp_path: lookup("YT_DLP_PATH").unwrap_or(defaults.yt_dlp_path),

            ffmpeg_path: lookup("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),

            ffprobe_path: lookup("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),

            audio_format,

            audio_quality: lookup("AUDIO_QUALITY").unwrap_or(defaults.audio_quality),
        })
    }
}

/// Read and parse an optional variable; a set but malformed value is an error.
fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {}", name)),
        None => Ok(None),
    }
}
