//! Download progress reporting
//!
//! The downloader reports intermediate events through a [ProgressSink]; the
//! job-backed sink maps them onto the registry. yt-dlp is told to print one
//! machine-readable line per progress update (see [progress_template]) which
//! [parse_progress_line] turns back into a [ProgressEvent].

use super::registry::JobRegistry;

/// Marker that prefixes every progress line we ask yt-dlp to print.
pub const PROGRESS_PREFIX: &str = "mediadrop:";

/// An intermediate event from the download engine
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Bytes are flowing; labels are passed through as the engine formats them
    Downloading {
        percent: f64,
        speed: String,
        eta: String,
    },
    /// A download finished; post-processing may still follow
    Finished,
}

/// Receives progress events while a download runs
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

/// Sink that writes progress into one job of the registry
#[derive(Debug, Clone)]
pub struct JobProgress {
    registry: JobRegistry,
    job_id: String,
}

impl JobProgress {
    pub fn new(registry: JobRegistry, job_id: impl Into<String>) -> Self {
        Self {
            registry,
            job_id: job_id.into(),
        }
    }
}

impl ProgressSink for JobProgress {
    fn on_progress(&self, event: ProgressEvent) {
        self.registry.apply_progress(&self.job_id, event);
    }
}

/// Value for yt-dlp's `--progress-template`.
pub fn progress_template() -> String {
    format!(
        "download:{}%(progress.status)s|%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s",
        PROGRESS_PREFIX
    )
}

/// Parse one stdout line printed with [progress_template].
///
/// Returns `None` for anything that is not a progress line.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let clean = strip_ansi(line);
    let rest = clean.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.splitn(4, '|');
    let status = fields.next()?.trim();

    match status {
        "downloading" => {
            let percent = fields.next().map(parse_percent).unwrap_or(0.0);
            let speed = fields.next().unwrap_or_default().trim().to_string();
            let eta = fields.next().unwrap_or_default().trim().to_string();
            Some(ProgressEvent::Downloading {
                percent,
                speed,
                eta,
            })
        }
        "finished" => Some(ProgressEvent::Finished),
        _ => None,
    }
}

/// `" 42.3%"` -> 42.3; `NA`, `Unknown` and garbage -> 0.
fn parse_percent(raw: &str) -> f64 {
    raw.trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

/// Drop terminal colour sequences (`ESC [ ... letter`).
fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
