//! Job tracking and the external download/transcode engines

pub mod downloader;
pub mod ffmpeg;
pub mod job_queue;
pub mod orchestrator;
pub mod progress;
pub mod registry;

pub use downloader::{DownloadRequest, MediaDownloader, YtDlpDownloader};
pub use ffmpeg::{FfmpegService, MediaTranscoder};
pub use job_queue::{JobQueueConfig, QueueStats, WorkQueue};
pub use orchestrator::{DownloadOrchestrator, DownloadQueue};
pub use progress::{JobProgress, ProgressEvent, ProgressSink};
pub use registry::{Job, JobRegistry, JobStatus};
