//! Download orchestration
//!
//! [DownloadOrchestrator] drives one job from `waiting` to a terminal state: it
//! runs the downloader with a registry-backed progress sink, normalises the
//! produced file, and records either the final filename or the failure reason.
//!
//! [DownloadQueue] is the submit-then-poll front: it allocates the job, hands
//! the work to a bounded [WorkQueue] and returns the id straight away. Callers
//! follow the job through the registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use super::downloader::{DownloadRequest, MediaDownloader, audio_extension};
use super::ffmpeg::{MediaTranscoder, needs_transcode};
use super::job_queue::{JobQueueConfig, QueueStats, WorkQueue};
use super::progress::JobProgress;
use super::registry::JobRegistry;

/// Runs downloads against the external engines and reports into the registry
pub struct DownloadOrchestrator {
    registry: JobRegistry,
    downloader: Arc<dyn MediaDownloader>,
    transcoder: Arc<dyn MediaTranscoder>,
    audio_format: String,
}

impl DownloadOrchestrator {
    pub fn new(
        registry: JobRegistry,
        downloader: Arc<dyn MediaDownloader>,
        transcoder: Arc<dyn MediaTranscoder>,
    ) -> Self {
        Self {
            registry,
            downloader,
            transcoder,
            audio_format: "mp3".to_string(),
        }
    }

    /// Extension audio-only results are renamed to
    pub fn with_audio_format(mut self, format: impl Into<String>) -> Self {
        self.audio_format = format.into();
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn downloader(&self) -> &Arc<dyn MediaDownloader> {
        &self.downloader
    }

    pub fn transcoder(&self) -> &Arc<dyn MediaTranscoder> {
        &self.transcoder
    }

    /// Create a job and run it to completion before returning its id.
    pub async fn run(&self, request: DownloadRequest) -> Result<String> {
        let id = self.registry.create();
        self.execute(&id, &request).await?;
        Ok(id)
    }

    /// Run an already allocated job. Returns the final filename.
    ///
    /// On error the job is marked failed with the error's message.
    pub async fn execute(&self, id: &str, request: &DownloadRequest) -> Result<String> {
        match self.process(id, request).await {
            Ok(filename) => {
                self.registry.mark_ready(id, filename.as_str());
                info!(job_id = %id, filename = %filename, "Job ready");
                Ok(filename)
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                error!(job_id = %id, url = %request.url, error = %reason, "Job failed");
                self.registry.mark_failed(id, reason);
                Err(e)
            }
        }
    }

    async fn process(&self, id: &str, request: &DownloadRequest) -> Result<String> {
        let progress = JobProgress::new(self.registry.clone(), id);
        let produced = self.downloader.download(request, &progress).await?;

        let final_path = if request.audio_only {
            // The extractor already wrote this codec; only the name is adjusted
            match audio_extension(&self.audio_format) {
                Some(ext) => produced.with_extension(ext),
                None => produced,
            }
        } else {
            self.normalize_video(&produced).await?
        };

        final_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .with_context(|| format!("Produced path '{}' has no file name", final_path.display()))
    }

    /// Re-encode to H.264 when needed and return the path to serve.
    async fn normalize_video(&self, path: &Path) -> Result<PathBuf> {
        let codec = self.transcoder.video_codec(path).await?;
        if !needs_transcode(codec.as_deref()) {
            return Ok(path.to_path_buf());
        }

        let target = h264_target(path);
        info!(
            source = %path.display(),
            codec = ?codec,
            target = %target.display(),
            "Video is not H.264, re-encoding"
        );
        self.transcoder.transcode_to_h264(path, &target).await?;
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("Failed to remove original '{}'", path.display()))?;
        Ok(target)
    }
}

/// `dir/abc.webm` -> `dir/abc_h264.mp4`
fn h264_target(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    path.with_file_name(format!("{}_h264.mp4", stem))
}

#[derive(Debug)]
struct QueuedDownload {
    job_id: String,
    request: DownloadRequest,
}

/// Submit-then-poll front for the orchestrator
pub struct DownloadQueue {
    orchestrator: Arc<DownloadOrchestrator>,
    queue: WorkQueue<QueuedDownload>,
}

impl DownloadQueue {
    /// Must be called from within a Tokio runtime.
    pub fn new(orchestrator: Arc<DownloadOrchestrator>, config: JobQueueConfig) -> Self {
        let worker = orchestrator.clone();
        let queue = WorkQueue::new("downloads", config, move |item: QueuedDownload| {
            let worker = worker.clone();
            async move {
                // Outcome is recorded on the job
                let _ = worker.execute(&item.job_id, &item.request).await;
            }
        });

        Self {
            orchestrator,
            queue,
        }
    }

    /// Allocate a job and queue the download; returns the job id immediately.
    pub async fn submit(&self, request: DownloadRequest) -> Result<String> {
        let registry = self.orchestrator.registry();
        let job_id = registry.create();
        info!(job_id = %job_id, url = %request.url, audio_only = request.audio_only, "Download accepted");

        let queued = QueuedDownload {
            job_id: job_id.clone(),
            request,
        };
        if let Err(e) = self.queue.submit(queued).await {
            registry.mark_failed(&job_id, e.to_string());
            return Err(e.into());
        }
        Ok(job_id)
    }

    pub fn orchestrator(&self) -> &Arc<DownloadOrchestrator> {
        &self.orchestrator
    }

    pub fn registry(&self) -> &JobRegistry {
        self.orchestrator.registry()
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }
}
