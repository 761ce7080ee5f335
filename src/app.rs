//! Application state and HTTP router construction.
//!
//! Used by `main.rs` and by the integration tests to build the Axum app.

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_DISPOSITION;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::config::Config;
use crate::services::{
    DownloadOrchestrator, DownloadQueue, FfmpegService, JobQueueConfig, JobRegistry,
    MediaDownloader, MediaTranscoder, YtDlpDownloader,
};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jobs: JobRegistry,
    pub downloads: Arc<DownloadQueue>,
}

impl AppState {
    /// Wire the registry, orchestrator and download queue around the given engines.
    ///
    /// Spawns the queue's dispatcher, so it must run inside a Tokio runtime.
    pub fn new(
        config: Config,
        downloader: Arc<dyn MediaDownloader>,
        transcoder: Arc<dyn MediaTranscoder>,
    ) -> Self {
        let jobs = JobRegistry::new();
        let orchestrator = DownloadOrchestrator::new(jobs.clone(), downloader, transcoder)
            .with_audio_format(&config.audio_format);
        let queue_config = JobQueueConfig {
            max_concurrent: config.max_concurrent_downloads,
            ..Default::default()
        };
        let downloads = DownloadQueue::new(Arc::new(orchestrator), queue_config);

        Self {
            config: Arc::new(config),
            jobs,
            downloads: Arc::new(downloads),
        }
    }

    /// State backed by the real yt-dlp and ffmpeg executables.
    pub fn from_config(config: Config) -> Self {
        let downloader = Arc::new(YtDlpDownloader::from_config(&config));
        let transcoder = Arc::new(FfmpegService::from_config(&config));
        Self::new(config, downloader, transcoder)
    }
}

/// Build the full Axum router: /api, health probes and layers.
/// Returns Router<()> (state fully applied) for use with axum::serve.
pub fn build_app(state: AppState) -> Router<()> {
    let body_limit = state.config.max_content_length;

    Router::new()
        .merge(api::health::router())
        .nest("/api", api::downloads::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([CONTENT_DISPOSITION]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
