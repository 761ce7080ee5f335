//! Health check endpoints

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::app::AppState;
use crate::services::QueueStats;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub output_dir: bool,
    pub downloader: bool,
    pub transcoder: bool,
    pub jobs: usize,
    pub queue: QueueStats,
}

/// Health check - always returns OK if the server is running
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check - verifies the output directory and external tools
async fn readyz(State(state): State<AppState>) -> Json<ReadyResponse> {
    let output_dir = tokio::fs::metadata(&state.config.output_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);

    let orchestrator = state.downloads.orchestrator();
    let downloader = orchestrator.downloader().is_available().await;
    let transcoder = orchestrator.transcoder().is_available().await;

    Json(ReadyResponse {
        ready: output_dir && downloader && transcoder,
        output_dir,
        downloader,
        transcoder,
        jobs: state.jobs.len(),
        queue: state.downloads.stats(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
