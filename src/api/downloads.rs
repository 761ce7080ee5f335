//! Download REST endpoints
//!
//! `POST /download` queues a job and returns its id, `GET /progress/{id}` reports
//! the job's state, and `GET /download/{filename}` streams a finished file from
//! the output directory as an attachment.

use std::io::ErrorKind;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::error::ApiError;
use crate::app::AppState;
use crate::services::{DownloadRequest, Job, JobStatus};

#[derive(Debug, Deserialize)]
pub struct StartDownloadRequest {
    pub url: Option<String>,
    #[serde(default)]
    pub audio_only: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartDownloadResponse {
    pub download_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub progress: f64,
    pub speed: String,
    pub eta: String,
    pub status: JobStatus,
    pub filename: Option<String>,
    pub error: Option<String>,
}

impl From<Job> for ProgressResponse {
    fn from(job: Job) -> Self {
        Self {
            progress: job.progress,
            speed: job.speed,
            eta: job.eta,
            status: job.status,
            filename: job.filename,
            error: job.error,
        }
    }
}

/// Queue a download
async fn start_download(
    State(state): State<AppState>,
    payload: Result<Json<StartDownloadRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartDownloadResponse>), ApiError> {
    let Json(body) = payload?;

    let url = match body.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => return Err(ApiError::bad_request("URL is required")),
    };

    let request = DownloadRequest {
        url,
        audio_only: body.audio_only.unwrap_or(false),
    };

    let download_id = state
        .downloads
        .submit(request)
        .await
        .map_err(|e| ApiError::internal(format!("{:#}", e)))?;

    Ok((StatusCode::CREATED, Json(StartDownloadResponse { download_id })))
}

/// Current state of a job
async fn get_progress(
    State(state): State<AppState>,
    Path(download_id): Path<String>,
) -> Result<Json<ProgressResponse>, ApiError> {
    state
        .jobs
        .get(&download_id)
        .map(|job| Json(job.into()))
        .ok_or_else(|| ApiError::not_found("Invalid download ID"))
}

/// Stream a finished file as an attachment
async fn download_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    if !is_safe_filename(&filename) {
        warn!(filename = %filename, "Rejected unsafe filename");
        return Err(ApiError::bad_request("Invalid filename"));
    }

    let path = state.config.output_dir.join(&filename);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found"));
        }
        Err(e) => return Err(ApiError::internal(format!("Cannot open file: {}", e))),
    };
    let metadata = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal(format!("Cannot read file metadata: {}", e)))?;
    if !metadata.is_file() {
        return Err(ApiError::not_found("File not found"));
    }

    debug!(filename = %filename, size = metadata.len(), "Serving file");

    let content_type = mime_guess::from_path(&filename).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(content_type.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("Cannot build download header"))?,
    );

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

/// A bare file name inside the output directory.
///
/// Rejects parent-directory sequences, leading separators and anything that
/// would address another directory.
pub fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.contains("..")
        && !filename.starts_with('/')
        && !filename.starts_with('\\')
        && !filename.contains(['/', '\\', '\0'])
}

fn build_content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ' | '(' | ')') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        urlencoding::encode(filename)
    )
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/download", post(start_download))
        .route("/download/{filename}", get(download_file))
        .route("/progress/{download_id}", get(get_progress))
}
