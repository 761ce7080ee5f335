//! Integration tests for the download API
//!
//! These drive the full router with fake download/transcode engines:
//! - submit, poll and fetch for video and audio jobs
//! - request validation
//! - failure reporting on the job
//! - interaction between the expiry sweeper and finished jobs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use mediadrop::api::downloads::{ProgressResponse, StartDownloadResponse};
use mediadrop::jobs::file_expiry::sweep_expired_files_at;
use mediadrop::services::{
    DownloadRequest, JobStatus, MediaDownloader, MediaTranscoder, ProgressEvent, ProgressSink,
};
use mediadrop::{AppState, Config, build_app};

// ============================================================================
// Fake engines
// ============================================================================

const MEDIA_BYTES: &[u8] = b"not really a video";

/// Behaves like yt-dlp with `%(id)s.%(ext)s`: writes `clip.<ext>` into the
/// output directory after reporting some progress.
struct FakeDownloader {
    output_dir: PathBuf,
    fail_with: Option<&'static str>,
}

#[async_trait]
impl MediaDownloader for FakeDownloader {
    async fn download(
        &self,
        request: &DownloadRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PathBuf> {
        for percent in [10.0, 55.5, 100.0] {
            progress.on_progress(ProgressEvent::Downloading {
                percent,
                speed: "2.00MiB/s".to_string(),
                eta: "00:01".to_string(),
            });
        }
        if let Some(message) = self.fail_with {
            anyhow::bail!("{}", message);
        }
        progress.on_progress(ProgressEvent::Finished);

        if request.audio_only {
            // The extractor writes the mp3 but the reported name keeps the source container
            tokio::fs::write(self.output_dir.join("clip.mp3"), MEDIA_BYTES).await?;
            Ok(self.output_dir.join("clip.webm"))
        } else {
            let path = self.output_dir.join("clip.mp4");
            tokio::fs::write(&path, MEDIA_BYTES).await?;
            Ok(path)
        }
    }
}

struct H264Transcoder;

#[async_trait]
impl MediaTranscoder for H264Transcoder {
    async fn video_codec(&self, _path: &Path) -> Result<Option<String>> {
        Ok(Some("h264".to_string()))
    }

    async fn transcode_to_h264(&self, _input: &Path, _output: &Path) -> Result<()> {
        anyhow::bail!("h264 input must not be transcoded")
    }
}

struct TestApp {
    app: Router,
    state: AppState,
    dir: TempDir,
}

fn test_app(fail_with: Option<&'static str>) -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = Config {
        output_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let downloader = Arc::new(FakeDownloader {
        output_dir: dir.path().to_path_buf(),
        fail_with,
    });
    let state = AppState::new(config, downloader, Arc::new(H264Transcoder));
    TestApp {
        app: build_app(state.clone()),
        state,
        dir,
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, _, bytes) = send(app, request).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn start(app: &Router, body: Value) -> String {
    let (status, value) = post_json(app, "/api/download", body).await;
    assert_eq!(status, StatusCode::CREATED, "unexpected body {}", value);
    let response: StartDownloadResponse = serde_json::from_value(value).unwrap();
    response.download_id
}

/// Poll the progress endpoint until the job stops running.
async fn wait_until_done(app: &Router, id: &str) -> ProgressResponse {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (status, _, body) = get(app, &format!("/api/progress/{}", id)).await;
            assert_eq!(status, StatusCode::OK);
            let progress: ProgressResponse = serde_json::from_slice(&body).unwrap();
            if matches!(progress.status, JobStatus::Ready | JobStatus::Failed) {
                return progress;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}

// ============================================================================
// Submit / poll / fetch
// ============================================================================

#[tokio::test]
async fn test_video_download_end_to_end() {
    let t = test_app(None);

    let id = start(&t.app, json!({"url": "https://example.com/watch?v=1", "audio_only": false})).await;
    assert_eq!(id.len(), 8);
    assert!(id.chars().all(|c| c.is_ascii_digit()));

    let progress = wait_until_done(&t.app, &id).await;
    assert_eq!(progress.status, JobStatus::Ready);
    assert_eq!(progress.progress, 100.0);
    assert_eq!(progress.filename.as_deref(), Some("clip.mp4"));
    assert!(progress.error.is_none());

    let (status, headers, body) = get(&t.app, "/api/download/clip.mp4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, MEDIA_BYTES);
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert!(
        headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("attachment; filename=\"clip.mp4\"")
    );
}

#[tokio::test]
async fn test_audio_download_gets_audio_extension() {
    let t = test_app(None);

    let id = start(&t.app, json!({"url": "https://example.com/a", "audio_only": true})).await;
    let progress = wait_until_done(&t.app, &id).await;

    assert_eq!(progress.status, JobStatus::Ready);
    let filename = progress.filename.unwrap();
    assert!(filename.ends_with(".mp3"), "got {}", filename);

    let (status, headers, body) = get(&t.app, &format!("/api/download/{}", filename)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, MEDIA_BYTES);
    assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
}

#[tokio::test]
async fn test_audio_only_defaults_to_false() {
    let t = test_app(None);

    let id = start(&t.app, json!({"url": "https://example.com/v"})).await;
    let progress = wait_until_done(&t.app, &id).await;
    assert_eq!(progress.filename.as_deref(), Some("clip.mp4"));
}

#[tokio::test]
async fn test_each_submission_gets_its_own_job() {
    let t = test_app(None);

    let first = start(&t.app, json!({"url": "https://example.com/1"})).await;
    let second = start(&t.app, json!({"url": "https://example.com/2"})).await;

    assert_ne!(first, second);
    assert_eq!(t.state.jobs.len(), 2);
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_missing_url_is_rejected_without_creating_a_job() {
    let t = test_app(None);

    let (status, body) = post_json(&t.app, "/api/download", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "URL is required"}));
    assert!(t.state.jobs.is_empty());

    let (status, _) = post_json(&t.app, "/api/download", json!({"url": "   "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(t.state.jobs.is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_a_client_error() {
    let t = test_app(None);

    let request = Request::post("/api/download")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"url\": "))
        .unwrap();
    let (status, _, body) = send(&t.app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert!(value["error"].is_string());
    assert!(t.state.jobs.is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let t = test_app(None);

    for id in ["12345678", "00000000", "not-an-id"] {
        let (status, _, body) = get(&t.app, &format!("/api/progress/{}", id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"error": "Invalid download ID"}));
    }
}

#[tokio::test]
async fn test_path_traversal_is_rejected() {
    let t = test_app(None);
    // A real file one level above the output directory
    let outside = t.dir.path().parent().unwrap().join("mediadrop-outside.txt");
    let _ = std::fs::write(&outside, b"secret");

    for uri in [
        "/api/download/..%2F..%2Fetc%2Fpasswd",
        "/api/download/..%2Fmediadrop-outside.txt",
        "/api/download/%2Fetc%2Fpasswd",
        "/api/download/..",
    ] {
        let (status, _, body) = get(&t.app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"error": "Invalid filename"}));
    }

    let _ = std::fs::remove_file(&outside);
}

#[tokio::test]
async fn test_missing_file_is_not_found() {
    let t = test_app(None);

    let (status, _, body) = get(&t.app, "/api/download/nothing.mp4").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value, json!({"error": "File not found"}));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_download_is_reported_on_the_job() {
    let t = test_app(Some("ERROR: Unsupported URL: https://example.com/nope"));

    let id = start(&t.app, json!({"url": "https://example.com/nope"})).await;
    let progress = wait_until_done(&t.app, &id).await;

    assert_eq!(progress.status, JobStatus::Failed);
    assert_eq!(
        progress.error.as_deref(),
        Some("ERROR: Unsupported URL: https://example.com/nope")
    );
    assert!(progress.filename.is_none());
    // Last reported progress is kept for the client
    assert_eq!(progress.progress, 100.0);
    assert_eq!(progress.speed, "2.00MiB/s");
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test]
async fn test_expired_file_disappears_while_job_stays_ready() {
    let t = test_app(None);

    let id = start(&t.app, json!({"url": "https://example.com/v"})).await;
    let progress = wait_until_done(&t.app, &id).await;
    assert_eq!(progress.status, JobStatus::Ready);

    let later = SystemTime::now() + Duration::from_secs(3600);
    let report = sweep_expired_files_at(t.dir.path(), t.state.config.file_lifetime, later)
        .await
        .unwrap();
    assert_eq!(report.removed, 1);

    let (status, _, _) = get(&t.app, "/api/download/clip.mp4").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let job = t.state.jobs.get(&id).unwrap();
    assert_eq!(job.status, JobStatus::Ready);
    assert_eq!(job.filename.as_deref(), Some("clip.mp4"));
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_healthz() {
    let t = test_app(None);

    let (status, _, body) = get(&t.app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "healthy");
}

#[tokio::test]
async fn test_readyz_with_fake_engines() {
    let t = test_app(None);

    let (status, _, body) = get(&t.app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["ready"], true);
    assert_eq!(value["output_dir"], true);
    assert_eq!(value["jobs"], 0);
}
