//! Expired file cleanup for the output directory
//!
//! Removes regular files whose modification time is older than the configured
//! lifetime. The sweep knows nothing about jobs: a job can still report `ready`
//! for a file that has already been removed.

use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Outcome of one sweep over the output directory
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Regular files looked at
    pub scanned: usize,
    /// Files deleted because they outlived the lifetime
    pub removed: usize,
    /// Files that could not be inspected or deleted
    pub failed: usize,
}

/// Delete every regular file in `dir` older than `lifetime`.
pub async fn sweep_expired_files(dir: &Path, lifetime: Duration) -> Result<SweepReport> {
    sweep_expired_files_at(dir, lifetime, SystemTime::now()).await
}

/// Same as [sweep_expired_files] with an explicit notion of "now".
///
/// A file is expired when `now - mtime` is strictly greater than `lifetime`.
/// Per-file errors are logged and counted; only failing to list the directory
/// is returned as an error.
pub async fn sweep_expired_files_at(
    dir: &Path,
    lifetime: Duration,
    now: SystemTime,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Cannot read output directory '{}'", dir.display()))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("Cannot iterate output directory '{}'", dir.display()))?
    {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read file metadata");
                report.failed += 1;
                continue;
            }
        };

        if !metadata.is_file() {
            continue;
        }
        report.scanned += 1;

        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read modification time");
                report.failed += 1;
                continue;
            }
        };

        // Modification times in the future count as brand new
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= lifetime {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), age_secs = age.as_secs(), "Removed expired file");
                report.removed += 1;
            }
            // Someone else got there first
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove expired file");
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const LIFETIME: Duration = Duration::from_secs(900);

    async fn file_with_mtime(dir: &TempDir, name: &str) -> (std::path::PathBuf, SystemTime) {
        let path = dir.path().join(name);
        tokio::fs::write(&path, b"data").await.unwrap();
        let modified = tokio::fs::metadata(&path).await.unwrap().modified().unwrap();
        (path, modified)
    }

    #[tokio::test]
    async fn test_file_past_lifetime_is_removed() {
        let dir = TempDir::new().unwrap();
        let (path, modified) = file_with_mtime(&dir, "old.mp4").await;

        let now = modified + LIFETIME + Duration::from_secs(1);
        let report = sweep_expired_files_at(dir.path(), LIFETIME, now).await.unwrap();

        assert!(!path.exists());
        assert_eq!(
            report,
            SweepReport {
                scanned: 1,
                removed: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_file_within_lifetime_is_kept() {
        let dir = TempDir::new().unwrap();
        let (path, modified) = file_with_mtime(&dir, "fresh.mp4").await;

        let now = modified + LIFETIME - Duration::from_secs(1);
        let report = sweep_expired_files_at(dir.path(), LIFETIME, now).await.unwrap();

        assert!(path.exists());
        assert_eq!(report.removed, 0);
        assert_eq!(report.scanned, 1);
    }

    #[tokio::test]
    async fn test_exact_lifetime_is_kept() {
        let dir = TempDir::new().unwrap();
        let (path, modified) = file_with_mtime(&dir, "edge.mp3").await;

        sweep_expired_files_at(dir.path(), LIFETIME, modified + LIFETIME)
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("partial");
        tokio::fs::create_dir(&sub).await.unwrap();
        let (_, modified) = file_with_mtime(&dir, "old.mp4").await;

        let now = modified + LIFETIME * 10;
        let report = sweep_expired_files_at(dir.path(), LIFETIME, now).await.unwrap();

        assert!(sub.exists());
        assert_eq!(report.scanned, 1);
        assert_eq!(report.removed, 1);
    }

    #[tokio::test]
    async fn test_future_mtime_is_kept() {
        let dir = TempDir::new().unwrap();
        let (path, modified) = file_with_mtime(&dir, "clock-skew.mp4").await;

        let now = modified - Duration::from_secs(3600);
        sweep_expired_files_at(dir.path(), LIFETIME, now).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        assert!(sweep_expired_files(&missing, LIFETIME).await.is_err());
    }
}
