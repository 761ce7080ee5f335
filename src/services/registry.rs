//! In-memory job registry
//!
//! Tracks one [Job] per accepted download request. The registry is owned by the
//! application state and cloned into the handlers and the orchestrator; all
//! clones share the same map.
//!
//! Status only moves forward along `waiting -> downloading -> converting -> ready`,
//! or to `failed` from any non-terminal state. Every mutation goes through
//! [JobStatus::can_advance_to]; a backward transition is dropped and the job is
//! left untouched. Entries are never removed for the lifetime of the process.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::progress::ProgressEvent;

/// Ids are the trailing 8 digits of the submission timestamp in milliseconds.
const ID_MODULUS: i64 = 100_000_000;

/// Lifecycle state of a download job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Downloading,
    Converting,
    Ready,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Waiting => 0,
            JobStatus::Downloading => 1,
            JobStatus::Converting => 2,
            JobStatus::Ready => 3,
            JobStatus::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Failed)
    }

    /// Whether a job currently in `self` may move to `next`.
    ///
    /// Staying in the same non-terminal state is allowed so repeated progress
    /// events can refresh the numbers.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Failed => true,
            _ => next.rank() >= self.rank(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Downloading => "downloading",
            JobStatus::Converting => "converting",
            JobStatus::Ready => "ready",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tracked unit of work for one download request
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    /// Percentage 0-100
    pub progress: f64,
    /// Human-readable speed as reported by the downloader
    pub speed: String,
    /// Human-readable ETA as reported by the downloader
    pub eta: String,
    /// Basename of the produced file, set once the job is ready
    pub filename: Option<String>,
    /// Failure reason, set once the job has failed
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    fn new(id: String) -> Self {
        Self {
            id,
            status: JobStatus::Waiting,
            progress: 0.0,
            speed: "0 KiB/s".to_string(),
            eta: "00:00".to_string(),
            filename: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// Shared, process-lifetime store of jobs keyed by id
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new job in the `waiting` state and return its id.
    pub fn create(&self) -> String {
        self.create_at(Utc::now().timestamp_millis())
    }

    /// Allocate a job whose id is derived from `millis`. When the derived id is
    /// already taken the next free one is used.
    pub(crate) fn create_at(&self, millis: i64) -> String {
        let mut jobs = self.jobs.write();
        let mut candidate = millis.rem_euclid(ID_MODULUS);
        let mut id = format_id(candidate);
        while jobs.contains_key(&id) {
            candidate = (candidate + 1) % ID_MODULUS;
            id = format_id(candidate);
        }
        jobs.insert(id.clone(), Job::new(id.clone()));
        debug!(job_id = %id, "Job created");
        id
    }

    /// Snapshot of a job's current fields.
    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn ids(&self) -> Vec<String> {
        self.jobs.read().keys().cloned().collect()
    }

    /// Map a downloader progress event onto the job.
    pub fn apply_progress(&self, id: &str, event: ProgressEvent) -> bool {
        match event {
            ProgressEvent::Downloading {
                percent,
                speed,
                eta,
            } => self.transition(id, JobStatus::Downloading, |job| {
                job.progress = percent.clamp(0.0, 100.0);
                job.speed = speed;
                job.eta = eta;
            }),
            // Reported as 100% before post-processing has started
            ProgressEvent::Finished => self.transition(id, JobStatus::Converting, |job| {
                job.progress = 100.0;
            }),
        }
    }

    pub fn mark_ready(&self, id: &str, filename: impl Into<String>) -> bool {
        let filename = filename.into();
        self.transition(id, JobStatus::Ready, |job| {
            job.progress = 100.0;
            job.filename = Some(filename);
        })
    }

    pub fn mark_failed(&self, id: &str, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.transition(id, JobStatus::Failed, |job| {
            job.error = Some(reason);
        })
    }

    fn transition(&self, id: &str, next: JobStatus, apply: impl FnOnce(&mut Job)) -> bool {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(id) else {
            debug!(job_id = %id, status = %next, "Update for unknown job ignored");
            return false;
        };
        if !job.status.can_advance_to(next) {
            debug!(
                job_id = %id,
                from = %job.status,
                to = %next,
                "Backward job transition ignored"
            );
            return false;
        }
        job.status = next;
        apply(job);
        true
    }
}

fn format_id(value: i64) -> String {
    format!("{:08}", value)
}
