//! Background job scheduling and workers

pub mod file_expiry;

use std::path::PathBuf;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};

use crate::config::Config;

/// Initialize and start the job scheduler
pub async fn start_scheduler(config: &Config) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let output_dir = config.output_dir.clone();
    let lifetime = config.file_lifetime;

    // Don't wait a full interval for files left over from a previous run
    let startup_dir = output_dir.clone();
    tokio::spawn(async move {
        run_file_expiry(startup_dir, lifetime).await;
    });

    // Expired file cleanup - run every sweep interval
    let expiry_job = Job::new_repeated_async(config.sweep_interval, move |_uuid, _l| {
        let dir = output_dir.clone();
        Box::pin(async move {
            run_file_expiry(dir, lifetime).await;
        })
    })?;
    scheduler.add(expiry_job).await?;

    scheduler.start().await?;

    info!(
        interval_secs = config.sweep_interval.as_secs(),
        lifetime_secs = config.file_lifetime.as_secs(),
        "Job scheduler started"
    );
    Ok(scheduler)
}

async fn run_file_expiry(dir: PathBuf, lifetime: Duration) {
    debug!(dir = %dir.display(), "Running expired file cleanup");
    match file_expiry::sweep_expired_files(&dir, lifetime).await {
        Ok(report) if report.removed > 0 || report.failed > 0 => {
            info!(
                scanned = report.scanned,
                removed = report.removed,
                failed = report.failed,
                "Expired file cleanup completed"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::error!("File expiry error: {:#}", e),
    }
}
