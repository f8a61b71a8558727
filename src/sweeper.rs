use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveOutcome, Archiver, SkipReason};
use crate::store::JobId;

/// Tally of one pass over the jobs root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub rebuilt: Vec<JobId>,
    pub skipped_running: Vec<JobId>,
    pub skipped_fresh: Vec<JobId>,
    pub failed: Vec<(JobId, String)>,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.rebuilt.len() + self.skipped_running.len() + self.skipped_fresh.len() + self.failed.len()
    }
}

/// Periodically refreshes the archive of every job folder that is not running.
pub struct Sweeper {
    archiver: Arc<Archiver>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(archiver: Arc<Archiver>, interval: Duration) -> Self {
        Self { archiver, interval }
    }

    /// Sweep on every tick until `shutdown` is cancelled.
    ///
    /// Sweeps run inline, so ticks that come due while one is in progress are
    /// dropped rather than queued.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(interval = ?self.interval, "Starting archive sweeper");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Archive sweeper stopped");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.sweep_once().await;
                    tracing::info!(
                        jobs = report.total(),
                        rebuilt = report.rebuilt.len(),
                        running = report.skipped_running.len(),
                        fresh = report.skipped_fresh.len(),
                        failed = report.failed.len(),
                        "Sweep finished"
                    );
                }
            }
        }
    }

    /// One pass: every job folder gets an `ensure_archive` call. A failing job
    /// is recorded and the pass moves on.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let jobs = match self.archiver.index().list_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(
                    root = %self.archiver.index().root().display(),
                    error = %e,
                    "Could not list job folders"
                );
                return report;
            }
        };

        for job_id in jobs {
            match self.archiver.ensure_archive(&job_id).await {
                Ok(ArchiveOutcome::Rebuilt) => report.rebuilt.push(job_id),
                Ok(ArchiveOutcome::Skipped(SkipReason::Running)) => {
                    report.skipped_running.push(job_id)
                }
                Ok(ArchiveOutcome::Skipped(SkipReason::Fresh)) => report.skipped_fresh.push(job_id),
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Sweep could not archive job");
                    report.failed.push((job_id, e.details()));
                }
            }
        }
        report
    }
}
