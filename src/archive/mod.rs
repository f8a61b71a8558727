//! Archive builder with a staleness policy.
//!
//! An archive `<root>/<id>.zip` is fresh when it exists and its mtime is not
//! older than the job folder's timestamp at check time. Freshness is checked
//! on every request and never cached.
//!
//! # Build protocol
//!
//! 1. The folder must exist, else [`JobError::NotFound`]
//! 2. A running job is skipped without touching any file
//! 3. A fresh archive is skipped
//! 4. Otherwise the compressor writes a hidden temporary sibling which is
//!    renamed onto `<id>.zip` only after it finished and is non-empty
//!
//! Calls for the same id are serialized through a per-id lock; different
//! ids build in parallel.

pub mod compressor;
pub mod locks;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use serde::Serialize;
use tempfile::TempPath;

use crate::config::StalenessPolicy;
use crate::error::JobError;
use crate::probe::StateProber;
use crate::store::{JobId, JobIndex};

pub use compressor::{Compressor, ZipCommand};
pub use locks::KeyedLocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Running,
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Rebuilt,
    Skipped(SkipReason),
}

impl ArchiveOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveOutcome::Rebuilt => "rebuilt",
            ArchiveOutcome::Skipped(SkipReason::Fresh) => "fresh",
            ArchiveOutcome::Skipped(SkipReason::Running) => "running",
        }
    }
}

impl std::fmt::Display for ArchiveOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Missing,
    Stale,
    Fresh,
}

pub struct Archiver {
    index: JobIndex,
    prober: Arc<dyn StateProber>,
    compressor: Arc<dyn Compressor>,
    policy: StalenessPolicy,
    locks: KeyedLocks<JobId>,
}

impl Archiver {
    pub fn new(
        index: JobIndex,
        prober: Arc<dyn StateProber>,
        compressor: Arc<dyn Compressor>,
        policy: StalenessPolicy,
    ) -> Self {
        Self {
            index,
            prober,
            compressor,
            policy,
            locks: KeyedLocks::new(),
        }
    }

    pub fn index(&self) -> &JobIndex {
        &self.index
    }

    /// Build or refresh the archive for `job_id` if it is safe and needed.
    pub async fn ensure_archive(&self, job_id: &JobId) -> Result<ArchiveOutcome, JobError> {
        if !self.index.exists(job_id).await {
            return Err(JobError::NotFound(format!("Job folder '{}' not found", job_id)));
        }

        let _guard = self.locks.lock(job_id.clone()).await;

        if self.prober.is_running(job_id).await {
            tracing::debug!(job_id = %job_id, "Job is running, archive left untouched");
            return Ok(ArchiveOutcome::Skipped(SkipReason::Running));
        }

        let content_mtime = self.content_mtime(job_id).await?;
        if let Some(archive_mtime) = self.index.archive_mtime(job_id).await? {
            if archive_mtime >= content_mtime {
                tracing::debug!(job_id = %job_id, "Archive is fresh");
                return Ok(ArchiveOutcome::Skipped(SkipReason::Fresh));
            }
        }

        self.rebuild(job_id, content_mtime).await?;
        Ok(ArchiveOutcome::Rebuilt)
    }

    /// Report archive freshness without building anything.
    pub async fn freshness(&self, job_id: &JobId) -> Result<Freshness, JobError> {
        let content_mtime = self.content_mtime(job_id).await?;
        Ok(match self.index.archive_mtime(job_id).await? {
            None => Freshness::Missing,
            Some(archive_mtime) if archive_mtime >= content_mtime => Freshness::Fresh,
            Some(_) => Freshness::Stale,
        })
    }

    async fn content_mtime(&self, job_id: &JobId) -> Result<SystemTime, JobError> {
        self.index
            .content_mtime(job_id, self.policy)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    JobError::NotFound(format!("Job folder '{}' not found", job_id))
                }
                _ => JobError::Io(e),
            })
    }

    async fn rebuild(&self, job_id: &JobId, content_mtime: SystemTime) -> Result<(), JobError> {
        let started = Instant::now();
        let destination = self.index.archive_path(job_id);
        // Deleted on drop, including when this future is dropped mid-build.
        let partial = TempPath::from_path(self.partial_path(job_id));

        if let Err(details) = self
            .compressor
            .compress(self.index.root(), job_id, &partial)
            .await
        {
            tracing::warn!(job_id = %job_id, error = %details, "Archive build failed");
            return Err(JobError::ArchiveFailed(details));
        }

        if let Err(e) = publish(partial, &destination, content_mtime).await {
            tracing::warn!(job_id = %job_id, error = %e, "Archive publish failed");
            return Err(JobError::ArchiveFailed(e.to_string()));
        }

        tracing::info!(
            job_id = %job_id,
            archive = %destination.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Archive rebuilt"
        );
        Ok(())
    }

    /// Hidden sibling in the same directory so the final rename is atomic.
    fn partial_path(&self, job_id: &JobId) -> PathBuf {
        self.index.root().join(format!(
            ".{}.{}.partial.zip",
            job_id,
            uuid::Uuid::new_v4().simple()
        ))
    }
}

/// Check the finished file, stamp it with the folder time it snapshots, and
/// move it into place. The partial file is removed on every failure.
async fn publish(
    partial: TempPath,
    destination: &Path,
    content_mtime: SystemTime,
) -> io::Result<()> {
    let meta = tokio::fs::metadata(&partial).await?;
    if meta.len() == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "compressor produced an empty archive",
        ));
    }

    let destination = destination.to_path_buf();
    tokio::task::spawn_blocking(move || {
        // A folder modified while the compressor ran must read as stale afterwards.
        let stamped = std::fs::OpenOptions::new()
            .write(true)
            .open(&partial)
            .and_then(|file| file.set_modified(content_mtime));
        if let Err(e) = stamped {
            tracing::warn!(archive = %partial.display(), error = %e, "Could not stamp archive mtime");
        }
        partial.persist(&destination).map_err(io::Error::from)
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
