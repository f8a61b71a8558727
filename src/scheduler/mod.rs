//! Batch scheduler collaborator.
//!
//! The agent never makes placement decisions; it only shuttles submit, cancel
//! and state queries to the scheduler CLI behind [`BatchScheduler`].

pub mod slurm;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::JobError;
use crate::process::ProcessError;
use crate::store::JobId;

pub use slurm::SlurmScheduler;

/// Resource request attached to a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub cpus: u32,
    /// Memory in GiB
    pub memory_gb: u32,
    /// Zero means no GPU request at all
    pub gpus: u32,
}

/// Everything the scheduler needs to queue one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub job_id: JobId,
    pub job_name: String,
    /// Recorded as the job comment so listings can show who submitted it
    pub requester: String,
    pub resources: ResourceRequest,
    pub notify_email: String,
    /// Directory the scheduler runs from
    pub work_dir: PathBuf,
    /// Script file name, relative to `work_dir`
    pub script: String,
}

#[async_trait]
pub trait BatchScheduler: Send + Sync {
    /// Queue a job; returns the scheduler's output on success.
    async fn submit(&self, request: &SubmitRequest) -> Result<String, JobError>;

    /// Cancel by id. Output and failures are reported verbatim.
    async fn cancel(&self, job_id: &JobId) -> Result<String, JobError>;

    /// Current state name (e.g. `RUNNING`), or `None` if the scheduler has no state for it.
    async fn query_state(&self, job_id: &JobId) -> Result<Option<String>, ProcessError>;
}

/// States in which the job may still be writing into its folder.
pub fn is_running_state(state: &str) -> bool {
    matches!(
        state.trim().to_ascii_uppercase().as_str(),
        "RUNNING" | "COMPLETING" | "CONFIGURING"
    )
}
