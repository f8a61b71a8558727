//! Job submission and cancellation.
//!
//! # Submission
//!
//! 1. Validate the request into a [`JobSpec`]
//! 2. Delete any folder already using the id (last submission wins)
//! 3. Fetch the source into `<root>/<id>/`
//! 4. Normalize script line endings and locate the entry script
//! 5. Hand the job to the scheduler from the script's directory
//!
//! Submission is not atomic. A failed fetch or a rejected `sbatch` leaves the
//! folder on disk so the failure can be inspected or the job resubmitted.

pub mod fetch;
pub mod script;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobError;
use crate::scheduler::slurm::parse_submitted_job_id;
use crate::scheduler::{BatchScheduler, ResourceRequest, SubmitRequest};
use crate::store::{JobId, JobIndex};

pub use fetch::{ArchiveTransport, CommandFetcher, SourceFetch, SourceOrigin};
pub use script::{find_job_script, normalize_line_endings, ScriptLocation};

/// Submission body as clients send it. Every field is optional here so
/// validation can name all missing ones at once.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(rename = "Job_id")]
    pub job_id: Option<Value>,
    #[serde(rename = "Job_name")]
    pub job_name: Option<String>,
    pub github_url: Option<String>,
    pub user_name: Option<String>,
    pub cpu_request: Option<Value>,
    pub gpu_request: Option<Value>,
    pub memory_request: Option<Value>,
    pub user_email: Option<String>,
}

/// A validated submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub job_id: JobId,
    pub name: String,
    pub origin: SourceOrigin,
    pub requester: String,
    pub resources: ResourceRequest,
    pub notify_email: String,
}

impl TryFrom<SubmitJobRequest> for JobSpec {
    type Error = JobError;

    fn try_from(req: SubmitJobRequest) -> Result<Self, Self::Error> {
        let mut missing = Vec::new();

        let job_id = scalar_text(req.job_id.as_ref());
        let name = non_empty(req.job_name);
        let url = non_empty(req.github_url);
        let requester = non_empty(req.user_name);
        let email = non_empty(req.user_email);
        let cpus = count(req.cpu_request.as_ref(), "cpu_request")?.filter(|n| *n > 0);
        let memory_gb = count(req.memory_request.as_ref(), "memory_request")?.filter(|n| *n > 0);
        let gpus = count(req.gpu_request.as_ref(), "gpu_request")?.unwrap_or(0);

        for (field, present) in [
            ("Job_id", job_id.is_some()),
            ("Job_name", name.is_some()),
            ("github_url", url.is_some()),
            ("user_name", requester.is_some()),
            ("cpu_request", cpus.is_some()),
            ("memory_request", memory_gb.is_some()),
            ("user_email", email.is_some()),
        ] {
            if !present {
                missing.push(field);
            }
        }
        if !missing.is_empty() {
            return Err(JobError::InvalidRequest(format!(
                "Missing required parameters: {}",
                missing.join(", ")
            )));
        }

        // All present, checked above.
        let (
            Some(job_id),
            Some(name),
            Some(url),
            Some(requester),
            Some(cpus),
            Some(memory_gb),
            Some(notify_email),
        ) = (job_id, name, url, requester, cpus, memory_gb, email)
        else {
            return Err(JobError::InvalidRequest(
                "Missing required parameters".to_string(),
            ));
        };
        if url.starts_with('-') {
            return Err(JobError::InvalidRequest(format!(
                "github_url must be a URL, got {:?}",
                url
            )));
        }

        Ok(JobSpec {
            job_id: JobId::parse(&job_id)?,
            name,
            origin: SourceOrigin::classify(&url),
            requester,
            resources: ResourceRequest {
                cpus,
                memory_gb,
                gpus,
            },
            notify_email,
        })
    }
}

/// What a successful submission hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub job_id: JobId,
    /// Id parsed from the scheduler's confirmation, when it printed one
    pub scheduler_job_id: Option<String>,
    pub scheduler_output: String,
}

pub struct JobController {
    index: JobIndex,
    fetcher: Arc<dyn SourceFetch>,
    scheduler: Arc<dyn BatchScheduler>,
}

impl JobController {
    pub fn new(
        index: JobIndex,
        fetcher: Arc<dyn SourceFetch>,
        scheduler: Arc<dyn BatchScheduler>,
    ) -> Self {
        Self {
            index,
            fetcher,
            scheduler,
        }
    }

    pub fn index(&self) -> &JobIndex {
        &self.index
    }

    pub fn scheduler(&self) -> &Arc<dyn BatchScheduler> {
        &self.scheduler
    }

    pub async fn submit(&self, spec: JobSpec) -> Result<JobHandle, JobError> {
        let job_id = spec.job_id.clone();
        tracing::info!(
            job_id = %job_id,
            name = %spec.name,
            origin = %spec.origin.url(),
            requester = %spec.requester,
            "Received job submission"
        );

        self.index.ensure_root().await?;
        if self.index.remove_folder(&job_id).await? {
            tracing::info!(job_id = %job_id, "Replaced existing job folder");
        }

        let folder = self.index.folder(&job_id);
        if let Err(e) = self
            .fetcher
            .fetch(&spec.origin, self.index.root(), &folder)
            .await
        {
            tracing::warn!(job_id = %job_id, error = %e, "Source fetch failed");
            return Err(match e {
                JobError::FetchFailed(_) => e,
                other => JobError::FetchFailed(other.details()),
            });
        }

        let script = self.prepare_folder(&job_id).await?;

        let request = SubmitRequest {
            job_id: job_id.clone(),
            job_name: spec.name,
            requester: spec.requester,
            resources: spec.resources,
            notify_email: spec.notify_email,
            work_dir: script.dir,
            script: script.script,
        };
        let output = self.scheduler.submit(&request).await?;
        let scheduler_job_id = parse_submitted_job_id(&output);

        tracing::info!(
            job_id = %job_id,
            scheduler_job_id = ?scheduler_job_id,
            "Job submitted"
        );

        Ok(JobHandle {
            job_id,
            scheduler_job_id,
            scheduler_output: output,
        })
    }

    /// Cancel through the scheduler. No local existence check is made.
    pub async fn cancel(&self, job_id: &JobId) -> Result<String, JobError> {
        tracing::info!(job_id = %job_id, "Cancelling job");
        self.scheduler.cancel(job_id).await
    }

    /// Fix script line endings and find the entry script.
    async fn prepare_folder(&self, job_id: &JobId) -> Result<ScriptLocation, JobError> {
        let folder = self.index.folder(job_id);
        if !self.index.exists(job_id).await {
            return Err(JobError::FetchFailed(format!(
                "Fetch produced no folder at {}",
                folder.display()
            )));
        }

        let scan_root = folder.clone();
        let (normalized, found) = tokio::task::spawn_blocking(move || {
            let normalized = normalize_line_endings(&scan_root);
            let found = find_job_script(&scan_root);
            (normalized, found)
        })
        .await
        .map_err(|e| JobError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        match normalized {
            Ok(0) => {}
            Ok(n) => tracing::debug!(job_id = %job_id, files = n, "Converted script line endings"),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Line ending conversion failed")
            }
        }

        found?.ok_or_else(|| {
            JobError::InvalidRequest(
                "No shell script found: include run.sh, main.sh, or any .sh file".to_string(),
            )
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Accept ids sent either as JSON strings or numbers.
pub(crate) fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => non_empty(Some(s.clone())),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a non-negative count sent as a JSON number or numeric string.
/// Absent, null and empty values are `None`.
fn count(value: Option<&Value>, field: &str) -> Result<Option<u32>, JobError> {
    let invalid = || JobError::InvalidRequest(format!("{} must be a non-negative integer", field));
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(invalid),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse::<u32>().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}
