use async_trait::async_trait;

use crate::error::JobError;
use crate::process::{run_command, ProcessError};
use crate::scheduler::{BatchScheduler, SubmitRequest};
use crate::store::JobId;

const MAIL_TYPES: &str = "BEGIN,END,FAIL";

/// Drives Slurm through `sbatch`, `scancel` and `scontrol`.
#[derive(Debug, Clone)]
pub struct SlurmScheduler {
    sbatch: String,
    scancel: String,
    scontrol: String,
}

impl Default for SlurmScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SlurmScheduler {
    pub fn new() -> Self {
        Self::with_programs("sbatch", "scancel", "scontrol")
    }

    /// Use alternative executables, e.g. wrappers or absolute paths.
    pub fn with_programs(
        sbatch: impl Into<String>,
        scancel: impl Into<String>,
        scontrol: impl Into<String>,
    ) -> Self {
        Self {
            sbatch: sbatch.into(),
            scancel: scancel.into(),
            scontrol: scontrol.into(),
        }
    }

    /// Translate a submission into `sbatch` flags. The script comes last.
    pub fn sbatch_args(request: &SubmitRequest) -> Vec<String> {
        let mut args = vec![
            "--job-name".to_string(),
            request.job_name.clone(),
            format!("--comment={}", request.requester),
            "--cpus-per-task".to_string(),
            request.resources.cpus.to_string(),
            "--mem".to_string(),
            format!("{}G", request.resources.memory_gb),
            "--mail-user".to_string(),
            request.notify_email.clone(),
            "--mail-type".to_string(),
            MAIL_TYPES.to_string(),
        ];

        // sbatch rejects a zero GPU request, so leave the flag out entirely
        if request.resources.gpus > 0 {
            args.push("--gpus".to_string());
            args.push(request.resources.gpus.to_string());
        }

        args.push(request.script.clone());
        args
    }
}

#[async_trait]
impl BatchScheduler for SlurmScheduler {
    async fn submit(&self, request: &SubmitRequest) -> Result<String, JobError> {
        let args = Self::sbatch_args(request);
        tracing::info!(
            job_id = %request.job_id,
            work_dir = %request.work_dir.display(),
            args = ?args,
            "Submitting job"
        );

        let output = run_command(&self.sbatch, &args, Some(&request.work_dir), None)
            .await
            .map_err(|e| JobError::SubmitFailed(e.to_string()))?;

        if output.success() {
            Ok(output.stdout.trim().to_string())
        } else {
            tracing::warn!(job_id = %request.job_id, exit_code = ?output.exit_code, "sbatch failed");
            Err(JobError::SubmitFailed(output.diagnostic()))
        }
    }

    async fn cancel(&self, job_id: &JobId) -> Result<String, JobError> {
        let output = run_command(&self.scancel, &[job_id.as_str()], None, None)
            .await
            .map_err(|e| JobError::CancelFailed(e.to_string()))?;

        if output.success() {
            tracing::info!(job_id = %job_id, "Job cancelled");
            Ok(output.stdout.trim().to_string())
        } else {
            tracing::warn!(job_id = %job_id, exit_code = ?output.exit_code, "scancel failed");
            Err(JobError::CancelFailed(output.diagnostic()))
        }
    }

    async fn query_state(&self, job_id: &JobId) -> Result<Option<String>, ProcessError> {
        let output = run_command(
            &self.scontrol,
            &["show", "job", job_id.as_str()],
            None,
            None,
        )
        .await?;

        if !output.success() {
            tracing::debug!(
                job_id = %job_id,
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "scontrol reported no state"
            );
            return Ok(None);
        }
        Ok(parse_job_state(&output.stdout))
    }
}

/// Pull the job id out of `Submitted batch job 123`.
pub fn parse_submitted_job_id(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        line.trim()
            .strip_prefix("Submitted batch job")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| id.split_whitespace().next().unwrap_or(id).to_string())
    })
}

/// Find `JobState=<STATE>` in `scontrol show job` output.
pub fn parse_job_state(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find_map(|token| token.strip_prefix("JobState="))
        .filter(|state| !state.is_empty())
        .map(|state| state.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ResourceRequest;
    use std::path::PathBuf;

    fn request(gpus: u32) -> SubmitRequest {
        SubmitRequest {
            job_id: JobId::parse("42").unwrap(),
            job_name: "train".to_string(),
            requester: "alice".to_string(),
            resources: ResourceRequest {
                cpus: 4,
                memory_gb: 16,
                gpus,
            },
            notify_email: "alice@example.com".to_string(),
            work_dir: PathBuf::from("/tmp/jobs/42"),
            script: "run.sh".to_string(),
        }
    }

    #[test]
    fn sbatch_args_without_gpus() {
        let args = SlurmScheduler::sbatch_args(&request(0));
        assert_eq!(
            args,
            vec![
                "--job-name",
                "train",
                "--comment=alice",
                "--cpus-per-task",
                "4",
                "--mem",
                "16G",
                "--mail-user",
                "alice@example.com",
                "--mail-type",
                "BEGIN,END,FAIL",
                "run.sh",
            ]
        );
        assert!(!args.iter().any(|a| a == "--gpus"));
    }

    #[test]
    fn sbatch_args_with_gpus() {
        let args = SlurmScheduler::sbatch_args(&request(2));
        let pos = args.iter().position(|a| a == "--gpus").unwrap();
        assert_eq!(args[pos + 1], "2");
        assert_eq!(args.last().map(String::as_str), Some("run.sh"));
    }

    #[test]
    fn parses_submitted_job_id() {
        assert_eq!(
            parse_submitted_job_id("Submitted batch job 1234\n"),
            Some("1234".to_string())
        );
        assert_eq!(
            parse_submitted_job_id("warning: foo\nSubmitted batch job 77 on cluster main"),
            Some("77".to_string())
        );
        assert_eq!(parse_submitted_job_id("sbatch: error"), None);
        assert_eq!(parse_submitted_job_id("Submitted batch job"), None);
    }

    #[test]
    fn parses_job_state() {
        let output = "JobId=42 JobName=train\n   UserId=alice(1000) GroupId=alice(1000)\n   JobState=RUNNING Reason=None Dependency=(null)\n";
        assert_eq!(parse_job_state(output), Some("RUNNING".to_string()));
        assert_eq!(parse_job_state("JobId=42 JobState=completed"), Some("COMPLETED".to_string()));
        assert_eq!(parse_job_state("JobId=42 JobState="), None);
        assert_eq!(parse_job_state("slurm_load_jobs error: Invalid job id specified"), None);
    }

    #[tokio::test]
    async fn missing_scontrol_is_process_error() {
        let scheduler =
            SlurmScheduler::with_programs("sbatch", "scancel", "nonexistent_scontrol_12345");
        let result = scheduler.query_state(&JobId::parse("1").unwrap()).await;
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }

    #[tokio::test]
    async fn missing_scancel_is_cancel_failure() {
        let scheduler =
            SlurmScheduler::with_programs("sbatch", "nonexistent_scancel_12345", "scontrol");
        let err = scheduler
            .cancel(&JobId::parse("1").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "cancel_failed");
    }

    #[tokio::test]
    async fn scheduler_refusal_carries_its_stderr() {
        // `sh <id>` exits non-zero and names the id on stderr, like scancel does.
        let scheduler = SlurmScheduler::with_programs("sbatch", "sh", "scontrol");
        let err = scheduler
            .cancel(&JobId::parse("424242").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "cancel_failed");
        assert!(err.details().contains("424242"), "{:?}", err.details());
    }
}
