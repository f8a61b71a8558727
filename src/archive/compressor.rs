use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::process::run_command;
use crate::store::JobId;

/// Writes a compressed snapshot of `<jobs_root>/<job_id>` to `destination`.
///
/// Errors carry the tool's diagnostic text.
#[async_trait]
pub trait Compressor: Send + Sync {
    async fn compress(
        &self,
        jobs_root: &Path,
        job_id: &JobId,
        destination: &Path,
    ) -> Result<(), String>;
}

/// Compresses with the `zip` CLI, run from the jobs root so entries are
/// stored as `<id>/...`.
#[derive(Debug, Clone)]
pub struct ZipCommand {
    program: String,
    timeout: Option<Duration>,
}

impl ZipCommand {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self::with_program("zip", timeout)
    }

    pub fn with_program(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn args(job_id: &JobId, destination: &Path) -> Vec<String> {
        vec![
            "-r".to_string(),
            "-q".to_string(),
            destination.display().to_string(),
            job_id.to_string(),
        ]
    }
}

#[async_trait]
impl Compressor for ZipCommand {
    async fn compress(
        &self,
        jobs_root: &Path,
        job_id: &JobId,
        destination: &Path,
    ) -> Result<(), String> {
        let args = Self::args(job_id, destination);
        let output = run_command(&self.program, &args, Some(jobs_root), self.timeout)
            .await
            .map_err(|e| e.to_string())?;
        if output.success() {
            Ok(())
        } else {
            Err(output.diagnostic())
        }
    }
}
