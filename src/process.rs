//! Thin wrapper around `tokio::process` for the external tools the agent drives.
//!
//! Every scheduler, fetch, and compression step goes through [`run_command`],
//! which captures stdout/stderr and optionally bounds the call with a timeout.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Diagnostic text for a failed run: stderr, else stdout, else the exit code.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        format!("Exit code: {:?}", self.exit_code)
    }
}

/// Run `program args...`, optionally inside `cwd`, and capture its output.
///
/// The child is killed if the timeout elapses first.
pub async fn run_command<S: AsRef<str>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ProcessError> {
    let mut command = Command::new(program);
    command
        .args(args.iter().map(|a| a.as_ref()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    tracing::debug!(program, cwd = ?cwd, "Running command");

    let output = command.output();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, output).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(program, timeout = ?limit, "Command timed out");
                return Err(ProcessError::TimedOut {
                    program: program.to_string(),
                    timeout: limit,
                });
            }
        },
        None => output.await,
    };

    match result {
        Ok(output) => Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }),
        Err(source) => Err(ProcessError::Spawn {
            program: program.to_string(),
            source,
        }),
    }
}
