use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::probe::{ProbeError, StateProber};
use crate::scheduler::{is_running_state, BatchScheduler};
use crate::store::JobId;

/// Asks the local scheduler CLI for the job state.
#[derive(Clone)]
pub struct LocalProber {
    scheduler: Arc<dyn BatchScheduler>,
    timeout: Duration,
}

impl LocalProber {
    pub fn new(scheduler: Arc<dyn BatchScheduler>, timeout: Duration) -> Self {
        Self { scheduler, timeout }
    }

    async fn probe(&self, job_id: &JobId) -> Result<Option<String>, ProbeError> {
        match tokio::time::timeout(self.timeout, self.scheduler.query_state(job_id)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProbeError::TimedOut),
        }
    }
}

#[async_trait]
impl StateProber for LocalProber {
    async fn is_running(&self, job_id: &JobId) -> bool {
        match self.probe(job_id).await {
            Ok(Some(state)) => {
                tracing::debug!(job_id = %job_id, state, "Probed job state");
                is_running_state(&state)
            }
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "Probe failed, assuming not running");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::process::ProcessError;
    use crate::scheduler::SubmitRequest;

    struct StaticScheduler {
        state: Option<&'static str>,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl BatchScheduler for StaticScheduler {
        async fn submit(&self, _request: &SubmitRequest) -> Result<String, JobError> {
            unreachable!()
        }

        async fn cancel(&self, _job_id: &JobId) -> Result<String, JobError> {
            unreachable!()
        }

        async fn query_state(&self, _job_id: &JobId) -> Result<Option<String>, ProcessError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ProcessError::Spawn {
                    program: "scontrol".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
                });
            }
            Ok(self.state.map(str::to_string))
        }
    }

    fn prober(state: Option<&'static str>, delay: Duration, fail: bool) -> LocalProber {
        LocalProber::new(
            Arc::new(StaticScheduler { state, delay, fail }),
            Duration::from_millis(100),
        )
    }

    fn job() -> JobId {
        JobId::parse("42").unwrap()
    }

    #[tokio::test]
    async fn running_state_is_running() {
        assert!(prober(Some("RUNNING"), Duration::ZERO, false).is_running(&job()).await);
    }

    #[tokio::test]
    async fn terminal_state_is_not_running() {
        assert!(!prober(Some("COMPLETED"), Duration::ZERO, false).is_running(&job()).await);
        assert!(!prober(None, Duration::ZERO, false).is_running(&job()).await);
    }

    #[tokio::test]
    async fn query_error_fails_closed() {
        assert!(!prober(Some("RUNNING"), Duration::ZERO, true).is_running(&job()).await);
    }

    #[tokio::test]
    async fn slow_query_fails_closed() {
        let start = std::time::Instant::now();
        assert!(!prober(Some("RUNNING"), Duration::from_secs(5), false).is_running(&job()).await);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
