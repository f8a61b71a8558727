//! Running-state probes.
//!
//! A probe answers "is this job executing right now?" and never fails: any
//! transport error, timeout, bad exit status or unreadable answer is logged
//! and reported as "not running". A wrong "not running" only risks archiving
//! a live job, which the next sweep repairs; a wrong "running" would keep the
//! archive from ever being built.

pub mod local;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ProbeConfig, ProbeMode};
use crate::scheduler::BatchScheduler;
use crate::store::JobId;

pub use local::LocalProber;
pub use remote::RemoteProber;

/// Why a probe could not give an answer. Never leaves a prober.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    TimedOut,

    #[error("scheduler query failed: {0}")]
    Scheduler(#[from] crate::process::ProcessError),

    #[error("status request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("status response has no state field")]
    MissingState,
}

#[async_trait]
pub trait StateProber: Send + Sync {
    async fn is_running(&self, job_id: &JobId) -> bool;
}

/// Build the prober selected by configuration.
pub fn from_config(
    config: &ProbeConfig,
    scheduler: Arc<dyn BatchScheduler>,
) -> Result<Arc<dyn StateProber>, reqwest::Error> {
    Ok(match &config.mode {
        ProbeMode::Local => Arc::new(LocalProber::new(scheduler, config.timeout)),
        ProbeMode::Remote { base_url } => {
            Arc::new(RemoteProber::new(base_url.clone(), config.timeout)?)
        }
    })
}
