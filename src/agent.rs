use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::{run_server, AppState};
use crate::archive::{Archiver, Compressor, ZipCommand};
use crate::config::AgentConfig;
use crate::lifecycle::{CommandFetcher, JobController, SourceFetch};
use crate::probe;
use crate::scheduler::slurm::SlurmScheduler;
use crate::scheduler::BatchScheduler;
use crate::store::JobIndex;
use crate::sweeper::{SweepReport, Sweeper};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to build state prober: {0}")]
    Prober(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wires the lifecycle controller, archiver, sweeper and HTTP server
/// around one jobs root.
pub struct Agent {
    config: AgentConfig,
    controller: Arc<JobController>,
    archiver: Arc<Archiver>,
}

impl Agent {
    /// Production wiring: Slurm, `git`/`wget`/`unzip` and `zip`.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let scheduler: Arc<dyn BatchScheduler> = Arc::new(SlurmScheduler::new());
        let fetcher: Arc<dyn SourceFetch> = Arc::new(CommandFetcher::new(config.fetch.clone()));
        let compressor: Arc<dyn Compressor> =
            Arc::new(ZipCommand::new(Some(config.archive_timeout)));
        Self::with_parts(config, scheduler, fetcher, compressor)
    }

    /// Wire the agent around caller-supplied collaborators. The prober is
    /// still chosen by `config.probe`.
    pub fn with_parts(
        config: AgentConfig,
        scheduler: Arc<dyn BatchScheduler>,
        fetcher: Arc<dyn SourceFetch>,
        compressor: Arc<dyn Compressor>,
    ) -> Result<Self, AgentError> {
        let index = JobIndex::new(config.jobs_root.clone());
        let prober = probe::from_config(&config.probe, scheduler.clone())?;

        let archiver = Arc::new(Archiver::new(
            index.clone(),
            prober,
            compressor,
            config.staleness,
        ));
        let controller = Arc::new(JobController::new(index, fetcher, scheduler));

        Ok(Self {
            config,
            controller,
            archiver,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            controller: self.controller.clone(),
            archiver: self.archiver.clone(),
            download_base_url: self.config.download_base_url(),
        }
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(self.archiver.clone(), self.config.sweep.interval)
    }

    /// One sweep over the jobs root, outside of the server.
    pub async fn sweep_once(&self) -> SweepReport {
        self.sweeper().sweep_once().await
    }

    /// Run the sweeper (when enabled) and the HTTP server until `shutdown`
    /// is cancelled.
    ///
    /// # Errors
    ///
    /// Fails when the jobs root cannot be created or the listen address
    /// cannot be bound.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), AgentError> {
        self.controller.index().ensure_root().await?;
        tracing::info!(
            jobs_root = %self.config.jobs_root.display(),
            staleness = ?self.config.staleness,
            probe = ?self.config.probe.mode,
            "Agent starting"
        );

        let sweeper_handle = if self.config.sweep.enabled {
            let sweeper = self.sweeper();
            let token = shutdown.clone();
            Some(tokio::spawn(async move { sweeper.run(token).await }))
        } else {
            tracing::info!("Archive sweeper disabled");
            None
        };

        let served = run_server(self.config.listen_addr, self.app_state(), shutdown.clone()).await;

        // Stop the sweeper as well when the server exits on its own.
        shutdown.cancel();
        if let Some(handle) = sweeper_handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Archive sweeper task failed");
            }
        }

        served.map_err(AgentError::from)
    }
}
