use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use batch_agent::agent::Agent;
use batch_agent::config::{
    default_jobs_root, AgentConfig, FetchConfig, FtpCredentials, ProbeConfig, ProbeMode,
    StalenessPolicy, SweepConfig,
};
use batch_agent::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "batch-agent")]
#[command(version)]
#[command(about = "Node-local batch job agent with archive staleness management")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the HTTP agent and the background archive sweeper
    Serve(ServeArgs),

    /// Run one archive sweep and print the report as JSON
    Sweep(AgentArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to bind the HTTP server to
    #[arg(long, env = "BATCH_AGENT_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(long, env = "BATCH_AGENT_PORT", default_value = "5003")]
    port: u16,

    /// Base URL used in download links (defaults to http://<host>:<port>)
    #[arg(long, env = "BATCH_AGENT_PUBLIC_URL")]
    public_url: Option<String>,

    /// Seconds between archive sweeps
    #[arg(long, env = "BATCH_AGENT_SWEEP_INTERVAL", default_value = "60")]
    sweep_interval: u64,

    /// Disable the background archive sweeper
    #[arg(long)]
    no_sweep: bool,

    #[command(flatten)]
    agent: AgentArgs,
}

/// Options shared by `serve` and `sweep`.
#[derive(Parser, Debug)]
struct AgentArgs {
    /// Directory holding job folders and archives (default: ~/jobs)
    #[arg(long, env = "BATCH_AGENT_JOBS_ROOT")]
    jobs_root: Option<PathBuf>,

    /// Query running state from another agent's /job-status endpoint
    /// instead of the local scheduler
    #[arg(long, env = "BATCH_AGENT_PROBE_URL")]
    probe_url: Option<String>,

    /// Seconds before a state probe gives up and reports "not running"
    #[arg(long, env = "BATCH_AGENT_PROBE_TIMEOUT", default_value = "5")]
    probe_timeout: u64,

    /// Compare archives against the newest mtime anywhere in the job folder
    #[arg(long, env = "BATCH_AGENT_DEEP_STALENESS")]
    deep_staleness: bool,

    /// Seconds allowed for building one archive
    #[arg(long, env = "BATCH_AGENT_ARCHIVE_TIMEOUT", default_value = "600")]
    archive_timeout: u64,

    /// User for FTP archive downloads
    #[arg(long, env = "BATCH_AGENT_FTP_USER", requires = "ftp_password")]
    ftp_user: Option<String>,

    /// Password for FTP archive downloads
    #[arg(long, env = "BATCH_AGENT_FTP_PASSWORD", hide_env_values = true)]
    ftp_password: Option<String>,
}

impl AgentArgs {
    fn into_config(self) -> AgentConfig {
        let ftp = match (self.ftp_user, self.ftp_password) {
            (Some(user), Some(password)) => Some(FtpCredentials { user, password }),
            _ => None,
        };
        let mode = match self.probe_url {
            Some(base_url) => ProbeMode::Remote { base_url },
            None => ProbeMode::Local,
        };

        AgentConfig {
            jobs_root: self.jobs_root.unwrap_or_else(default_jobs_root),
            fetch: FetchConfig {
                ftp,
                ..FetchConfig::default()
            },
            probe: ProbeConfig {
                mode,
                timeout: Duration::from_secs(self.probe_timeout),
            },
            staleness: if self.deep_staleness {
                StalenessPolicy::DeepMtime
            } else {
                StalenessPolicy::FolderMtime
            },
            archive_timeout: Duration::from_secs(self.archive_timeout),
            ..AgentConfig::default()
        }
    }
}

impl ServeArgs {
    fn into_config(self) -> AgentConfig {
        AgentConfig {
            listen_addr: SocketAddr::new(self.host, self.port),
            public_base_url: self.public_url,
            sweep: SweepConfig {
                enabled: !self.no_sweep,
                interval: Duration::from_secs(self.sweep_interval.max(1)),
            },
            ..self.agent.into_config()
        }
    }
}

async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.into_config();
    tracing::info!(
        listen_addr = %config.listen_addr,
        jobs_root = %config.jobs_root.display(),
        "Starting batch agent"
    );

    let shutdown = install_shutdown_handler();
    let agent = Agent::new(config)?;
    agent.run(shutdown).await?;

    tracing::info!("Batch agent stopped");
    Ok(())
}

async fn run_sweep(args: AgentArgs) -> Result<(), Box<dyn std::error::Error>> {
    let agent = Agent::new(args.into_config())?;
    let report = agent.sweep_once().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => run_serve(serve_args).await?,
        Commands::Sweep(agent_args) => run_sweep(agent_args).await?,
    }

    Ok(())
}
