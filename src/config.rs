use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Credentials for fetching archives over `ftp://`.
///
/// Resolved once at startup and handed to the fetcher; never a shared global.
#[derive(Clone, PartialEq, Eq)]
pub struct FtpCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for FtpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for materializing job sources.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Credentials used when the source origin is an `ftp://` archive
    pub ftp: Option<FtpCredentials>,
    /// Upper bound for an archive download
    pub download_timeout: Duration,
    /// Upper bound for a version-control clone
    pub clone_timeout: Duration,
    /// Upper bound for extracting a downloaded archive
    pub extract_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            ftp: None,
            download_timeout: Duration::from_secs(120),
            clone_timeout: Duration::from_secs(120),
            extract_timeout: Duration::from_secs(60),
        }
    }
}

/// Where running-state queries go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeMode {
    /// Ask the local scheduler CLI
    Local,
    /// Ask another agent's `/job-status/{id}` endpoint
    Remote { base_url: String },
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub mode: ProbeMode,
    /// Probes that take longer than this report "not running"
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            mode: ProbeMode::Local,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

/// How the archiver decides whether an existing archive is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalenessPolicy {
    /// Compare against the job folder's own mtime. Cheap, but nested
    /// changes may not bump it.
    #[default]
    FolderMtime,
    /// Compare against the newest mtime anywhere under the job folder.
    DeepMtime,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub listen_addr: SocketAddr,
    /// Directory holding `<id>/` job folders and `<id>.zip` archives
    pub jobs_root: PathBuf,
    pub fetch: FetchConfig,
    pub probe: ProbeConfig,
    pub sweep: SweepConfig,
    pub staleness: StalenessPolicy,
    /// Public URL used to build download links; defaults to the listen address
    pub public_base_url: Option<String>,
    /// Upper bound for building a single archive
    pub archive_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "0.0.0.0:5003"
                .parse()
                .expect("default listen address is valid"),
            jobs_root: default_jobs_root(),
            fetch: FetchConfig::default(),
            probe: ProbeConfig::default(),
            sweep: SweepConfig::default(),
            staleness: StalenessPolicy::default(),
            public_base_url: None,
            archive_timeout: Duration::from_secs(600),
        }
    }
}

impl AgentConfig {
    pub fn new(listen_addr: SocketAddr, jobs_root: PathBuf) -> Self {
        Self {
            listen_addr,
            jobs_root,
            ..Default::default()
        }
    }

    /// Base URL for download links handed out in job listings.
    pub fn download_base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.listen_addr),
        }
    }
}

/// `<home>/jobs`, falling back to `./jobs` when no home directory is set.
pub fn default_jobs_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobs")
}
