use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempPath;

use crate::config::FetchConfig;
use crate::error::JobError;
use crate::process::run_command;

/// How an archive origin is downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveTransport {
    Http,
    /// Uses the configured FTP credentials
    Ftp,
}

/// Where a job's source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    /// Cloned with version control straight into the job folder
    Repository { url: String },
    /// Downloaded, extracted into the job folder, then deleted
    Archive {
        url: String,
        transport: ArchiveTransport,
    },
}

impl SourceOrigin {
    /// URLs naming a `.zip` resource are archives; everything else is cloned.
    pub fn classify(url: &str) -> Self {
        let url = url.trim().to_string();
        let path = url.split(['?', '#']).next().unwrap_or_default();
        if path.to_ascii_lowercase().ends_with(".zip") {
            let transport = if url.to_ascii_lowercase().starts_with("ftp://") {
                ArchiveTransport::Ftp
            } else {
                ArchiveTransport::Http
            };
            SourceOrigin::Archive { url, transport }
        } else {
            SourceOrigin::Repository { url }
        }
    }

    pub fn url(&self) -> &str {
        match self {
            SourceOrigin::Repository { url } | SourceOrigin::Archive { url, .. } => url,
        }
    }
}

/// Materializes a source origin into a job folder.
///
/// The folder does not exist when `fetch` is called. On failure it is left in
/// whatever state the fetch tool produced.
#[async_trait]
pub trait SourceFetch: Send + Sync {
    async fn fetch(
        &self,
        origin: &SourceOrigin,
        jobs_root: &Path,
        folder: &Path,
    ) -> Result<(), JobError>;
}

/// Fetches with `git`, `wget` and `unzip`.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    config: FetchConfig,
}

impl CommandFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    /// `wget` arguments for downloading `url` to `target`.
    pub fn download_args(&self, url: &str, transport: ArchiveTransport, target: &Path) -> Vec<String> {
        let mut args = vec!["--timeout=60".to_string()];
        if transport == ArchiveTransport::Ftp {
            match &self.config.ftp {
                Some(creds) => {
                    args.push(format!("--ftp-user={}", creds.user));
                    args.push(format!("--ftp-password={}", creds.password));
                }
                None => tracing::warn!("No FTP credentials configured, trying anonymous download"),
            }
        }
        args.push("-O".to_string());
        args.push(target.display().to_string());
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    /// `git` arguments for cloning `url` into `folder`.
    pub fn clone_args(url: &str, folder: &Path) -> Vec<String> {
        vec![
            "clone".to_string(),
            "--".to_string(),
            url.to_string(),
            folder.display().to_string(),
        ]
    }

    async fn clone_repository(&self, url: &str, folder: &Path) -> Result<(), JobError> {
        tracing::info!(url, folder = %folder.display(), "Cloning repository");
        let args = Self::clone_args(url, folder);
        let output = run_command("git", &args, None, Some(self.config.clone_timeout))
            .await
            .map_err(|e| JobError::FetchFailed(format!("Failed to clone repository: {}", e)))?;

        if output.success() {
            Ok(())
        } else {
            Err(JobError::FetchFailed(format!(
                "Failed to clone repository: {}",
                output.diagnostic()
            )))
        }
    }

    async fn download_and_extract(
        &self,
        url: &str,
        transport: ArchiveTransport,
        jobs_root: &Path,
        folder: &Path,
    ) -> Result<(), JobError> {
        // Also removed on drop when the submission is abandoned.
        let download = TempPath::from_path(download_path(jobs_root));
        let result = self
            .download_and_extract_via(url, transport, &download, folder)
            .await;

        let path = download.to_path_buf();
        if let Err(e) = download.close() {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove downloaded archive");
            }
        }
        result
    }

    async fn download_and_extract_via(
        &self,
        url: &str,
        transport: ArchiveTransport,
        download: &Path,
        folder: &Path,
    ) -> Result<(), JobError> {
        tracing::info!(url, transport = ?transport, "Downloading source archive");
        let args = self.download_args(url, transport, download);
        let output = run_command("wget", &args, None, Some(self.config.download_timeout))
            .await
            .map_err(|e| JobError::FetchFailed(format!("Failed to download file: {}", e)))?;
        if !output.success() {
            return Err(JobError::FetchFailed(format!(
                "Failed to download file: {}",
                output.diagnostic()
            )));
        }

        tokio::fs::create_dir_all(folder).await?;
        let download_arg = download.display().to_string();
        let folder_arg = folder.display().to_string();
        let output = run_command(
            "unzip",
            &["-o", "-q", download_arg.as_str(), "-d", folder_arg.as_str()],
            None,
            Some(self.config.extract_timeout),
        )
        .await
        .map_err(|e| JobError::FetchFailed(format!("Failed to extract zip file: {}", e)))?;
        if !output.success() {
            return Err(JobError::FetchFailed(format!(
                "Failed to extract zip file: {}",
                output.diagnostic()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceFetch for CommandFetcher {
    async fn fetch(
        &self,
        origin: &SourceOrigin,
        jobs_root: &Path,
        folder: &Path,
    ) -> Result<(), JobError> {
        match origin {
            SourceOrigin::Repository { url } => self.clone_repository(url, folder).await,
            SourceOrigin::Archive { url, transport } => {
                self.download_and_extract(url, *transport, jobs_root, folder)
                    .await
            }
        }
    }
}

/// Hidden, uniquely named download target inside the jobs root.
fn download_path(jobs_root: &Path) -> PathBuf {
    jobs_root.join(format!(".{}.download.zip", uuid::Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FtpCredentials;

    #[test]
    fn classifies_repositories() {
        assert_eq!(
            SourceOrigin::classify("https://github.com/acme/train.git"),
            SourceOrigin::Repository {
                url: "https://github.com/acme/train.git".to_string()
            }
        );
        assert!(matches!(
            SourceOrigin::classify("git@github.com:acme/zipper"),
            SourceOrigin::Repository { .. }
        ));
    }

    #[test]
    fn classifies_archives() {
        assert_eq!(
            SourceOrigin::classify("https://files.example.com/job.zip"),
            SourceOrigin::Archive {
                url: "https://files.example.com/job.zip".to_string(),
                transport: ArchiveTransport::Http,
            }
        );
        assert_eq!(
            SourceOrigin::classify(" ftp://files.example.com/uploads/JOB.ZIP "),
            SourceOrigin::Archive {
                url: "ftp://files.example.com/uploads/JOB.ZIP".to_string(),
                transport: ArchiveTransport::Ftp,
            }
        );
        assert!(matches!(
            SourceOrigin::classify("https://files.example.com/job.zip?token=abc"),
            SourceOrigin::Archive { .. }
        ));
    }

    #[test]
    fn ftp_download_uses_configured_credentials() {
        let fetcher = CommandFetcher::new(FetchConfig {
            ftp: Some(FtpCredentials {
                user: "uploader".to_string(),
                password: "s3cret".to_string(),
            }),
            ..FetchConfig::default()
        });
        let args = fetcher.download_args(
            "ftp://host/a.zip",
            ArchiveTransport::Ftp,
            Path::new("/jobs/.x.download.zip"),
        );
        assert_eq!(
            args,
            vec![
                "--timeout=60",
                "--ftp-user=uploader",
                "--ftp-password=s3cret",
                "-O",
                "/jobs/.x.download.zip",
                "--",
                "ftp://host/a.zip",
            ]
        );
    }

    #[test]
    fn http_download_never_sends_credentials() {
        let fetcher = CommandFetcher::new(FetchConfig {
            ftp: Some(FtpCredentials {
                user: "uploader".to_string(),
                password: "s3cret".to_string(),
            }),
            ..FetchConfig::default()
        });
        let args = fetcher.download_args(
            "https://host/a.zip",
            ArchiveTransport::Http,
            Path::new("/jobs/t.zip"),
        );
        assert!(!args.iter().any(|a| a.contains("s3cret")));
    }

    #[test]
    fn urls_are_never_read_as_options() {
        let args = CommandFetcher::clone_args("--upload-pack=touch /tmp/x", Path::new("/jobs/42"));
        assert_eq!(args, vec!["clone", "--", "--upload-pack=touch /tmp/x", "/jobs/42"]);

        let fetcher = CommandFetcher::new(FetchConfig::default());
        let args = fetcher.download_args(
            "-e robots=off.zip",
            ArchiveTransport::Http,
            Path::new("/jobs/t.zip"),
        );
        assert_eq!(args[args.len() - 2..].to_vec(), vec!["--", "-e robots=off.zip"]);
    }

    #[test]
    fn dropped_download_guard_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = download_path(dir.path());
        std::fs::write(&path, b"PK").unwrap();

        drop(TempPath::from_path(path.clone()));

        assert!(!path.exists());
    }

    #[test]
    fn download_paths_are_hidden_and_unique() {
        let a = download_path(Path::new("/jobs"));
        let b = download_path(Path::new("/jobs"));
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with('.'));
        assert!(name.ends_with(".download.zip"));
    }
}
