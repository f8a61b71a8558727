use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use walkdir::WalkDir;

use crate::config::StalenessPolicy;
use crate::store::JobId;

/// Read-through view of the jobs root.
///
/// Holds no state of its own: every call goes to the filesystem, which stays
/// the only record of which jobs exist.
#[derive(Debug, Clone)]
pub struct JobIndex {
    root: PathBuf,
}

impl JobIndex {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn folder(&self, id: &JobId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Archives live next to the folder, never inside it.
    pub fn archive_path(&self, id: &JobId) -> PathBuf {
        self.root.join(id.archive_file_name())
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub async fn exists(&self, id: &JobId) -> bool {
        fs::metadata(self.folder(id))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Scheduler-shaped job folders under the root, sorted by id.
    ///
    /// A missing root is an empty listing, not an error.
    pub async fn list_jobs(&self) -> io::Result<Vec<JobId>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => {
                    tracing::debug!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match JobId::parse(name) {
                Ok(id) if id.is_scheduler_shaped() => jobs.push(id),
                _ => tracing::trace!(name, "Ignoring non-job directory"),
            }
        }
        jobs.sort_by(compare_ids);
        Ok(jobs)
    }

    /// The folder's own mtime. Changes when a direct child is added, removed or renamed.
    pub async fn folder_mtime(&self, id: &JobId) -> io::Result<SystemTime> {
        let meta = fs::metadata(self.folder(id)).await?;
        if !meta.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", self.folder(id).display()),
            ));
        }
        meta.modified()
    }

    /// Newest mtime of the folder or anything below it.
    pub async fn deep_mtime(&self, id: &JobId) -> io::Result<SystemTime> {
        let newest_top = self.folder_mtime(id).await?;
        let folder = self.folder(id);
        let newest = tokio::task::spawn_blocking(move || newest_mtime_below(&folder))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(newest.map_or(newest_top, |t| t.max(newest_top)))
    }

    /// Timestamp the archive is compared against under `policy`.
    pub async fn content_mtime(
        &self,
        id: &JobId,
        policy: StalenessPolicy,
    ) -> io::Result<SystemTime> {
        match policy {
            StalenessPolicy::FolderMtime => self.folder_mtime(id).await,
            StalenessPolicy::DeepMtime => self.deep_mtime(id).await,
        }
    }

    /// `None` when no archive exists.
    pub async fn archive_mtime(&self, id: &JobId) -> io::Result<Option<SystemTime>> {
        match fs::metadata(self.archive_path(id)).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.modified()?)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_folder(&self, id: &JobId) -> io::Result<PathBuf> {
        let folder = self.folder(id);
        fs::create_dir_all(&folder).await?;
        Ok(folder)
    }

    /// Remove the folder and everything in it. Returns whether anything was removed.
    pub async fn remove_folder(&self, id: &JobId) -> io::Result<bool> {
        match fs::remove_dir_all(self.folder(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Numeric ids sort numerically, the rest lexically after them.
fn compare_ids(a: &JobId, b: &JobId) -> std::cmp::Ordering {
    let key = |id: &JobId| {
        let head = id.as_str().split('_').next().unwrap_or_default();
        head.parse::<u64>().ok()
    };
    match (key(a), key(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn newest_mtime_below(folder: &Path) -> Option<SystemTime> {
    WalkDir::new(folder)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.metadata().ok())
        .filter_map(|meta| meta.modified().ok())
        .max()
}
