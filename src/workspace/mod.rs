// src/workspace/mod.rs

//! Per-job scratch directories.
//!
//! Every job gets one directory directly under the configured root, named
//! `<prefix><job id>-<random>` with owner-only permissions. The directory is
//! owned by a [`Workspace`] value: [`WorkspaceManager::release`] removes it
//! and reports failures, and dropping the value removes it as well, so a
//! workspace only outlives its job if the process dies.

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::WorkspaceSettings;
use crate::types::JobId;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("cannot create workspace root {path:?}: {source}")]
    CreateRoot {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot create workspace under {root:?}: {source}")]
    Create {
        root: PathBuf,
        source: std::io::Error,
    },

    #[error("job {0} already owns a live workspace")]
    AlreadyLive(JobId),

    #[error("cannot write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot remove workspace {path:?}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

type LiveSet = Arc<Mutex<HashSet<JobId>>>;

fn lock(live: &LiveSet) -> MutexGuard<'_, HashSet<JobId>> {
    live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Allocates and tracks job workspaces under one root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    prefix: String,
    live: LiveSet,
}

impl WorkspaceManager {
    /// Create the manager, making sure the root directory exists.
    pub fn new(settings: &WorkspaceSettings) -> Result<Self, WorkspaceError> {
        fs::create_dir_all(&settings.root).map_err(|source| WorkspaceError::CreateRoot {
            path: settings.root.clone(),
            source,
        })?;

        Ok(Self {
            root: settings.root.clone(),
            prefix: settings.prefix.clone(),
            live: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of workspaces currently owned by jobs.
    pub fn live_count(&self) -> usize {
        lock(&self.live).len()
    }

    /// Allocate a fresh, empty directory for `job_id`.
    pub fn acquire(&self, job_id: JobId) -> Result<Workspace, WorkspaceError> {
        {
            let mut live = lock(&self.live);
            if !live.insert(job_id) {
                return Err(WorkspaceError::AlreadyLive(job_id));
            }
        }

        let created = tempfile::Builder::new()
            .prefix(&format!("{}{}-", self.prefix, job_id))
            .tempdir_in(&self.root)
            .and_then(|dir| {
                fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700))?;
                Ok(dir)
            });

        let dir = match created {
            Ok(dir) => dir,
            Err(source) => {
                lock(&self.live).remove(&job_id);
                return Err(WorkspaceError::Create {
                    root: self.root.clone(),
                    source,
                });
            }
        };

        debug!(job_id = %job_id, path = %dir.path().display(), "workspace acquired");

        Ok(Workspace {
            job_id,
            dir: Some(dir),
            live: Arc::clone(&self.live),
        })
    }

    /// Remove a workspace and everything in it.
    pub fn release(&self, workspace: Workspace) -> Result<(), WorkspaceError> {
        workspace.close()
    }

    /// Remove directories left behind by a previous process.
    ///
    /// Only direct children of the root that carry our prefix and do not
    /// belong to a live job are touched. Returns how many were removed.
    pub fn sweep_stale(&self) -> Result<usize, WorkspaceError> {
        let entries = fs::read_dir(&self.root).map_err(|source| WorkspaceError::Remove {
            path: self.root.clone(),
            source,
        })?;

        let live: HashSet<String> = lock(&self.live).iter().map(|id| id.to_string()).collect();
        let mut removed = 0;

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(rest) = name.strip_prefix(&self.prefix) else {
                continue;
            };
            let owner = rest.split('-').next().unwrap_or_default();
            if live.contains(owner) {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }

            let path = entry.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %path.display(), "removed stale workspace");
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to remove stale workspace");
                }
            }
        }

        if removed > 0 {
            info!(removed, root = %self.root.display(), "swept stale workspaces");
        }
        Ok(removed)
    }
}

/// Exclusively owned job directory. Removed on [`Workspace::close`] or drop.
#[derive(Debug)]
pub struct Workspace {
    job_id: JobId,
    dir: Option<TempDir>,
    live: LiveSet,
}

impl Workspace {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn path(&self) -> &Path {
        // `dir` is only taken in `close`, which consumes `self`.
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }

    /// Write a file (relative to the workspace) and return its full path.
    pub async fn write_file(
        &self,
        name: &str,
        contents: impl AsRef<[u8]>,
    ) -> Result<PathBuf, WorkspaceError> {
        let path = self.path().join(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| WorkspaceError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    /// Remove the directory now, reporting any error.
    pub fn close(mut self) -> Result<(), WorkspaceError> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        let path = dir.path().to_path_buf();
        let result = dir
            .close()
            .map_err(|source| WorkspaceError::Remove { path: path.clone(), source });
        debug!(job_id = %self.job_id, path = %path.display(), ok = result.is_ok(), "workspace released");
        result
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        lock(&self.live).remove(&self.job_id);
        // The remaining `TempDir` (if any) removes the directory itself.
    }
}
