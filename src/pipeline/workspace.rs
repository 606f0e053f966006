//! Per-run job workspaces and scoped artifact cleanup.
//!
//! Each pipeline run gets its own directory under the output directory
//! (`job_<epoch-millis>_<random>`). Both stages write their contracted file
//! names into it, so concurrent runs never read or overwrite each other's
//! intermediate text or table.
//!
//! [`JobWorkspace`] removes its directory when dropped. [`ArtifactSet`]
//! extends that to the uploaded document as well, and is what structured
//! delivery holds for the lifetime of a request. Normal exit paths call the
//! async [`JobWorkspace::remove`] / [`ArtifactSet::release`], which do the
//! filesystem work on the blocking pool; `Drop` is the fallback for
//! cancelled or panicking requests. Removal failures are logged and
//! otherwise ignored.

use crate::error::PipelineError;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// A uniquely named working directory for one pipeline run.
#[derive(Debug)]
pub struct JobWorkspace {
    id: String,
    path: PathBuf,
    dir: Option<TempDir>,
}

impl JobWorkspace {
    /// Create a fresh workspace inside `output_dir` (created if missing).
    pub async fn create(output_dir: &Path) -> Result<Self, PipelineError> {
        tokio::fs::create_dir_all(output_dir).await.map_err(|e| {
            PipelineError::io(
                format!("Failed to create output directory {:?}", output_dir),
                e,
            )
        })?;
        let output_dir = tokio::fs::canonicalize(output_dir)
            .await
            .map_err(|e| PipelineError::io("Failed to resolve output directory", e))?;

        let prefix = format!("job_{}_", Utc::now().timestamp_millis());
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(&prefix)
                .rand_bytes(6)
                .tempdir_in(&output_dir)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("workspace task failed: {e}")))?
        .map_err(|e| PipelineError::io("Failed to create job workspace", e))?;

        let path = dir.path().to_path_buf();
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::Internal("job workspace has no name".into()))?;

        debug!("Created job workspace {}", path.display());
        Ok(Self {
            id,
            path,
            dir: Some(dir),
        })
    }

    /// Remove the workspace and everything in it without blocking the runtime.
    pub async fn remove(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(result) => log_removal(&path, result),
            Err(e) => warn!("Failed to remove job workspace {}: {}", path.display(), e),
        }
    }

    /// Directory name, unique per run; safe to use as a file stem.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a contracted stage output inside this workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

fn log_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!("Removed job workspace {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove job workspace {}: {}", path.display(), e),
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            log_removal(&self.path, dir.close());
        }
    }
}

/// Every artifact one request created, released together on drop.
#[derive(Debug, Default)]
pub struct ArtifactSet {
    files: Vec<PathBuf>,
    workspace: Option<JobWorkspace>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a single file (e.g. the uploaded document) for removal.
    pub fn track_file(&mut self, path: impl Into<PathBuf>) {
        self.files.push(path.into());
    }

    /// Take ownership of a workspace; it is removed with the set.
    pub fn track_workspace(&mut self, workspace: JobWorkspace) -> &JobWorkspace {
        self.workspace.insert(workspace)
    }

    /// Remove every tracked artifact without blocking the runtime.
    pub async fn release(mut self) {
        for file in std::mem::take(&mut self.files) {
            log_file_removal(&file, tokio::fs::remove_file(&file).await);
        }
        if let Some(workspace) = self.workspace.take() {
            workspace.remove().await;
        }
    }

    /// Every path this set will remove.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths = self.files.clone();
        if let Some(ws) = &self.workspace {
            paths.push(ws.path().to_path_buf());
        }
        paths
    }
}

fn log_file_removal(file: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!("Removed artifact {}", file.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove artifact {}: {}", file.display(), e),
    }
}

impl Drop for ArtifactSet {
    fn drop(&mut self) {
        for file in self.files.drain(..) {
            log_file_removal(&file, std::fs::remove_file(&file));
        }
        // Dropping the workspace removes its directory.
        self.workspace.take();
    }
}
