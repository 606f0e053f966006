//! Delivery: turn a pipeline run into one of the two response shapes.
//!
//! * **Inline download** ([`deliver_inline`]) — the table text is returned
//!   in the response and also published to the output directory under a
//!   per-run name, reachable through `/download/{filename}`. The uploaded
//!   document stays on disk.
//! * **Structured** ([`deliver_structured`]) — the table is transcoded into
//!   [`TabularRecord`]s and every artifact of the request (upload, workspace,
//!   intermediate text, table) is removed before returning, whatever the
//!   outcome.
//!
//! [`resolve_download`] maps a download filename back to a file, refusing
//! anything that is not a plain name inside the output directory.

use crate::error::PipelineError;
use crate::pipeline::table::{parse_table_with, TabularRecord};
use crate::pipeline::upload::UploadedDocument;
use crate::pipeline::workspace::ArtifactSet;
use crate::run::{Pipeline, PipelineRun};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Route prefix of the download endpoint.
pub const DOWNLOAD_ROUTE: &str = "/download";

/// Result of an inline-download run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineDelivery {
    /// Full table text, byte-identical to the published file.
    pub csv_data: String,
    /// Published file name inside the output directory.
    pub filename: String,
    /// Relative URL of the download endpoint for `filename`.
    pub download_url: String,
    /// Absolute path of the published file.
    #[serde(skip)]
    pub path: PathBuf,
}

/// Run the pipeline and publish the table for download.
///
/// The table is moved out of the job workspace to
/// `<output-dir>/<job-id>.csv`; the workspace (and its intermediate text)
/// is then removed. The upload is left in place.
pub async fn deliver_inline(
    pipeline: &Pipeline,
    doc: &UploadedDocument,
) -> Result<InlineDelivery, PipelineError> {
    let PipelineRun {
        job_id,
        table_path,
        table_text,
        workspace,
        ..
    } = pipeline.run(doc).await?;

    let filename = format!("{job_id}.csv");
    let published = workspace.path().parent().map(|dir| dir.join(&filename));

    // Publish atomically: the download endpoint never sees a partial file.
    let outcome = match &published {
        Some(published) => tokio::fs::rename(&table_path, published)
            .await
            .map_err(|e| {
                PipelineError::io(format!("Failed to publish table {}", published.display()), e)
            }),
        None => Err(PipelineError::Internal("job workspace has no parent".into())),
    };
    workspace.remove().await;
    outcome?;

    let path = published.unwrap_or_default();
    info!("Job {}: published {}", job_id, path.display());

    Ok(InlineDelivery {
        download_url: download_url(&filename),
        csv_data: table_text,
        filename,
        path,
    })
}

/// Run the pipeline, transcode the table, and discard every artifact.
///
/// Takes ownership of the upload: it is removed together with the job
/// workspace before this function returns, on success and on failure alike.
pub async fn deliver_structured(
    pipeline: &Pipeline,
    doc: UploadedDocument,
) -> Result<Vec<TabularRecord>, PipelineError> {
    let mut artifacts = ArtifactSet::new();
    artifacts.track_file(&doc.path);

    let result = transcode_run(pipeline, &doc, &mut artifacts).await;
    artifacts.release().await;
    result
}

async fn transcode_run(
    pipeline: &Pipeline,
    doc: &UploadedDocument,
    artifacts: &mut ArtifactSet,
) -> Result<Vec<TabularRecord>, PipelineError> {
    let run = pipeline.run(doc).await?;
    let records = parse_table_with(&run.table_text, pipeline.config().delimiter);
    debug!("Job {}: transcoded {} records", run.job_id, records.len());

    artifacts.track_workspace(run.workspace);
    Ok(records)
}

/// Relative download URL for a published file.
pub fn download_url(filename: &str) -> String {
    format!("{DOWNLOAD_ROUTE}/{filename}")
}

static RE_DOWNLOAD_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

/// Resolve a download filename to a file inside `output_dir`.
///
/// # Errors
/// - [`PipelineError::InvalidFilename`] — not a plain file name (separators,
///   `..`, leading dot, empty, or characters outside `[A-Za-z0-9._-]`)
/// - [`PipelineError::ArtifactNotFound`] — no such file, or it resolves
///   outside the output directory
pub async fn resolve_download(
    output_dir: &Path,
    filename: &str,
) -> Result<PathBuf, PipelineError> {
    if !RE_DOWNLOAD_NAME.is_match(filename) {
        return Err(PipelineError::InvalidFilename {
            name: filename.to_string(),
        });
    }
    let not_found = || PipelineError::ArtifactNotFound {
        name: filename.to_string(),
    };

    let root = tokio::fs::canonicalize(output_dir)
        .await
        .map_err(|_| not_found())?;
    let path = tokio::fs::canonicalize(root.join(filename))
        .await
        .map_err(|_| not_found())?;

    // A symlink could still point elsewhere.
    if !path.starts_with(&root) {
        return Err(not_found());
    }
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Ok(path),
        _ => Err(not_found()),
    }
}
