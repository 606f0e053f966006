//! Upload staging: validate an inbound document and persist it to disk.
//!
//! The external stages read their input from a file path, so the payload is
//! written under the upload directory before anything else happens. The
//! declared media type is checked first, then (for PDF uploads with sniffing
//! enabled) the `%PDF` header; a rejected payload never touches the
//! filesystem.
//!
//! Generated names are `<prefix>_<epoch-millis>.<extension>`. Two uploads in
//! the same millisecond share a name and the second overwrites the first.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";
const PDF_MEDIA_TYPE: &str = "application/pdf";
/// PDF readers accept the header anywhere in the first kilobyte.
const PDF_HEADER_WINDOW: usize = 1024;

/// A document accepted by [`stage_upload`] and written to the upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedDocument {
    /// Generated file name, e.g. `roster_1718000000000.pdf`.
    pub filename: String,
    /// Absolute path of the stored payload.
    pub path: PathBuf,
    /// Media type declared by the client.
    pub media_type: String,
}

impl UploadedDocument {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Build the upload filename for a submission at `epoch_millis`.
pub fn generate_filename(prefix: &str, epoch_millis: i64, extension: &str) -> String {
    format!("{prefix}_{epoch_millis}.{extension}")
}

/// Check the declared media type and, when configured, the magic bytes.
///
/// The `%PDF` sniff only applies when the accepted type is
/// `application/pdf`; other configured types are checked on the declared
/// type alone. Runs before anything is written, so a rejected payload leaves
/// no trace.
pub fn validate_upload(
    bytes: &[u8],
    declared: Option<&str>,
    config: &PipelineConfig,
) -> Result<(), PipelineError> {
    let declared = declared.unwrap_or("").trim();
    let unsupported = || PipelineError::UnsupportedMediaType {
        declared: if declared.is_empty() {
            "<none>".to_string()
        } else {
            declared.to_string()
        },
        expected: config.accepted_media_type.clone(),
    };

    if !media_type_matches(declared, &config.accepted_media_type) {
        debug!("Rejecting upload with declared type {:?}", declared);
        return Err(unsupported());
    }

    if config.sniff_magic
        && media_type_matches(PDF_MEDIA_TYPE, &config.accepted_media_type)
        && !has_pdf_header(bytes)
    {
        debug!(
            "Rejecting upload: no %PDF header in the first {} bytes",
            PDF_HEADER_WINDOW
        );
        return Err(PipelineError::UnsupportedMediaType {
            declared: format!("{declared} (content is not a PDF)"),
            expected: config.accepted_media_type.clone(),
        });
    }

    Ok(())
}

/// Validate and persist an uploaded document.
///
/// The upload directory is created on first use. Returns the stored
/// [`UploadedDocument`]; the caller owns it for the rest of the request.
pub async fn stage_upload(
    bytes: &[u8],
    declared: Option<&str>,
    config: &PipelineConfig,
) -> Result<UploadedDocument, PipelineError> {
    validate_upload(bytes, declared, config)?;

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .map_err(|e| {
            PipelineError::io(
                format!("Failed to create upload directory {:?}", config.upload_dir),
                e,
            )
        })?;
    let dir = tokio::fs::canonicalize(&config.upload_dir)
        .await
        .map_err(|e| PipelineError::io("Failed to resolve upload directory", e))?;

    let filename = generate_filename(
        &config.upload_prefix,
        Utc::now().timestamp_millis(),
        &config.upload_extension,
    );
    let path = dir.join(&filename);

    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| PipelineError::io(format!("Failed to save upload {}", path.display()), e))?;

    info!("Staged upload {} ({} bytes)", filename, bytes.len());

    Ok(UploadedDocument {
        filename,
        path,
        media_type: declared.unwrap_or_default().trim().to_string(),
    })
}

fn has_pdf_header(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    window.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC)
}

/// Compare a declared `Content-Type` against the accepted essence, ignoring
/// case and any `; charset=…` style parameters.
fn media_type_matches(declared: &str, accepted: &str) -> bool {
    let essence = declared.split(';').next().unwrap_or("").trim();
    essence.eq_ignore_ascii_case(accepted.trim())
}
