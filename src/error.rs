//! Error types for the doc2table library.
//!
//! Two error types reflect two levels of failure:
//!
//! * [`PipelineError`] — what a request ultimately fails with. Returned as
//!   `Err(PipelineError)` from staging, the orchestrator and both delivery
//!   paths, and mapped to an HTTP status by [`crate::server`].
//!
//! * [`StageFailure`] — why a single external stage invocation failed
//!   (non-zero exit, could not start, timed out). It travels inside
//!   [`PipelineError::StageExecution`] together with the program, arguments
//!   and captured stderr.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the doc2table library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Upload errors ─────────────────────────────────────────────────────
    /// The multipart submission had no file in the expected field.
    #[error("No file uploaded (expected multipart field '{field}')")]
    MissingUpload { field: String },

    /// Declared content type (or the payload's leading bytes) is not the
    /// accepted document type.
    #[error("Unsupported media type '{declared}': only {expected} files are allowed")]
    UnsupportedMediaType { declared: String, expected: String },

    // ── Download errors ───────────────────────────────────────────────────
    /// Download filename is not a single plain path component.
    #[error("Invalid download filename '{name}'")]
    InvalidFilename { name: String },

    /// Requested download does not exist in the output directory.
    #[error("File not found: '{name}'")]
    ArtifactNotFound { name: String },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// An external stage could not be run to a successful exit.
    #[error("Stage '{program}' failed: {cause}")]
    StageExecution {
        program: String,
        args: Vec<String>,
        stderr: String,
        cause: StageFailure,
    },

    /// The stages exited successfully but the table file is missing.
    #[error("Output table was not produced at '{path}'")]
    OutputNotProduced { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Wrap an I/O error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }

    /// True when the client can fix the request (bad upload, bad filename,
    /// missing download) rather than the server having failed.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingUpload { .. }
                | PipelineError::UnsupportedMediaType { .. }
                | PipelineError::InvalidFilename { .. }
                | PipelineError::ArtifactNotFound { .. }
        )
    }
}

/// Why a single external stage invocation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum StageFailure {
    /// The process ran and exited with a non-zero status.
    /// `code` is `None` when the process was terminated by a signal.
    #[error("exited with {}", describe_exit(.code))]
    NonZeroExit { code: Option<i32> },

    /// The process could not be started at all.
    #[error("could not be started: {detail}")]
    SpawnFailed { detail: String },

    /// The process outlived the configured timeout and was killed.
    #[error("timed out after {} and was killed", describe_timeout(.millis))]
    TimedOut { millis: u64 },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

fn describe_timeout(millis: &u64) -> String {
    let millis = *millis;
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}
