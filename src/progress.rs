//! Progress-callback trait for pipeline run events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::run::Pipeline::with_progress`] to receive events as a run moves
//! through its stages. The CLI uses it to drive a spinner; the HTTP service
//! runs without one.
//!
//! # Example
//!
//! ```rust
//! use doc2table::{PipelineProgressCallback, Stage};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     stages: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_stage_complete(&self, job_id: &str, stage: Stage, duration_ms: u64) {
//!         self.stages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{job_id}: {stage} finished in {duration_ms}ms");
//!     }
//! }
//! ```

use crate::run::Stage;
use std::sync::Arc;

/// Called by [`crate::run::Pipeline`] as a run progresses.
///
/// Implementations must be `Send + Sync`: one pipeline serves many requests
/// concurrently. All methods default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// A run has a workspace and is about to start stage 1.
    fn on_run_start(&self, job_id: &str) {
        let _ = job_id;
    }

    /// A stage process is about to be spawned.
    fn on_stage_start(&self, job_id: &str, stage: Stage) {
        let _ = (job_id, stage);
    }

    /// A stage exited successfully.
    fn on_stage_complete(&self, job_id: &str, stage: Stage, duration_ms: u64) {
        let _ = (job_id, stage, duration_ms);
    }

    /// A stage failed; no further stage runs for this job.
    fn on_stage_error(&self, job_id: &str, stage: Stage, error: &str) {
        let _ = (job_id, stage, error);
    }

    /// The run finished, successfully or not.
    fn on_run_complete(&self, job_id: &str, success: bool) {
        let _ = (job_id, success);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::run::Pipeline`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
