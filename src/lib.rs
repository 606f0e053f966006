//! # doc2table
//!
//! Upload a document, run it through two external batch stages, and deliver
//! the resulting table as raw CSV text or as structured JSON records.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload (multipart)
//!  │
//!  ├─ 1. Stage    validate media type, persist as <prefix>_<millis>.<ext>
//!  ├─ 2. Stage 1  document → normalized text    (external process)
//!  ├─ 3. Stage 2  normalized text → table text  (external process)
//!  ├─ 4. Verify   the table file exists in the job workspace
//!  └─ 5. Deliver  inline CSV + download URL, or parsed records + cleanup
//! ```
//!
//! Each run gets its own job workspace under the output directory, so
//! concurrent requests never share intermediate files. Stage invocations are
//! bounded by a timeout and killed when it expires.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc2table::{deliver_structured, stage_upload, Pipeline, PipelineConfig, StageCommand};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .document_stage(StageCommand::new("python3").arg("/app/parser.py"))
//!         .table_stage(StageCommand::new("python3").arg("/app/TXTtoCSV.py"))
//!         .build()?;
//!     let pipeline = Pipeline::new(config);
//!
//!     let bytes = std::fs::read("roster.pdf")?;
//!     let doc = stage_upload(&bytes, Some("application/pdf"), pipeline.config()).await?;
//!     let records = deliver_structured(&pipeline, doc).await?;
//!     println!("{}", serde_json::to_string_pretty(&records)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2table` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod deliver;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod run;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, StageCommand};
pub use deliver::{deliver_inline, deliver_structured, download_url, resolve_download, InlineDelivery};
pub use error::{PipelineError, StageFailure};
pub use pipeline::stage::{ProcessRunner, StageInvocation, StageOutput, StageRunner};
pub use pipeline::table::{parse_table, parse_table_with, TabularRecord};
pub use pipeline::upload::{stage_upload, UploadedDocument};
pub use pipeline::workspace::{ArtifactSet, JobWorkspace};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use run::{Pipeline, PipelineRun, PipelineState, Stage, StageReport};
