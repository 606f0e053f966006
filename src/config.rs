//! Configuration for the upload → stages → delivery pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. One struct is shared (behind an `Arc`) by
//! every request the HTTP service handles, and by the CLI `run` command.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An external stage command: a program plus the arguments that precede the
/// per-run `<input-path> <output-dir>` pair.
///
/// `StageCommand::new("python3").arg("/app/parser.py")` is invoked as
/// `python3 /app/parser.py <input> <output-dir>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCommand {
    pub program: String,
    pub leading_args: Vec<String>,
}

impl StageCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    /// Parse a whitespace-separated command line such as
    /// `"python3 /app/parser.py"`. Returns `None` for a blank string.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: program.to_string(),
            leading_args: parts.map(str::to_string).collect(),
        })
    }

    /// Full argument list for one invocation.
    pub fn args_for(&self, input: &Path, output_dir: &Path) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push(input.to_string_lossy().into_owned());
        args.push(output_dir.to_string_lossy().into_owned());
        args
    }
}

/// Configuration for staging, running and delivering a pipeline job.
///
/// # Example
/// ```rust
/// use doc2table::{PipelineConfig, StageCommand};
///
/// let config = PipelineConfig::builder()
///     .upload_dir("/srv/uploads")
///     .output_dir("/srv/outputs")
///     .document_stage(StageCommand::new("python3").arg("/app/parser.py"))
///     .table_stage(StageCommand::new("python3").arg("/app/TXTtoCSV.py"))
///     .stage_timeout_secs(120)
///     .build()
///     .unwrap();
/// assert_eq!(config.upload_field, "pdfFile");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory uploaded documents are written to. Created lazily. Default: `uploads`.
    pub upload_dir: PathBuf,

    /// Directory holding per-run job workspaces and published tables. Default: `outputs`.
    pub output_dir: PathBuf,

    /// Stage 1: document → normalized text.
    pub document_stage: StageCommand,

    /// Stage 2: normalized text → tabular text.
    pub table_stage: StageCommand,

    /// Filename stage 1 writes into its output directory. Default: `combined_cleaned_roster.txt`.
    pub intermediate_filename: String,

    /// Filename stage 2 writes into its output directory. Default: `parsed_schedule.csv`.
    pub table_filename: String,

    /// Upper bound on a single stage invocation, in seconds. Default: 300.
    pub stage_timeout_secs: u64,

    /// Multipart field carrying the document. Default: `pdfFile`.
    pub upload_field: String,

    /// The only accepted declared media type. Default: `application/pdf`.
    pub accepted_media_type: String,

    /// Also require the payload to start with `%PDF`. Default: true.
    pub sniff_magic: bool,

    /// Prefix of generated upload filenames. Default: `roster`.
    pub upload_prefix: String,

    /// Extension of generated upload filenames. Default: `pdf`.
    pub upload_extension: String,

    /// Field delimiter used by the transcoder. Default: `,`.
    pub delimiter: char,

    /// HTTP request body limit in bytes; 0 disables it. Default: 50 MiB.
    pub max_upload_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("outputs"),
            document_stage: StageCommand::new("python3").arg("parser.py"),
            table_stage: StageCommand::new("python3").arg("TXTtoCSV.py"),
            intermediate_filename: "combined_cleaned_roster.txt".to_string(),
            table_filename: "parsed_schedule.csv".to_string(),
            stage_timeout_secs: 300,
            upload_field: "pdfFile".to_string(),
            accepted_media_type: "application/pdf".to_string(),
            sniff_magic: true,
            upload_prefix: "roster".to_string(),
            upload_extension: "pdf".to_string(),
            delimiter: ',',
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn document_stage(mut self, stage: StageCommand) -> Self {
        self.config.document_stage = stage;
        self
    }

    pub fn table_stage(mut self, stage: StageCommand) -> Self {
        self.config.table_stage = stage;
        self
    }

    pub fn intermediate_filename(mut self, name: impl Into<String>) -> Self {
        self.config.intermediate_filename = name.into();
        self
    }

    pub fn table_filename(mut self, name: impl Into<String>) -> Self {
        self.config.table_filename = name.into();
        self
    }

    pub fn stage_timeout_secs(mut self, secs: u64) -> Self {
        self.config.stage_timeout_secs = secs;
        self
    }

    pub fn upload_field(mut self, field: impl Into<String>) -> Self {
        self.config.upload_field = field.into();
        self
    }

    pub fn accepted_media_type(mut self, mime: impl Into<String>) -> Self {
        self.config.accepted_media_type = mime.into();
        self
    }

    pub fn sniff_magic(mut self, v: bool) -> Self {
        self.config.sniff_magic = v;
        self
    }

    pub fn upload_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.upload_prefix = prefix.into();
        self
    }

    pub fn upload_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.upload_extension = ext.into();
        self
    }

    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.config.delimiter = delimiter;
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.stage_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "Stage timeout must be ≥ 1 second".into(),
            ));
        }
        if c.document_stage.program.trim().is_empty() || c.table_stage.program.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Stage programs must not be empty".into(),
            ));
        }
        for (what, name) in [
            ("intermediate filename", &c.intermediate_filename),
            ("table filename", &c.table_filename),
        ] {
            if !is_plain_filename(name) {
                return Err(PipelineError::InvalidConfig(format!(
                    "The {what} must be a bare file name, got '{name}'"
                )));
            }
        }
        if c.upload_field.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Upload field name must not be empty".into(),
            ));
        }
        if c.delimiter == '\n' || c.delimiter == '\r' {
            return Err(PipelineError::InvalidConfig(
                "Delimiter cannot be a line break".into(),
            ));
        }
        Ok(self.config)
    }
}

fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source_deployment() {
        let c = PipelineConfig::default();
        assert_eq!(c.upload_dir, PathBuf::from("uploads"));
        assert_eq!(c.output_dir, PathBuf::from("outputs"));
        assert_eq!(c.intermediate_filename, "combined_cleaned_roster.txt");
        assert_eq!(c.table_filename, "parsed_schedule.csv");
        assert_eq!(c.accepted_media_type, "application/pdf");
        assert_eq!(c.delimiter, ',');
    }

    #[test]
    fn stage_args_end_with_input_and_output_dir() {
        let stage = StageCommand::new("python3").arg("/app/parser.py");
        let args = stage.args_for(Path::new("/u/roster_1.pdf"), Path::new("/o/job"));
        assert_eq!(args, vec!["/app/parser.py", "/u/roster_1.pdf", "/o/job"]);
    }

    #[test]
    fn parse_stage_command_line() {
        let stage = StageCommand::parse("  python3   /app/TXTtoCSV.py ").unwrap();
        assert_eq!(stage.program, "python3");
        assert_eq!(stage.leading_args, vec!["/app/TXTtoCSV.py"]);
        assert!(StageCommand::parse("   ").is_none());
    }

    #[test]
    fn zero_timeout_rejected() {
        let err = PipelineConfig::builder().stage_timeout_secs(0).build();
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn nested_table_filename_rejected() {
        let err = PipelineConfig::builder()
            .table_filename("../parsed_schedule.csv")
            .build();
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn builder_overrides_apply() {
        let c = PipelineConfig::builder()
            .upload_field("document")
            .delimiter(';')
            .sniff_magic(false)
            .build()
            .unwrap();
        assert_eq!(c.upload_field, "document");
        assert_eq!(c.delimiter, ';');
        assert!(!c.sniff_magic);
    }
}
