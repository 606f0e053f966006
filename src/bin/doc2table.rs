//! CLI binary for doc2table.
//!
//! A thin shim over the library crate: `serve` runs the HTTP service, `run`
//! pushes one local document through the pipeline, `transcode` turns CSV
//! text into JSON records.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use doc2table::{
    deliver_inline, deliver_structured, parse_table_with, server, stage_upload, Pipeline,
    PipelineConfig, PipelineProgressCallback, Stage, StageCommand,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that names the stage currently running and prints one line per
/// finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, job_id: &str) {
        self.bar.set_message(job_id.to_string());
    }

    fn on_stage_start(&self, _job_id: &str, stage: Stage) {
        self.bar.set_prefix(format!("Stage {}/2", stage.number()));
        self.bar.set_message(stage.to_string());
    }

    fn on_stage_complete(&self, _job_id: &str, stage: Stage, duration_ms: u64) {
        self.bar.println(format!(
            "  {} {:<16} {}",
            green("✓"),
            stage.to_string(),
            dim(&format!("{:.1}s", duration_ms as f64 / 1000.0)),
        ));
    }

    fn on_stage_error(&self, _job_id: &str, stage: Stage, error: &str) {
        self.bar
            .println(format!("  {} {:<16} {}", red("✗"), stage.to_string(), red(error)));
    }

    fn on_run_complete(&self, _job_id: &str, _success: bool) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve the upload API on port 3000
  doc2table serve --document-stage "python3 /app/parser.py" \
                  --table-stage "python3 /app/TXTtoCSV.py"

  # Process one local document, print CSV and keep the published file
  doc2table run roster.pdf

  # Process one local document, print JSON records, remove all artifacts
  doc2table run --records roster.pdf

  # Convert an existing CSV file to JSON records
  doc2table transcode outputs/parsed_schedule.csv

STAGE CONTRACT:
  Each stage is invoked as  <program> [args…] <input-path> <output-dir>
  Stage 1 must write combined_cleaned_roster.txt into <output-dir>.
  Stage 2 must write parsed_schedule.csv into <output-dir>.
  Both must exit with status 0.

ENVIRONMENT VARIABLES:
  PORT                      Port for `serve` (default 3000)
  DOC2TABLE_UPLOAD_DIR      Upload directory
  DOC2TABLE_OUTPUT_DIR      Output directory
  DOC2TABLE_DOCUMENT_STAGE  Stage 1 command line
  DOC2TABLE_TABLE_STAGE     Stage 2 command line
  RUST_LOG                  Overrides the log filter
"#;

/// Run documents through external parse/tabulate stages and deliver tables.
#[derive(Parser, Debug)]
#[command(
    name = "doc2table",
    version,
    about = "Run documents through external parse/tabulate stages and deliver CSV or JSON",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOC2TABLE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOC2TABLE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve POST /upload, POST /api/parse and GET /download/:filename.
    Serve {
        /// Address to bind.
        #[arg(long, env = "DOC2TABLE_HOST", default_value = "0.0.0.0")]
        host: IpAddr,

        /// Port to bind.
        #[arg(short, long, env = "PORT", default_value_t = 3000)]
        port: u16,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Process one local document.
    Run {
        /// Path to the document.
        input: PathBuf,

        /// Print JSON records and remove every artifact afterwards.
        #[arg(long)]
        records: bool,

        /// Media type to declare for the document.
        #[arg(long, default_value = "application/pdf")]
        media_type: String,

        /// Disable the progress spinner.
        #[arg(long, env = "DOC2TABLE_NO_PROGRESS")]
        no_progress: bool,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Convert delimited text (file or `-` for stdin) to JSON records.
    Transcode {
        /// CSV file, or `-` for stdin.
        input: PathBuf,

        /// Field delimiter.
        #[arg(long, default_value_t = ',')]
        delimiter: char,
    },
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Directory for uploaded documents.
    #[arg(long, env = "DOC2TABLE_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Directory for job workspaces and published tables.
    #[arg(long, env = "DOC2TABLE_OUTPUT_DIR", default_value = "outputs")]
    output_dir: PathBuf,

    /// Stage 1 command line (document → text).
    #[arg(long, env = "DOC2TABLE_DOCUMENT_STAGE", default_value = "python3 parser.py")]
    document_stage: String,

    /// Stage 2 command line (text → table).
    #[arg(long, env = "DOC2TABLE_TABLE_STAGE", default_value = "python3 TXTtoCSV.py")]
    table_stage: String,

    /// File name stage 1 writes into its output directory.
    #[arg(long, env = "DOC2TABLE_INTERMEDIATE_FILE", default_value = "combined_cleaned_roster.txt")]
    intermediate_file: String,

    /// File name stage 2 writes into its output directory.
    #[arg(long, env = "DOC2TABLE_TABLE_FILE", default_value = "parsed_schedule.csv")]
    table_file: String,

    /// Per-stage timeout in seconds.
    #[arg(long, env = "DOC2TABLE_STAGE_TIMEOUT", default_value_t = 300)]
    stage_timeout: u64,

    /// Multipart field carrying the document.
    #[arg(long, env = "DOC2TABLE_UPLOAD_FIELD", default_value = "pdfFile")]
    upload_field: String,

    /// Maximum request body in bytes (0 = unlimited).
    #[arg(long, env = "DOC2TABLE_MAX_UPLOAD_BYTES", default_value_t = 50 * 1024 * 1024)]
    max_upload_bytes: usize,

    /// Accept uploads without the %PDF signature.
    #[arg(long, env = "DOC2TABLE_NO_SNIFF")]
    no_sniff: bool,

    /// Field delimiter of the produced table.
    #[arg(long, env = "DOC2TABLE_DELIMITER", default_value_t = ',')]
    delimiter: char,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = matches!(
        cli.command,
        Command::Run { no_progress: false, .. }
    ) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve {
            host,
            port,
            pipeline,
        } => serve(SocketAddr::new(host, port), &pipeline).await,
        Command::Run {
            input,
            records,
            media_type,
            pipeline,
            ..
        } => run(&input, records, &media_type, &pipeline, show_progress, cli.quiet).await,
        Command::Transcode { input, delimiter } => transcode(&input, delimiter),
    }
}

async fn serve(addr: SocketAddr, args: &PipelineArgs) -> Result<()> {
    let config = build_config(args)?;
    let handle = server::start(addr, Pipeline::new(config))
        .await
        .context("Failed to start server")?;

    eprintln!(
        "{} Listening on {}",
        green("◆"),
        bold(&format!("http://{}", handle.addr()))
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    handle.shutdown().await;
    Ok(())
}

async fn run(
    input: &Path,
    as_records: bool,
    media_type: &str,
    args: &PipelineArgs,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let config = build_config(args)?;
    let mut pipeline = Pipeline::new(config);
    if show_progress {
        pipeline = pipeline.with_progress(CliProgressCallback::new());
    }

    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let doc = stage_upload(&bytes, Some(media_type), pipeline.config())
        .await
        .context("Upload rejected")?;

    if as_records {
        let records = deliver_structured(&pipeline, doc)
            .await
            .context("Pipeline failed")?;
        let mut out = io::stdout().lock();
        let json = serde_json::to_string_pretty(&records).context("Failed to serialise records")?;
        writeln!(out, "{json}").context("Failed to write to stdout")?;
        if !quiet {
            eprintln!("{} {} records", green("✔"), bold(&records.len().to_string()));
        }
    } else {
        let delivery = deliver_inline(&pipeline, &doc)
            .await
            .context("Pipeline failed")?;
        let mut out = io::stdout().lock();
        out.write_all(delivery.csv_data.as_bytes())
            .context("Failed to write to stdout")?;
        if !quiet {
            eprintln!(
                "{} table published to {}",
                green("✔"),
                bold(&delivery.path.display().to_string())
            );
        }
    }
    Ok(())
}

fn transcode(input: &Path, delimiter: char) -> Result<()> {
    let text = if input.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read {}", input.display()))?
    };

    let records = parse_table_with(&text, delimiter);
    println!(
        "{}",
        serde_json::to_string_pretty(&records).context("Failed to serialise records")?
    );
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(args: &PipelineArgs) -> Result<PipelineConfig> {
    let document_stage = StageCommand::parse(&args.document_stage)
        .context("--document-stage must name a program")?;
    let table_stage =
        StageCommand::parse(&args.table_stage).context("--table-stage must name a program")?;

    PipelineConfig::builder()
        .upload_dir(&args.upload_dir)
        .output_dir(&args.output_dir)
        .document_stage(document_stage)
        .table_stage(table_stage)
        .intermediate_filename(&args.intermediate_file)
        .table_filename(&args.table_file)
        .stage_timeout_secs(args.stage_timeout)
        .upload_field(&args.upload_field)
        .max_upload_bytes(args.max_upload_bytes)
        .sniff_magic(!args.no_sniff)
        .delimiter(args.delimiter)
        .build()
        .context("Invalid configuration")
}
