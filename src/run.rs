//! Pipeline orchestrator: stage 1 → stage 2 → table text.
//!
//! A run is an explicit state machine:
//!
//! ```text
//! AwaitingStage1 ──ok──▶ AwaitingStage2 ──ok──▶ Complete
//!       │                      │
//!       └──err──▶ Failed ◀──err┘
//! ```
//!
//! Stage 1 turns the uploaded document into normalized text, stage 2 turns
//! that text into a table. Both write their contracted file names into the
//! run's own [`JobWorkspace`], and the path handed to stage 2 is taken from
//! the same workspace stage 1 wrote into. Stage 2 never starts unless
//! stage 1 exited successfully.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::stage::{ProcessRunner, StageInvocation, StageOutput, StageRunner};
use crate::pipeline::upload::UploadedDocument;
use crate::pipeline::workspace::JobWorkspace;
use crate::progress::ProgressCallback;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The two external stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Document → normalized text.
    Document,
    /// Normalized text → tabular text.
    Table,
}

impl Stage {
    /// 1-based position in the pipeline.
    pub fn number(self) -> usize {
        match self {
            Stage::Document => 1,
            Stage::Table => 2,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Document => f.write_str("document stage"),
            Stage::Table => f.write_str("table stage"),
        }
    }
}

/// Where a run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PipelineState {
    AwaitingStage1,
    AwaitingStage2,
    Complete,
    Failed { stage: Stage },
}

impl PipelineState {
    /// The stage this state is waiting on, if any.
    pub fn pending_stage(self) -> Option<Stage> {
        match self {
            PipelineState::AwaitingStage1 => Some(Stage::Document),
            PipelineState::AwaitingStage2 => Some(Stage::Table),
            PipelineState::Complete | PipelineState::Failed { .. } => None,
        }
    }

    /// Transition taken when the pending stage succeeds.
    pub fn advance(self) -> Self {
        match self {
            PipelineState::AwaitingStage1 => PipelineState::AwaitingStage2,
            PipelineState::AwaitingStage2 => PipelineState::Complete,
            done => done,
        }
    }

    /// Transition taken when the pending stage fails.
    pub fn fail(self) -> Self {
        match self.pending_stage() {
            Some(stage) => PipelineState::Failed { stage },
            None => self,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.pending_stage().is_none()
    }
}

/// Timing and captured stdout for one successful stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub program: String,
    pub duration_ms: u64,
    pub stdout: String,
}

/// A completed run: the table text plus the workspace that holds it.
///
/// Dropping the run drops the workspace, which removes every file the stages
/// wrote. Move the table out first (see [`crate::deliver`]) to keep it.
#[derive(Debug)]
pub struct PipelineRun {
    pub job_id: String,
    pub state: PipelineState,
    pub table_path: PathBuf,
    pub table_text: String,
    pub stages: Vec<StageReport>,
    pub workspace: JobWorkspace,
}

/// Everything a successful run produced, before the workspace is attached.
struct Finished {
    state: PipelineState,
    table_path: PathBuf,
    table_text: String,
    stages: Vec<StageReport>,
}

/// Table text as UTF-8; invalid sequences become U+FFFD rather than failing
/// the run.
fn decode_table(job_id: &str, bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!(
                "Job {}: table is not valid UTF-8 (at byte {}), decoding lossily",
                job_id,
                e.utf8_error().valid_up_to()
            );
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    }
}

/// Runs uploaded documents through both stages.
///
/// Cheap to share: wrap it in an `Arc` and hand it to every request.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    runner: Arc<dyn StageRunner>,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("runner", &"<dyn StageRunner>")
            .field("progress", &self.progress.as_ref().map(|_| "<dyn PipelineProgressCallback>"))
            .finish()
    }
}

impl Pipeline {
    /// Pipeline that spawns real processes, bounded by the configured timeout.
    pub fn new(config: PipelineConfig) -> Self {
        let runner = ProcessRunner::from_secs(config.stage_timeout_secs);
        Self::with_runner(config, Arc::new(runner))
    }

    /// Pipeline driven by a custom [`StageRunner`].
    pub fn with_runner(config: PipelineConfig, runner: Arc<dyn StageRunner>) -> Self {
        Self {
            config: Arc::new(config),
            runner,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run both stages for `doc` in a fresh workspace and read the table.
    ///
    /// # Errors
    /// - [`PipelineError::StageExecution`] — a stage failed; later stages did not run
    /// - [`PipelineError::OutputNotProduced`] — both stages succeeded but the
    ///   table file is missing
    /// - [`PipelineError::Io`] — workspace creation or table read failed
    pub async fn run(&self, doc: &UploadedDocument) -> Result<PipelineRun, PipelineError> {
        let workspace = JobWorkspace::create(&self.config.output_dir).await?;
        let job_id = workspace.id().to_string();
        info!("Job {}: processing {}", job_id, doc.filename);

        if let Some(ref cb) = self.progress {
            cb.on_run_start(&job_id);
        }

        let result = self.drive(&job_id, doc, &workspace).await;

        if let Some(ref cb) = self.progress {
            cb.on_run_complete(&job_id, result.is_ok());
        }
        match result {
            Ok(finished) => {
                info!(
                    "Job {}: table ready ({} bytes)",
                    job_id,
                    finished.table_text.len()
                );
                Ok(PipelineRun {
                    job_id,
                    state: finished.state,
                    table_path: finished.table_path,
                    table_text: finished.table_text,
                    stages: finished.stages,
                    workspace,
                })
            }
            Err(e) => {
                warn!("Job {}: failed: {}", job_id, e);
                workspace.remove().await;
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        job_id: &str,
        doc: &UploadedDocument,
        workspace: &JobWorkspace,
    ) -> Result<Finished, PipelineError> {
        let mut state = PipelineState::AwaitingStage1;
        let mut stages = Vec::with_capacity(2);

        while let Some(stage) = state.pending_stage() {
            let invocation = self.invocation_for(stage, doc, workspace);
            match self.run_stage(job_id, stage, &invocation).await {
                Ok(report) => {
                    stages.push(report);
                    state = state.advance();
                }
                Err(e) => {
                    state = state.fail();
                    debug!("Job {}: now {:?}", job_id, state);
                    return Err(e);
                }
            }
        }

        let table_path = workspace.file(&self.config.table_filename);
        if !tokio::fs::try_exists(&table_path).await.unwrap_or(false) {
            return Err(PipelineError::OutputNotProduced { path: table_path });
        }

        debug!("Job {}: reading {}", job_id, table_path.display());
        let bytes = tokio::fs::read(&table_path).await.map_err(|e| {
            PipelineError::io(format!("Failed to read table {}", table_path.display()), e)
        })?;
        let table_text = decode_table(job_id, bytes);

        Ok(Finished {
            state,
            table_path,
            table_text,
            stages,
        })
    }

    /// Build the invocation for `stage`. Both stages write into the workspace;
    /// stage 2 reads the file stage 1 is contracted to produce there.
    fn invocation_for(
        &self,
        stage: Stage,
        doc: &UploadedDocument,
        workspace: &JobWorkspace,
    ) -> StageInvocation {
        let (command, input) = match stage {
            Stage::Document => (&self.config.document_stage, doc.path.clone()),
            Stage::Table => (
                &self.config.table_stage,
                workspace.file(&self.config.intermediate_filename),
            ),
        };
        StageInvocation::new(
            command.program.clone(),
            command.args_for(&input, workspace.path()),
        )
    }

    async fn run_stage(
        &self,
        job_id: &str,
        stage: Stage,
        invocation: &StageInvocation,
    ) -> Result<StageReport, PipelineError> {
        if let Some(ref cb) = self.progress {
            cb.on_stage_start(job_id, stage);
        }
        let start = Instant::now();

        match self.runner.run(invocation).await {
            Ok(StageOutput { stdout, .. }) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    "Job {}: {} ({}) finished in {}ms",
                    job_id, stage, invocation.program, duration_ms
                );
                if let Some(ref cb) = self.progress {
                    cb.on_stage_complete(job_id, stage, duration_ms);
                }
                Ok(StageReport {
                    stage,
                    program: invocation.program.clone(),
                    duration_ms,
                    stdout,
                })
            }
            Err(e) => {
                if let Some(ref cb) = self.progress {
                    cb.on_stage_error(job_id, stage, &e.to_string());
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageFailure;
    use crate::pipeline::testing::ScriptedRunner;
    use crate::progress::PipelineProgressCallback;
    use std::path::Path;

    fn config_in(dir: &Path) -> PipelineConfig {
        PipelineConfig::builder()
            .upload_dir(dir.join("uploads"))
            .output_dir(dir.join("outputs"))
            .build()
            .unwrap()
    }

    fn document(dir: &Path) -> UploadedDocument {
        let path = dir.join("roster_1.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        UploadedDocument {
            filename: "roster_1.pdf".into(),
            path,
            media_type: "application/pdf".into(),
        }
    }

    #[test]
    fn state_machine_transitions() {
        let s = PipelineState::AwaitingStage1;
        assert_eq!(s.pending_stage(), Some(Stage::Document));
        let s = s.advance();
        assert_eq!(s, PipelineState::AwaitingStage2);
        assert_eq!(s.fail(), PipelineState::Failed { stage: Stage::Table });
        let s = s.advance();
        assert_eq!(s, PipelineState::Complete);
        assert!(s.is_terminal());
        assert_eq!(s.advance(), PipelineState::Complete);
    }

    #[tokio::test]
    async fn successful_run_reads_table() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::producing("name,shift\nAlice,AM\n"));
        let pipeline = Pipeline::with_runner(config_in(tmp.path()), runner.clone());

        let run = pipeline.run(&document(tmp.path())).await.unwrap();
        assert_eq!(run.state, PipelineState::Complete);
        assert_eq!(run.table_text, "name,shift\nAlice,AM\n");
        assert_eq!(run.stages.len(), 2);
        assert_eq!(runner.calls(), 2);
        assert!(run.table_path.starts_with(run.workspace.path()));
    }

    #[tokio::test]
    async fn stage2_reads_what_stage1_wrote() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::producing("a\n1\n"));
        let pipeline = Pipeline::with_runner(config_in(tmp.path()), runner.clone());
        let doc = document(tmp.path());

        let run = pipeline.run(&doc).await.unwrap();
        let invocations = runner.invocations();
        assert_eq!(invocations[0].args[1], doc.path.to_string_lossy());
        assert_eq!(
            invocations[1].args[1],
            run.workspace
                .file("combined_cleaned_roster.txt")
                .to_string_lossy()
        );
        assert_eq!(invocations[0].args[2], invocations[1].args[2]);
    }

    #[tokio::test]
    async fn stage1_failure_skips_stage2() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::failing_at(1));
        let pipeline = Pipeline::with_runner(config_in(tmp.path()), runner.clone());

        let err = pipeline.run(&document(tmp.path())).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageExecution {
                cause: StageFailure::NonZeroExit { code: Some(1) },
                ..
            }
        ));
        assert_eq!(runner.calls(), 1, "stage 2 must not run");
    }

    #[tokio::test]
    async fn stage2_failure_is_surfaced() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::failing_at(2));
        let pipeline = Pipeline::with_runner(config_in(tmp.path()), runner.clone());

        let err = pipeline.run(&document(tmp.path())).await.unwrap_err();
        assert!(matches!(err, PipelineError::StageExecution { .. }));
        assert_eq!(runner.calls(), 2);
    }

    #[tokio::test]
    async fn missing_table_is_output_not_produced() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::silent());
        let pipeline = Pipeline::with_runner(config_in(tmp.path()), runner);

        let err = pipeline.run(&document(tmp.path())).await.unwrap_err();
        match err {
            PipelineError::OutputNotProduced { path } => {
                assert!(path.ends_with("parsed_schedule.csv"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_run_leaves_no_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::failing_at(2));
        let pipeline = Pipeline::with_runner(config_in(tmp.path()), runner);

        pipeline.run(&document(tmp.path())).await.unwrap_err();
        let leftovers = std::fs::read_dir(tmp.path().join("outputs")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[derive(Default)]
    struct Recorder(std::sync::Mutex<Vec<String>>);

    impl PipelineProgressCallback for Recorder {
        fn on_run_start(&self, _job_id: &str) {
            self.0.lock().unwrap().push("run".into());
        }
        fn on_stage_start(&self, _job_id: &str, stage: Stage) {
            self.0.lock().unwrap().push(format!("start {}", stage.number()));
        }
        fn on_stage_complete(&self, _job_id: &str, stage: Stage, _duration_ms: u64) {
            self.0.lock().unwrap().push(format!("done {}", stage.number()));
        }
        fn on_stage_error(&self, _job_id: &str, stage: Stage, _error: &str) {
            self.0.lock().unwrap().push(format!("error {}", stage.number()));
        }
        fn on_run_complete(&self, _job_id: &str, success: bool) {
            self.0.lock().unwrap().push(format!("end {success}"));
        }
    }

    #[tokio::test]
    async fn progress_events_follow_stage_order() {
        let tmp = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let pipeline = Pipeline::with_runner(
            config_in(tmp.path()),
            Arc::new(ScriptedRunner::failing_at(2)),
        )
        .with_progress(recorder.clone());

        pipeline.run(&document(tmp.path())).await.unwrap_err();
        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["run", "start 1", "done 1", "start 2", "error 2", "end false"]
        );
    }

    #[tokio::test]
    async fn non_utf8_table_is_decoded_lossily() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::producing_bytes(b"name\nCaf\xe9\n"));
        let pipeline = Pipeline::with_runner(config_in(tmp.path()), runner);

        let run = pipeline.run(&document(tmp.path())).await.unwrap();
        assert_eq!(run.table_text, "name\nCaf\u{FFFD}\n");
    }

    #[tokio::test]
    async fn concurrent_runs_use_distinct_workspaces() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::producing("a\n1\n"));
        let pipeline = Pipeline::with_runner(config_in(tmp.path()), runner);
        let doc = document(tmp.path());

        let (a, b) = tokio::join!(pipeline.run(&doc), pipeline.run(&doc));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.job_id, b.job_id);
        assert_ne!(a.table_path, b.table_path);
    }
}
