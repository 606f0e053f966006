//! Stub [`StageRunner`] used by unit tests in place of real processes.
//!
//! It honours the stage file contract: stage 1 writes the intermediate text
//! and stage 2 writes the table into the output-directory argument.

use crate::error::{PipelineError, StageFailure};
use crate::pipeline::stage::{StageInvocation, StageOutput, StageRunner};
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::Mutex;

const INTERMEDIATE: &str = "combined_cleaned_roster.txt";
const TABLE: &str = "parsed_schedule.csv";

pub(crate) struct ScriptedRunner {
    table: Option<Vec<u8>>,
    fail_stage: Option<usize>,
    invocations: Mutex<Vec<StageInvocation>>,
}

impl ScriptedRunner {
    /// Both stages succeed; stage 2 writes `table`.
    pub(crate) fn producing(table: &str) -> Self {
        Self::producing_bytes(table.as_bytes())
    }

    /// Both stages succeed; stage 2 writes raw `table` bytes.
    pub(crate) fn producing_bytes(table: &[u8]) -> Self {
        Self {
            table: Some(table.to_vec()),
            fail_stage: None,
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Both stages exit 0 but stage 2 writes nothing.
    pub(crate) fn silent() -> Self {
        Self {
            table: None,
            fail_stage: None,
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Stage `n` (1 or 2) exits with status 1.
    pub(crate) fn failing_at(n: usize) -> Self {
        Self {
            table: Some(b"a\n1\n".to_vec()),
            fail_stage: Some(n),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    pub(crate) fn invocations(&self) -> Vec<StageInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    fn execute(&self, inv: &StageInvocation) -> Result<StageOutput, PipelineError> {
        self.invocations.lock().unwrap().push(inv.clone());

        let n = inv.args.len();
        let input = Path::new(&inv.args[n - 2]);
        let out_dir = Path::new(&inv.args[n - 1]);
        let stage = if input.file_name().is_some_and(|f| f == INTERMEDIATE) {
            2
        } else {
            1
        };

        if self.fail_stage == Some(stage) {
            return Err(inv.failed("boom", StageFailure::NonZeroExit { code: Some(1) }));
        }

        let io = |e| PipelineError::io("stub stage write", e);
        match stage {
            1 => std::fs::write(out_dir.join(INTERMEDIATE), "Mon01 C/I DOH\n").map_err(io)?,
            _ => {
                if let Some(table) = &self.table {
                    std::fs::write(out_dir.join(TABLE), table).map_err(io)?;
                }
            }
        }

        Ok(StageOutput {
            stdout: format!("stage {stage} ok"),
            ..Default::default()
        })
    }
}

impl StageRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        invocation: &'a StageInvocation,
    ) -> BoxFuture<'a, Result<StageOutput, PipelineError>> {
        Box::pin(async move { self.execute(invocation) })
    }
}
