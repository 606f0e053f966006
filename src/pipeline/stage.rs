//! External stage runner: invoke one batch process and judge its outcome.
//!
//! A stage is a black box invoked as `program [args…]`. The runner only looks
//! at the exit status and the captured stdout/stderr; whatever the program
//! writes to disk is checked later by the orchestrator.
//!
//! ## Timeout
//!
//! Every invocation is bounded by a timeout. The child is spawned with
//! `kill_on_drop`, so when the timeout fires and the wait future is dropped
//! the process is killed rather than left running in the background.
//!
//! There are no retries: one failed invocation fails the run.

use crate::error::{PipelineError, StageFailure};
use futures::future::BoxFuture;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// One external program call: what to run and with which arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl StageInvocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Attach a failure cause and captured stderr, producing the error the
    /// pipeline reports.
    pub fn failed(&self, stderr: impl Into<String>, cause: StageFailure) -> PipelineError {
        PipelineError::StageExecution {
            program: self.program.clone(),
            args: self.args.clone(),
            stderr: stderr.into(),
            cause,
        }
    }
}

/// Streams captured from a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Runs external stages. The orchestrator only talks to this trait, so tests
/// can substitute a stub that records invocations.
pub trait StageRunner: Send + Sync {
    /// Run `invocation` to completion.
    ///
    /// Returns `Err(PipelineError::StageExecution { .. })` on non-zero exit,
    /// spawn failure or timeout.
    fn run<'a>(
        &'a self,
        invocation: &'a StageInvocation,
    ) -> BoxFuture<'a, Result<StageOutput, PipelineError>>;
}

/// [`StageRunner`] backed by real OS processes via `tokio::process`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run_process(&self, inv: &StageInvocation) -> Result<StageOutput, PipelineError> {
        let start = Instant::now();
        debug!("Running stage: {} {}", inv.program, inv.args.join(" "));

        let child = Command::new(&inv.program)
            .args(&inv.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                inv.failed(
                    String::new(),
                    StageFailure::SpawnFailed {
                        detail: e.to_string(),
                    },
                )
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(inv.failed(
                    String::new(),
                    StageFailure::SpawnFailed {
                        detail: format!("failed while waiting: {e}"),
                    },
                ));
            }
            Err(_) => {
                warn!(
                    "Stage {} exceeded {:?}, killing it",
                    inv.program, self.timeout
                );
                return Err(inv.failed(
                    String::new(),
                    StageFailure::TimedOut {
                        millis: self.timeout.as_millis() as u64,
                    },
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let duration_ms = start.elapsed().as_millis() as u64;

        if !output.status.success() {
            warn!(
                "Stage {} failed ({}): {}",
                inv.program,
                output.status,
                stderr.trim()
            );
            return Err(inv.failed(
                stderr,
                StageFailure::NonZeroExit {
                    code: output.status.code(),
                },
            ));
        }

        debug!("Stage {} stdout: {}", inv.program, stdout.trim());
        if !stderr.trim().is_empty() {
            warn!("Stage {} stderr: {}", inv.program, stderr.trim());
        }

        Ok(StageOutput {
            stdout,
            stderr,
            duration_ms,
        })
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::from_secs(300)
    }
}

impl StageRunner for ProcessRunner {
    fn run<'a>(
        &'a self,
        invocation: &'a StageInvocation,
    ) -> BoxFuture<'a, Result<StageOutput, PipelineError>> {
        Box::pin(self.run_process(invocation))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> StageInvocation {
        StageInvocation::new("sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn captures_stdout_on_success() {
        let runner = ProcessRunner::from_secs(10);
        let out = runner.run(&sh("echo hello; echo note >&2")).await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "note");
    }

    #[tokio::test]
    async fn non_zero_exit_carries_code_and_stderr() {
        let runner = ProcessRunner::from_secs(10);
        let err = runner.run(&sh("echo broken >&2; exit 3")).await.unwrap_err();
        match err {
            PipelineError::StageExecution {
                program,
                stderr,
                cause,
                ..
            } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr.trim(), "broken");
                assert_eq!(cause, StageFailure::NonZeroExit { code: Some(3) });
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_spawn_failure() {
        let runner = ProcessRunner::from_secs(10);
        let inv = StageInvocation::new("/definitely/not/a/real/program", vec![]);
        let err = runner.run(&inv).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageExecution {
                cause: StageFailure::SpawnFailed { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn hung_stage_times_out() {
        let runner = ProcessRunner::new(Duration::from_millis(200));
        let start = Instant::now();
        let err = runner.run(&sh("sleep 30")).await.unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(10));
        match err {
            PipelineError::StageExecution { cause, .. } => {
                assert_eq!(cause, StageFailure::TimedOut { millis: 200 });
                assert!(cause.to_string().contains("200ms"), "got: {cause}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
