//! Wrapper around the external benchmark tool (asv)

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::RunnerConfig;
use crate::error::BenchError;
use crate::process::{CancelSignal, CommandSpec, ProcessError, run_command};

pub const DEFAULT_STEPS: u32 = 10;

/// `<base>~1..<branch>`: one commit before the PR base through the branch head,
/// so a regression already present at the base shows up too.
pub fn commit_range(base_sha: &str, branch_ref: &str) -> String {
    format!("{}~1..{}", base_sha, branch_ref)
}

pub struct BenchmarkInvoker {
    program: String,
    workdir: PathBuf,
    steps: u32,
    timeout: Duration,
}

impl BenchmarkInvoker {
    /// `workdir` is the branch directory holding `asv.conf.json`.
    pub fn new(workdir: &Path, runner: &RunnerConfig) -> Self {
        Self {
            program: runner.asv_program.clone(),
            workdir: workdir.to_path_buf(),
            steps: runner.steps,
            timeout: runner.benchmark_timeout(),
        }
    }

    pub async fn run_range(
        &self,
        range: &str,
        cancel: &mut CancelSignal,
    ) -> Result<String, BenchError> {
        let spec = CommandSpec::new(&self.program, &self.workdir)
            .arg("run")
            .arg("--steps")
            .arg(self.steps.to_string())
            .arg(range)
            .with_timeout(self.timeout);
        run_command(&spec, cancel)
            .await
            .map_err(|e| benchmark_error("run", e))
    }

    /// Render the browsable HTML results from the raw run data.
    pub async fn publish(&self, cancel: &mut CancelSignal) -> Result<String, BenchError> {
        let spec = CommandSpec::new(&self.program, &self.workdir)
            .arg("publish")
            .with_timeout(self.timeout);
        run_command(&spec, cancel)
            .await
            .map_err(|e| benchmark_error("publish", e))
    }
}

fn benchmark_error(operation: &str, e: ProcessError) -> BenchError {
    match e {
        ProcessError::Cancelled { .. } => BenchError::Cancelled {
            step: format!("benchmark {}", operation),
        },
        other => BenchError::BenchmarkExecution {
            operation: operation.to_string(),
            message: other.to_string(),
        },
    }
}
