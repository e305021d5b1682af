//! On-disk layout for one (owner, branch) pair:
//!
//! ```text
//! runs/<owner>/<branch>/
//!     source_repo/            checkout of the PR branch
//!     benchmarks/             copied from source_repo on every run
//!     asv.conf.json           base config with repo and branches overridden
//!     webhooks_request.json   the triggering event
//! ```

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::RunnerConfig;
use crate::error::BenchError;
use crate::process::{CancelSignal, CommandSpec, ProcessError, run_command};
use crate::webhook::RunIdentity;

pub const SOURCE_REPO_DIR: &str = "source_repo";
pub const BENCHMARKS_DIR: &str = "benchmarks";
pub const CONFIG_FILE: &str = "asv.conf.json";
pub const EVENT_LOG_FILE: &str = "webhooks_request.json";

pub struct RunWorkspace {
    branch_dir: PathBuf,
    git_program: String,
    vcs_timeout: Duration,
}

impl RunWorkspace {
    pub fn new(runs_dir: &Path, identity: &RunIdentity, runner: &RunnerConfig) -> Self {
        Self {
            branch_dir: identity.branch_dir(runs_dir),
            git_program: runner.git_program.clone(),
            vcs_timeout: runner.vcs_timeout(),
        }
    }

    pub fn branch_dir(&self) -> &Path {
        &self.branch_dir
    }

    pub fn source_repo_dir(&self) -> PathBuf {
        self.branch_dir.join(SOURCE_REPO_DIR)
    }

    /// Create `runs/<owner>/<branch>` if it does not exist yet
    pub async fn ensure_branch_dir(&self) -> Result<&Path, BenchError> {
        tokio::fs::create_dir_all(&self.branch_dir).await?;
        Ok(&self.branch_dir)
    }

    /// Pull into an existing checkout, or clone the branch fresh.
    pub async fn sync_source_repo(
        &self,
        clone_url: &str,
        branch_ref: &str,
        cancel: &mut CancelSignal,
    ) -> Result<PathBuf, BenchError> {
        let source_repo = self.source_repo_dir();

        if tokio::fs::try_exists(&source_repo).await? {
            info!("Updating existing checkout at {}", source_repo.display());
            let pull = CommandSpec::new(&self.git_program, &source_repo)
                .arg("pull")
                .with_timeout(self.vcs_timeout);
            run_command(&pull, cancel)
                .await
                .map_err(|e| vcs_error("pull", e))?;
        } else {
            info!("Cloning {} ({}) into {}", clone_url, branch_ref, source_repo.display());
            let clone = CommandSpec::new(&self.git_program, &self.branch_dir)
                .arg("clone")
                .arg("-b")
                .arg(branch_ref)
                .arg(clone_url)
                .arg(SOURCE_REPO_DIR)
                .with_timeout(self.vcs_timeout);
            run_command(&clone, cancel)
                .await
                .map_err(|e| vcs_error("clone", e))?;
        }

        Ok(source_repo)
    }

    /// Write the benchmark config derived from `source_config` into the workspace.
    pub async fn materialize_config(
        &self,
        source_config: &Path,
        clone_url: &str,
        branch_ref: &str,
    ) -> Result<PathBuf, BenchError> {
        let raw = tokio::fs::read_to_string(source_config).await.map_err(|e| {
            BenchError::ConfigError(format!(
                "Failed to read benchmark config '{}': {}",
                source_config.display(),
                e
            ))
        })?;
        let base: Value = serde_json::from_str(&raw).map_err(|e| {
            BenchError::ConfigError(format!(
                "Failed to parse benchmark config '{}': {}",
                source_config.display(),
                e
            ))
        })?;

        let config = derive_config(base, clone_url, branch_ref)?;
        let dest = self.branch_dir.join(CONFIG_FILE);
        tokio::fs::write(&dest, to_pretty_json(&config)?).await?;
        debug!("Wrote {}", dest.display());
        Ok(dest)
    }

    /// Replace the workspace's `benchmarks` directory with a copy of
    /// `<source_dir>/benchmarks`. Old contents are removed first.
    pub async fn refresh_benchmark_suite(
        &self,
        source_dir: &Path,
    ) -> Result<PathBuf, BenchError> {
        let source = source_dir.join(BENCHMARKS_DIR);
        let dest = self.branch_dir.join(BENCHMARKS_DIR);

        if !tokio::fs::try_exists(&source).await? {
            return Err(BenchError::ConfigError(format!(
                "No benchmark suite at '{}'",
                source.display()
            )));
        }
        if tokio::fs::try_exists(&dest).await? {
            tokio::fs::remove_dir_all(&dest).await?;
        }

        let copy_dest = dest.clone();
        tokio::task::spawn_blocking(move || copy_dir_recursive(&source, &copy_dest))
            .await
            .map_err(|e| BenchError::IoError(std::io::Error::other(e)))??;
        Ok(dest)
    }

    /// Persist the triggering event, overwriting the previous one.
    pub async fn log_event(&self, payload: &Value) -> Result<PathBuf, BenchError> {
        let dest = self.branch_dir.join(EVENT_LOG_FILE);
        tokio::fs::write(&dest, to_pretty_json(payload)?).await?;
        Ok(dest)
    }
}

/// Point the benchmark config at the PR's fork and branch, keeping every other key.
pub fn derive_config(
    mut base: Value,
    clone_url: &str,
    branch_ref: &str,
) -> Result<Value, BenchError> {
    let object = base.as_object_mut().ok_or_else(|| {
        BenchError::ConfigError("benchmark config must be a JSON object".to_string())
    })?;
    object.insert("repo".to_string(), Value::String(clone_url.to_string()));
    object.insert(
        "branches".to_string(),
        Value::Array(vec![Value::String(branch_ref.to_string())]),
    );
    Ok(base)
}

/// Four-space indented JSON. Object keys come out sorted because
/// `serde_json::Map` is ordered.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>, BenchError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    buf.push(b'\n');
    Ok(buf)
}

fn vcs_error(operation: &str, e: ProcessError) -> BenchError {
    match e {
        ProcessError::Cancelled { .. } => BenchError::Cancelled {
            step: format!("git {}", operation),
        },
        other => BenchError::Vcs {
            operation: operation.to_string(),
            message: other.to_string(),
        },
    }
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
