//! External command execution with an explicit working directory,
//! an optional timeout and a per-job cancellation signal.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Receiving side of a job's cancellation flag. `true` means cancel.
pub type CancelSignal = watch::Receiver<bool>;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("'{command}' failed to start: {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}:\n{stderr}")]
    NonZeroExit {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("'{command}' timed out after {}s", timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },

    #[error("'{command}' was cancelled")]
    Cancelled { command: String },
}

/// A single external invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Program and arguments joined for logs and error messages
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Run the command to completion and return its stdout.
///
/// The child is killed if the timeout elapses or the cancel flag is raised
/// before it exits.
pub async fn run_command(
    spec: &CommandSpec,
    cancel: &mut CancelSignal,
) -> Result<String, ProcessError> {
    let command_line = spec.display();
    if *cancel.borrow() {
        return Err(ProcessError::Cancelled {
            command: command_line,
        });
    }

    info!("Running (cwd = '{}'): {}", spec.cwd.display(), command_line);
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let deadline = async {
        match spec.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };

    let output = tokio::select! {
        result = command.output() => result.map_err(|source| {
            error!("{} failed to start: {}", command_line, source);
            ProcessError::SpawnFailed { command: command_line.clone(), source }
        })?,
        _ = deadline => {
            warn!("{} timed out, killing it", command_line);
            return Err(ProcessError::TimedOut {
                command: command_line,
                timeout: spec.timeout.unwrap_or_default(),
            });
        }
        _ = cancelled(cancel) => {
            warn!("{} cancelled, killing it", command_line);
            return Err(ProcessError::Cancelled { command: command_line });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if output.status.success() {
        debug!("{} output:\n{}", command_line, stdout);
        Ok(stdout)
    } else {
        let err = ProcessError::NonZeroExit {
            command: command_line,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        error!("{}", err);
        Err(err)
    }
}

/// Resolves once the flag is set. A dropped sender means nobody can cancel any more.
pub async fn cancelled(cancel: &mut CancelSignal) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_in_the_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, mut rx) = watch::channel(false);
        let out = run_command(&CommandSpec::new("pwd", dir.path()), &mut rx)
            .await
            .unwrap();
        let reported = std::fs::canonicalize(out.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let (_tx, mut rx) = watch::channel(false);
        let spec = CommandSpec::new("sh", ".").arg("-c").arg("echo boom >&2; exit 3");
        match run_command(&spec, &mut rx).await {
            Err(ProcessError::NonZeroExit { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let (_tx, mut rx) = watch::channel(false);
        let spec = CommandSpec::new("sleep", ".")
            .arg("30")
            .with_timeout(Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = run_command(&spec, &mut rx).await.unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancel_signal_stops_the_child() {
        let (tx, mut rx) = watch::channel(false);
        let spec = CommandSpec::new("sleep", ".").arg("30");
        let handle = tokio::spawn(async move { run_command(&spec, &mut rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn already_cancelled_never_spawns() {
        let (_tx, mut rx) = watch::channel(true);
        let spec = CommandSpec::new("definitely-not-a-real-program", ".");
        assert!(matches!(
            run_command(&spec, &mut rx).await,
            Err(ProcessError::Cancelled { .. })
        ));
    }
}
