pub mod api;
pub mod benchmark;
pub mod comments;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod logging;
pub mod orchestrator;
pub mod process;
pub mod utils;
pub mod webhook;
pub mod workspace;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::comments::Credentials;
use crate::db::SqlJobStore;
use crate::dispatch::Dispatcher;
use crate::error::BenchError;

const DEFAULT_RUNS_ROOT: &str = ".";
const DEFAULT_DATABASE_PATH: &str = "bench.db";

/// Runtime configuration, assembled from the environment and an optional TOML file.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Public host name used to build result links.
    pub hostname: String,
    pub port: String,
    pub bind_address: String,
    pub github_user: String,
    pub github_pass: String,
    pub webhook_secret: Option<String>,
    /// Directory that holds `runs/`.
    pub runs_root: PathBuf,
    pub database_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub runner: RunnerConfig,
}

/// Settings for the external tools, read from the `[runner]` table.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunnerConfig {
    pub git_program: String,
    pub asv_program: String,
    pub steps: u32,
    pub vcs_timeout_secs: u64,
    pub benchmark_timeout_secs: u64,
    pub max_concurrent_jobs: usize,
    /// Post a "started" comment before the workspace is prepared.
    pub announce_start: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            git_program: "git".to_string(),
            asv_program: "asv".to_string(),
            steps: benchmark::DEFAULT_STEPS,
            vcs_timeout_secs: 600,
            benchmark_timeout_secs: 7200,
            max_concurrent_jobs: 4,
            announce_start: true,
        }
    }
}

impl RunnerConfig {
    pub fn vcs_timeout(&self) -> Duration {
        Duration::from_secs(self.vcs_timeout_secs)
    }

    pub fn benchmark_timeout(&self) -> Duration {
        Duration::from_secs(self.benchmark_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    runner: RunnerConfig,
}

impl BenchConfig {
    /// Builds the configuration from a variable lookup and the optional TOML file contents.
    pub fn from_sources<F>(lookup: F, file_contents: Option<&str>) -> Result<Self, BenchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| BenchError::ConfigError(format!("{} must be set", name)))
        };

        let hostname = required("HOSTNAME")?;
        let port = required("PORT")?;
        let github_user = required("GITHUB_USER")?;
        let github_pass = required("GITHUB_PASS")?;

        let file: FileConfig = match file_contents {
            Some(contents) => toml::from_str(contents)?,
            None => FileConfig::default(),
        };
        if file.runner.max_concurrent_jobs == 0 {
            return Err(BenchError::ConfigError(
                "runner.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| format!("0.0.0.0:{}", port)),
            hostname,
            port,
            github_user,
            github_pass,
            webhook_secret: lookup("WEBHOOK_SECRET").filter(|s| !s.is_empty()),
            runs_root: PathBuf::from(
                lookup("RUNS_ROOT").unwrap_or_else(|| DEFAULT_RUNS_ROOT.to_string()),
            ),
            database_path: PathBuf::from(
                lookup("DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            ),
            log_dir: lookup("LOG_DIR").map(PathBuf::from),
            runner: file.runner,
        })
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.github_user.clone(),
            password: self.github_pass.clone(),
        }
    }

    /// Directory containing one subdirectory per owner.
    pub fn runs_dir(&self) -> PathBuf {
        self.runs_root.join("runs")
    }

    /// Base URL the published results are reachable under.
    /// A host name without a scheme is served over plain http.
    pub fn public_base_url(&self) -> Result<Url, BenchError> {
        let host = format!("{}:{}", self.hostname.trim_end_matches('/'), self.port);
        let raw = if host.contains("://") {
            host
        } else {
            format!("http://{}", host)
        };
        Url::parse(&raw)
            .map_err(|e| BenchError::ConfigError(format!("Invalid public address '{}': {}", raw, e)))
    }
}

/// Load configuration from the process environment and the TOML file at `path`.
/// A missing file means defaults for the runner settings.
pub fn load_config(path: &Path) -> Result<BenchConfig, BenchError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(BenchError::ConfigError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            )));
        }
    };
    BenchConfig::from_sources(|name| std::env::var(name).ok(), contents.as_deref())
}

pub struct AppState {
    pub config: Arc<BenchConfig>,
    pub job_store: SqlJobStore,
    pub dispatcher: Dispatcher,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::HashMap;

    pub fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    pub fn config(hostname: &str, port: &str, runs_root: &Path) -> BenchConfig {
        let mut config = BenchConfig::from_sources(
            env(&[
                ("HOSTNAME", hostname),
                ("PORT", port),
                ("GITHUB_USER", "bench-bot"),
                ("GITHUB_PASS", "secret"),
            ]),
            None,
        )
        .expect("test config");
        config.runs_root = runs_root.to_path_buf();
        config
    }
}
