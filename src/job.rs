use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::webhook::PullRequestEvent;

/// Progress of a benchmark job. A job only ever moves forward, and
/// `Failed` can be entered from any non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    WorkspaceReady,
    Benchmarked,
    Published,
    Reported,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::WorkspaceReady => "workspace_ready",
            JobState::Benchmarked => "benchmarked",
            JobState::Published => "published",
            JobState::Reported => "reported",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Reported | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobState::Created),
            "workspace_ready" => Ok(JobState::WorkspaceReady),
            "benchmarked" => Ok(JobState::Benchmarked),
            "published" => Ok(JobState::Published),
            "reported" => Ok(JobState::Reported),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// The step a job was executing, used in failure reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStep {
    PrepareWorkspace,
    SyncRepo,
    MaterializeConfig,
    RefreshBenchmarks,
    LogEvent,
    RunBenchmarks,
    Publish,
    Report,
}

impl RunStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStep::PrepareWorkspace => "workspace preparation",
            RunStep::SyncRepo => "repository sync",
            RunStep::MaterializeConfig => "benchmark config setup",
            RunStep::RefreshBenchmarks => "benchmark suite copy",
            RunStep::LogEvent => "event logging",
            RunStep::RunBenchmarks => "benchmark run",
            RunStep::Publish => "result publishing",
            RunStep::Report => "result reporting",
        }
    }
}

impl fmt::Display for RunStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One benchmark run triggered by one webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub owner: String,
    pub branch: String,
    pub base_sha: String,
    pub comments_url: String,
    pub state: JobState,
    pub failed_step: Option<String>,
    pub error: Option<String>,
    pub result_link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job in `Created` state
    pub fn from_event(event: &PullRequestEvent) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            owner: event.owner.clone(),
            branch: event.branch_ref.clone(),
            base_sha: event.base_sha.clone(),
            comments_url: event.comments_url.clone(),
            state: JobState::Created,
            failed_step: None,
            error: None,
            result_link: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}
