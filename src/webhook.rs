//! Pull request webhook payloads and the run identity derived from them

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::BenchError;

/// Pull request actions that trigger a benchmark run
pub const TRIGGER_ACTIONS: &[&str] = &["opened", "synchronize", "reopened"];

/// The (owner, branch) pair identifying one benchmark workspace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RunIdentity {
    pub owner: String,
    pub branch: String,
}

impl RunIdentity {
    /// Validates both parts so they can be used as path components.
    /// Branch names may contain `/`, which nests the workspace directory.
    pub fn new(owner: &str, branch: &str) -> Result<Self, BenchError> {
        if !is_safe_segment(owner) {
            return Err(BenchError::MalformedEvent(format!(
                "owner login '{}' is not usable as a directory name",
                owner
            )));
        }
        if branch.is_empty() || !branch.split('/').all(is_safe_segment) {
            return Err(BenchError::MalformedEvent(format!(
                "branch ref '{}' is not usable as a directory name",
                branch
            )));
        }
        Ok(Self {
            owner: owner.to_string(),
            branch: branch.to_string(),
        })
    }

    /// Path components below the runs directory: owner, then each branch segment.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.owner.as_str()).chain(self.branch.split('/'))
    }

    /// `<runs_dir>/<owner>/<branch>`
    pub fn branch_dir(&self, runs_dir: &Path) -> PathBuf {
        let mut dir = runs_dir.to_path_buf();
        dir.extend(self.segments());
        dir
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.branch)
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

/// The fields of a pull request event that a benchmark run needs,
/// plus the raw payload kept for the audit log.
#[derive(Debug, Clone)]
pub struct PullRequestEvent {
    pub base_sha: String,
    pub branch_ref: String,
    pub owner: String,
    pub clone_url: String,
    pub comments_url: String,
    payload: Value,
}

impl PullRequestEvent {
    /// Extract the required fields, failing with `MalformedEvent` if any is absent.
    pub fn from_payload(payload: Value) -> Result<Self, BenchError> {
        let base_sha = required_str(&payload, "/pull_request/base/sha")?;
        let branch_ref = required_str(&payload, "/pull_request/head/ref")?;
        let owner = required_str(&payload, "/pull_request/head/repo/owner/login")?;
        let clone_url = required_str(&payload, "/pull_request/head/repo/clone_url")?;
        let comments_url = required_str(&payload, "/pull_request/comments_url")?;

        // Reject unusable names before anything touches the filesystem
        RunIdentity::new(&owner, &branch_ref)?;

        Ok(Self {
            base_sha,
            branch_ref,
            owner,
            clone_url,
            comments_url,
            payload,
        })
    }

    pub fn identity(&self) -> RunIdentity {
        RunIdentity {
            owner: self.owner.clone(),
            branch: self.branch_ref.clone(),
        }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

fn required_str(payload: &Value, pointer: &str) -> Result<String, BenchError> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| {
            BenchError::MalformedEvent(format!(
                "missing field {}",
                pointer.trim_start_matches('/').replace('/', ".")
            ))
        })
}
