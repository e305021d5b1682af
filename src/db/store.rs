use crate::error::BenchError;
use crate::job::{Job, JobState};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

const JOB_COLUMNS: &str = "id, owner, branch, base_sha, comments_url, state, \
                           failed_step, error, result_link, created_at, completed_at";

/// Final outcome written when a job reaches a terminal state
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub state: JobState,
    pub result_link: Option<String>,
    pub failed_step: Option<String>,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Persistent storage for jobs using SQLite
#[derive(Clone)]
pub struct SqlJobStore {
    pool: SqlitePool,
}

impl SqlJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new job record
    pub async fn create_job(&self, job: &Job) -> Result<(), BenchError> {
        sqlx::query(
            r#"
            INSERT INTO bench_jobs (
                id, owner, branch, base_sha, comments_url, state, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.owner)
        .bind(&job.branch)
        .bind(&job.base_sha)
        .bind(&job.comments_url)
        .bind(job.state.as_str())
        .bind(job.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| BenchError::DatabaseError(format!("Failed to create job: {}", e)))?;

        Ok(())
    }

    /// Record a state transition
    pub async fn update_job_state(&self, id: &str, state: JobState) -> Result<(), BenchError> {
        sqlx::query("UPDATE bench_jobs SET state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| BenchError::DatabaseError(format!("Failed to update job state: {}", e)))?;

        Ok(())
    }

    /// Complete a job (reported or failed)
    pub async fn complete_job(&self, id: &str, completion: &JobCompletion) -> Result<(), BenchError> {
        let created_at: (String,) = sqlx::query_as("SELECT created_at FROM bench_jobs WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                BenchError::DatabaseError(format!("Failed to fetch job created_at: {}", e))
            })?;

        let duration_ms = DateTime::parse_from_rfc3339(&created_at.0)
            .map(|start| (completion.completed_at - start.with_timezone(&Utc)).num_milliseconds())
            .unwrap_or(0);

        sqlx::query(
            r#"
            UPDATE bench_jobs
            SET state = ?,
                result_link = ?,
                failed_step = ?,
                error = ?,
                completed_at = ?,
                duration_ms = ?
            WHERE id = ?
            "#,
        )
        .bind(completion.state.as_str())
        .bind(&completion.result_link)
        .bind(&completion.failed_step)
        .bind(&completion.error)
        .bind(completion.completed_at.to_rfc3339())
        .bind(duration_ms)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| BenchError::DatabaseError(format!("Failed to complete job: {}", e)))?;

        Ok(())
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, BenchError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM bench_jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BenchError::DatabaseError(format!("Failed to fetch job: {}", e)))?;

        Ok(row.map(|r| r.into()))
    }

    /// Get recent jobs, newest first
    pub async fn get_recent_jobs(&self, limit: i64) -> Result<Vec<Job>, BenchError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM bench_jobs ORDER BY created_at DESC, id DESC LIMIT ?",
            JOB_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BenchError::DatabaseError(format!("Failed to fetch recent jobs: {}", e)))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Get jobs for one (owner, branch) workspace, newest first
    pub async fn get_jobs_by_identity(
        &self,
        owner: &str,
        branch: &str,
        limit: i64,
    ) -> Result<Vec<Job>, BenchError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM bench_jobs WHERE owner = ? AND branch = ? \
             ORDER BY created_at DESC, id DESC LIMIT ?",
            JOB_COLUMNS
        ))
        .bind(owner)
        .bind(branch)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BenchError::DatabaseError(format!("Failed to fetch branch jobs: {}", e)))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Count jobs per state
    pub async fn count_by_state(&self) -> Result<Vec<(String, i64)>, BenchError> {
        sqlx::query_as::<_, (String, i64)>(
            "SELECT state, COUNT(*) FROM bench_jobs GROUP BY state ORDER BY state",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BenchError::DatabaseError(format!("Failed to count jobs: {}", e)))
    }
}

// Helper struct to map DB row to Job struct
#[derive(FromRow)]
struct JobRow {
    id: String,
    owner: String,
    branch: String,
    base_sha: String,
    comments_url: String,
    state: String,
    failed_step: Option<String>,
    error: Option<String>,
    result_link: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let completed_at = row.completed_at.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        });

        Job {
            id: row.id,
            owner: row.owner,
            branch: row.branch,
            base_sha: row.base_sha,
            comments_url: row.comments_url,
            state: row.state.parse().unwrap_or(JobState::Failed),
            failed_step: row.failed_step,
            error: row.error,
            result_link: row.result_link,
            created_at,
            completed_at,
        }
    }
}
