//! Turns one pull request event into the full sequence of side effects:
//! workspace setup, benchmark run, publish, and the status comment.
//!
//! ```text
//! Created -> WorkspaceReady -> Benchmarked -> Published -> Reported
//!    \____________\_______________\______________\______-> Failed
//! ```
//!
//! Steps run strictly in order and nothing is retried; the first error ends
//! the job in `Failed` and a failure comment naming the step is posted.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

use crate::BenchConfig;
use crate::benchmark::{BenchmarkInvoker, commit_range};
use crate::comments::{CommentChannel, build_http_client};
use crate::db::SqlJobStore;
use crate::db::store::JobCompletion;
use crate::dispatch::KeyedLocks;
use crate::error::BenchError;
use crate::job::{JobState, RunStep};
use crate::process::CancelSignal;
use crate::webhook::{PullRequestEvent, RunIdentity};
use crate::workspace::{CONFIG_FILE, RunWorkspace};

/// How a job ended
#[derive(Debug)]
pub struct RunOutcome {
    pub state: JobState,
    pub result_link: Option<Url>,
    pub failure: Option<(RunStep, BenchError)>,
}

#[derive(Clone)]
pub struct RunOrchestrator {
    config: Arc<BenchConfig>,
    http: reqwest::Client,
    job_store: SqlJobStore,
    comment_locks: Arc<KeyedLocks<String>>,
}

type StepResult<T> = Result<T, (RunStep, BenchError)>;

impl RunOrchestrator {
    pub fn new(config: Arc<BenchConfig>, job_store: SqlJobStore) -> Result<Self, BenchError> {
        Ok(Self {
            config,
            http: build_http_client()?,
            job_store,
            comment_locks: Arc::new(KeyedLocks::new()),
        })
    }

    /// `<public base>/runs/<owner>/<branch>/html/index.html`
    pub fn result_link(&self, identity: &RunIdentity) -> Result<Url, BenchError> {
        let mut link = self.config.public_base_url()?;
        let base = link.to_string();
        link.path_segments_mut()
            .map_err(|_| BenchError::ConfigError(format!("'{}' cannot be a base URL", base)))?
            .pop_if_empty()
            .push("runs")
            .extend(identity.segments())
            .push("html")
            .push("index.html");
        Ok(link)
    }

    fn channel(&self, event: &PullRequestEvent) -> CommentChannel {
        CommentChannel::new(
            self.http.clone(),
            event.comments_url.clone(),
            self.config.credentials(),
        )
    }

    /// Run one job to completion. Errors are recorded and reported on the PR,
    /// never returned.
    pub async fn start(
        &self,
        job_id: &str,
        event: &PullRequestEvent,
        mut cancel: CancelSignal,
    ) -> RunOutcome {
        let identity = event.identity();
        if *cancel.borrow() {
            info!("Job {} for {} cancelled before it started", job_id, identity);
            let step = RunStep::PrepareWorkspace;
            let outcome = RunOutcome {
                state: JobState::Failed,
                result_link: None,
                failure: Some((
                    step,
                    BenchError::Cancelled {
                        step: step.to_string(),
                    },
                )),
            };
            self.record(job_id, &outcome).await;
            return outcome;
        }

        let channel = self.channel(event);
        info!("Job {} - starting benchmark run for {}", job_id, identity);

        let outcome = match self.drive(job_id, event, &identity, &channel, &mut cancel).await {
            Ok(link) => {
                info!("Job {} completed successfully: {}", job_id, link);
                RunOutcome {
                    state: JobState::Reported,
                    result_link: Some(link),
                    failure: None,
                }
            }
            Err((step, e)) => {
                error!("Job {} failed during {}: {}", job_id, step, e);
                if step != RunStep::Report {
                    let _guard = self.comment_locks.lock(event.comments_url.clone()).await;
                    if let Err(report_err) =
                        channel.report_failed(step.as_str(), &e.to_string()).await
                    {
                        warn!("Job {} - could not post failure comment: {}", job_id, report_err);
                    }
                }
                RunOutcome {
                    state: JobState::Failed,
                    result_link: None,
                    failure: Some((step, e)),
                }
            }
        };

        self.record(job_id, &outcome).await;
        outcome
    }

    async fn record(&self, job_id: &str, outcome: &RunOutcome) {
        let completion = JobCompletion {
            state: outcome.state,
            result_link: outcome.result_link.as_ref().map(Url::to_string),
            failed_step: outcome.failure.as_ref().map(|(step, _)| step.to_string()),
            error: outcome.failure.as_ref().map(|(_, e)| e.to_string()),
            completed_at: Utc::now(),
        };
        if let Err(e) = self.job_store.complete_job(job_id, &completion).await {
            error!("Job {} - failed to record completion: {}", job_id, e);
        }
    }

    async fn drive(
        &self,
        job_id: &str,
        event: &PullRequestEvent,
        identity: &RunIdentity,
        channel: &CommentChannel,
        cancel: &mut CancelSignal,
    ) -> StepResult<Url> {
        let runner = &self.config.runner;

        if runner.announce_start {
            let _guard = self.comment_locks.lock(event.comments_url.clone()).await;
            if let Err(e) = channel.report_started().await {
                warn!("Job {} - could not post start comment: {}", job_id, e);
            }
        }

        let workspace = RunWorkspace::new(&self.config.runs_dir(), identity, runner);

        check_cancel(cancel, RunStep::PrepareWorkspace)?;
        workspace
            .ensure_branch_dir()
            .await
            .map_err(at(RunStep::PrepareWorkspace))?;

        check_cancel(cancel, RunStep::SyncRepo)?;
        let source_repo = workspace
            .sync_source_repo(&event.clone_url, &event.branch_ref, cancel)
            .await
            .map_err(at(RunStep::SyncRepo))?;

        check_cancel(cancel, RunStep::MaterializeConfig)?;
        workspace
            .materialize_config(&source_repo.join(CONFIG_FILE), &event.clone_url, &event.branch_ref)
            .await
            .map_err(at(RunStep::MaterializeConfig))?;

        check_cancel(cancel, RunStep::RefreshBenchmarks)?;
        workspace
            .refresh_benchmark_suite(&source_repo)
            .await
            .map_err(at(RunStep::RefreshBenchmarks))?;

        check_cancel(cancel, RunStep::LogEvent)?;
        workspace
            .log_event(event.payload())
            .await
            .map_err(at(RunStep::LogEvent))?;
        self.transition(job_id, JobState::WorkspaceReady).await;

        let invoker = BenchmarkInvoker::new(workspace.branch_dir(), runner);
        let range = commit_range(&event.base_sha, &event.branch_ref);
        check_cancel(cancel, RunStep::RunBenchmarks)?;
        invoker
            .run_range(&range, cancel)
            .await
            .map_err(at(RunStep::RunBenchmarks))?;
        self.transition(job_id, JobState::Benchmarked).await;

        check_cancel(cancel, RunStep::Publish)?;
        invoker.publish(cancel).await.map_err(at(RunStep::Publish))?;
        self.transition(job_id, JobState::Published).await;

        let link = self.result_link(identity).map_err(at(RunStep::Report))?;
        {
            let _guard = self.comment_locks.lock(event.comments_url.clone()).await;
            channel
                .report_finished(&link)
                .await
                .map_err(at(RunStep::Report))?;
        }
        Ok(link)
    }

    async fn transition(&self, job_id: &str, state: JobState) {
        info!("Job {} -> {}", job_id, state);
        if let Err(e) = self.job_store.update_job_state(job_id, state).await {
            error!("Job {} - failed to record state {}: {}", job_id, state, e);
        }
    }
}

fn at(step: RunStep) -> impl FnOnce(BenchError) -> (RunStep, BenchError) {
    move |e| (step, e)
}

fn check_cancel(cancel: &CancelSignal, step: RunStep) -> StepResult<()> {
    if *cancel.borrow() {
        return Err((
            step,
            BenchError::Cancelled {
                step: step.to_string(),
            },
        ));
    }
    Ok(())
}
