//! Runs benchmark jobs in the background.
//!
//! Each submitted event becomes one tokio task. Jobs for the same
//! (owner, branch) workspace are serialized behind a per-identity lock;
//! jobs for different identities run in parallel, bounded by a global
//! number of slots. A job's failure stays inside its task.

use serde_json::Value;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedMutexGuard, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::SqlJobStore;
use crate::error::BenchError;
use crate::job::{Job, JobState};
use crate::orchestrator::RunOrchestrator;
use crate::webhook::{PullRequestEvent, RunIdentity};

/// Async mutexes created on demand, one per key.
/// Entries nobody holds or waits on are pruned on the next `lock` call.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of keys currently held or waited on
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// A job accepted for background execution
pub struct Submitted {
    pub job: Job,
    pub task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    orchestrator: RunOrchestrator,
    job_store: SqlJobStore,
    identity_locks: KeyedLocks<RunIdentity>,
    slots: Arc<Semaphore>,
    cancellations: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl Dispatcher {
    pub fn new(
        orchestrator: RunOrchestrator,
        job_store: SqlJobStore,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                orchestrator,
                job_store,
                identity_locks: KeyedLocks::new(),
                slots: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
                cancellations: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Validate the event, record the job and start it in the background.
    /// Returns as soon as the job is recorded.
    pub async fn submit(&self, payload: Value) -> Result<Submitted, BenchError> {
        let event = PullRequestEvent::from_payload(payload)?;
        let job = Job::from_event(&event);
        self.inner.job_store.create_job(&job).await?;
        info!(
            "Created job {} for {} (base {})",
            job.id,
            event.identity(),
            event.base_sha
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancellations().insert(job.id.clone(), cancel_tx);

        let inner = Arc::clone(&self.inner);
        let job_id = job.id.clone();
        let task = tokio::spawn(async move {
            let identity = event.identity();
            let _workspace = inner.identity_locks.lock(identity.clone()).await;
            let _slot = match Arc::clone(&inner.slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Job {} - dispatcher shut down: {}", job_id, e);
                    return;
                }
            };

            let outcome = inner.orchestrator.start(&job_id, &event, cancel_rx).await;
            match outcome.failure {
                None => info!(
                    "Job {} for {} finished in state {}",
                    job_id, identity, outcome.state
                ),
                Some((step, e)) => warn!(
                    "Job {} for {} failed during {}: {}",
                    job_id, identity, step, e
                ),
            }

            inner
                .cancellations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&job_id);
        });

        Ok(Submitted { job, task })
    }

    /// Raise the cancel flag of a running or waiting job.
    /// Returns false if the job is unknown or already finished.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.cancellations().get(job_id) {
            Some(tx) => {
                info!("Cancelling job {}", job_id);
                tx.send(true).is_ok()
            }
            None => false,
        }
    }

    /// Jobs submitted but not finished yet
    pub fn pending(&self) -> usize {
        self.cancellations().len()
    }

    fn cancellations(&self) -> std::sync::MutexGuard<'_, HashMap<String, watch::Sender<bool>>> {
        self.inner
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn job_state(&self, job_id: &str) -> Result<Option<JobState>, BenchError> {
        Ok(self.inner.job_store.get_job(job_id).await?.map(|job| job.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("alice/feature-x".to_string()).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block_each_other() {
        let locks = KeyedLocks::new();
        let _alice = locks.lock("alice/feature-x".to_string()).await;
        let bob = tokio::time::timeout(
            Duration::from_secs(1),
            locks.lock("bob/feature-x".to_string()),
        )
        .await;
        assert!(bob.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[cfg(unix)]
    mod jobs {
        use super::*;
        use crate::orchestrator::tests::Harness;
        use crate::webhook::tests::sample_payload;
        use httpmock::prelude::*;

        fn dispatcher(h: &Harness, slots: usize) -> Dispatcher {
            Dispatcher::new(h.orchestrator.clone(), h.store.clone(), slots)
        }

        #[tokio::test]
        async fn malformed_event_is_rejected_before_recording() {
            let h = Harness::new().await;
            let err = dispatcher(&h, 2)
                .submit(serde_json::json!({"pull_request": {}}))
                .await
                .err()
                .unwrap();
            assert!(matches!(err, BenchError::MalformedEvent(_)));
            assert!(h.store.get_recent_jobs(10).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn same_identity_jobs_never_overlap() {
            let h = Harness::new().await;
            h.accept_comments().await;
            let dispatcher = dispatcher(&h, 4);

            let payload = sample_payload("alice", "feature-x", &h.comments_url());
            let first = dispatcher.submit(payload.clone()).await.unwrap();
            let second = dispatcher.submit(payload).await.unwrap();
            first.task.await.unwrap();
            second.task.await.unwrap();

            // a clone then a pull, never two clones racing on the same checkout
            let git = h.tools.git_calls();
            assert_eq!(git.len(), 2);
            assert!(git[0].starts_with("clone"));
            assert_eq!(git[1], "pull");
            assert_eq!(
                dispatcher.job_state(&second.job.id).await.unwrap(),
                Some(JobState::Reported)
            );
            assert_eq!(dispatcher.pending(), 0);
        }

        #[tokio::test]
        async fn cancelled_while_queued_posts_no_comments() {
            let h = Harness::new().await;
            h.tools.slow_asv();
            let started = h
                .server
                .mock_async(|when, then| {
                    when.method(POST)
                        .path("/repos/o/r/issues/7/comments")
                        .body_includes("Benchmark run started");
                    then.status(201);
                })
                .await;
            h.accept_comments().await;
            let dispatcher = dispatcher(&h, 4);
            let payload = sample_payload("alice", "feature-x", &h.comments_url());

            let running = dispatcher.submit(payload.clone()).await.unwrap();
            while h.tools.asv_calls().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let queued = dispatcher.submit(payload).await.unwrap();
            assert!(dispatcher.cancel(&queued.job.id));
            assert!(dispatcher.cancel(&running.job.id));
            running.task.await.unwrap();
            queued.task.await.unwrap();

            started.assert_calls_async(1).await;
            assert_eq!(h.tools.git_calls().len(), 1);
            assert_eq!(
                dispatcher.job_state(&queued.job.id).await.unwrap(),
                Some(JobState::Failed)
            );
        }

        #[tokio::test]
        async fn distinct_identities_run_in_parallel() {
            let h = Harness::new().await;
            h.tools.slow_asv();
            h.accept_comments().await;
            let dispatcher = dispatcher(&h, 4);

            let alice = dispatcher
                .submit(sample_payload("alice", "feature-x", &h.comments_url()))
                .await
                .unwrap();
            let bob = dispatcher
                .submit(sample_payload("bob", "feature-x", &h.comments_url()))
                .await
                .unwrap();

            // both reach the (slow) benchmark step while the other is still running
            let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            while h.tools.asv_calls().len() < 2 {
                assert!(tokio::time::Instant::now() < deadline, "jobs did not overlap");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }

            assert!(dispatcher.cancel(&alice.job.id));
            assert!(dispatcher.cancel(&bob.job.id));
            alice.task.await.unwrap();
            bob.task.await.unwrap();
            assert_eq!(
                dispatcher.job_state(&alice.job.id).await.unwrap(),
                Some(JobState::Failed)
            );
            assert!(!dispatcher.cancel(&alice.job.id));
        }
    }
}
