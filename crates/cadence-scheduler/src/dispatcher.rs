use std::sync::Arc;
use std::time::Duration;

use cadence_core::{Job, JobPatch, JobStatus, LogStatus};
use cadence_lock::{new_token, LockService};
use cadence_store::JobStore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::executor::{ExecutionOutcome, JobExecutor};
use crate::outcome::OutcomeHandler;
use crate::shutdown::ActiveJobs;

/// What happened to one claimed job.
#[derive(Debug)]
pub enum Dispatch {
    /// Lock taken; execution runs on the returned task.
    Started(JoinHandle<()>),
    /// Another worker holds `job-lock:<id>`. Nothing was touched.
    Contended,
    /// The lock service errored. The job was put back to `pending`.
    LockUnavailable,
}

/// Runs claimed jobs under their distributed lock.
///
/// Per job: acquire `job-lock:<id>` with a fresh token, mark the job active,
/// then on a background task log `started`, execute, record the outcome and
/// release the lock by compare-and-delete.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    locks: Arc<dyn LockService>,
    executor: Arc<dyn JobExecutor>,
    outcomes: OutcomeHandler,
    active: ActiveJobs,
    lock_ttl: Duration,
    renew_every: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        locks: Arc<dyn LockService>,
        executor: Arc<dyn JobExecutor>,
        outcomes: OutcomeHandler,
        active: ActiveJobs,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            store,
            locks,
            executor,
            outcomes,
            active,
            lock_ttl,
            renew_every: None,
        }
    }

    /// Re-extend held locks every `every` while their job executes.
    pub fn with_renewal(mut self, every: Option<Duration>) -> Self {
        self.renew_every = every;
        self
    }

    /// Try to take the job's lock and, if successful, start executing it.
    ///
    /// The active count is raised before this returns `Started`, so a
    /// shutdown that begins afterwards always waits for the execution.
    pub async fn dispatch(&self, job: Job) -> Dispatch {
        let key = job.lock_key();
        let token = new_token();

        match self.locks.try_acquire(&key, &token, self.lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job.id, "job locked by another worker, skipping");
                return Dispatch::Contended;
            }
            Err(e) => {
                warn!(job_id = %job.id, "lock acquire failed, returning job to pending: {e}");
                if let Err(e) = self
                    .store
                    .update_job(&job.id, &JobPatch::status(JobStatus::Pending))
                {
                    error!(job_id = %job.id, "failed to revert claimed job: {e}");
                }
                return Dispatch::LockUnavailable;
            }
        }

        let guard = self.active.enter();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            this.run_locked(job, key, token).await;
        });
        Dispatch::Started(handle)
    }

    async fn run_locked(&self, job: Job, key: String, token: String) {
        info!(job_id = %job.id, name = %job.name, attempt = job.retry_count + 1, "executing job");
        if let Err(e) = self
            .store
            .append_log(&job.id, LogStatus::Started, "Job execution started")
        {
            warn!(job_id = %job.id, "failed to write start log: {e}");
        }

        let renewer = self
            .renew_every
            .map(|every| self.spawn_renewer(key.clone(), token.clone(), every));

        let outcome = self.execute(&job).await;

        if let Some(renewer) = renewer {
            renewer.abort();
        }

        if let Err(e) = self.outcomes.apply(&job, &outcome) {
            error!(job_id = %job.id, "failed to record job outcome: {e}");
        }

        match self.locks.compare_and_delete(&key, &token).await {
            Ok(true) => debug!(job_id = %job.id, "lock released"),
            Ok(false) => warn!(job_id = %job.id, "lock expired or changed hands before release"),
            Err(e) => error!(job_id = %job.id, "lock release failed: {e}"),
        }
    }

    /// Run the executor on its own task so a panic surfaces as a failure
    /// instead of tearing down the dispatch task.
    async fn execute(&self, job: &Job) -> ExecutionOutcome {
        let executor = Arc::clone(&self.executor);
        let owned = job.clone();
        match tokio::spawn(async move { executor.execute(&owned).await }).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                let panic = e.into_panic();
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                ExecutionOutcome::failure(format!("executor panicked: {msg}"))
            }
            Err(e) => ExecutionOutcome::failure(format!("executor task cancelled: {e}")),
        }
    }

    fn spawn_renewer(&self, key: String, token: String, every: Duration) -> JoinHandle<()> {
        let locks = Arc::clone(&self.locks);
        let ttl = self.lock_ttl;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match locks.renew(&key, &token, ttl).await {
                    Ok(true) => debug!(%key, "lock renewed"),
                    Ok(false) => {
                        warn!(%key, "lock ownership lost during execution, no longer renewing");
                        break;
                    }
                    Err(e) => warn!(%key, "lock renewal failed: {e}"),
                }
            }
        })
    }
}
