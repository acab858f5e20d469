//! Job state machine: maps an execution outcome to the job's next persisted
//! state, then applies it.

use std::sync::Arc;
use std::time::Duration;

use cadence_core::{Job, JobPatch, JobStatus, LogStatus};
use cadence_store::JobStore;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::Result;
use crate::executor::ExecutionOutcome;
use crate::metrics::MetricsRecorder;
use crate::recurrence;

const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Where an attempt left the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Completed,
    /// Back to pending; `attempt` failures so far out of `max`.
    Retry { attempt: u32, max: u32 },
    /// Retries exhausted. Terminal.
    DeadLettered { attempts: u32 },
}

/// Everything one outcome writes: the row patch and the audit entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub verdict: Verdict,
    pub patch: JobPatch,
    pub log_status: LogStatus,
    pub log_message: String,
}

/// Delay applied before a failed job becomes eligible again.
///
/// A zero base keeps the job immediately re-eligible on the next poll.
/// Otherwise the delay doubles per attempt, capped at one hour. The delay
/// gates the job through `retry_at`; `scheduled_at` stays the recurrence
/// anchor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryBackoff {
    base: Duration,
}

impl RetryBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    pub fn immediate() -> Self {
        Self::default()
    }

    /// Delay before retry number `attempt` (1-based), or `None` for no delay.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if self.base.is_zero() {
            return None;
        }
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(MAX_BACKOFF))
    }
}

/// Pure transition for `job` given `outcome` at `now`.
pub fn transition(
    job: &Job,
    outcome: &ExecutionOutcome,
    now: DateTime<Utc>,
    backoff: RetryBackoff,
) -> Transition {
    match outcome {
        ExecutionOutcome::Success => Transition {
            verdict: Verdict::Completed,
            patch: JobPatch {
                status: Some(JobStatus::Completed),
                retry_at: Some(None),
                retry_count: Some(0),
                dead_lettered: Some(false),
                last_executed_at: Some(Some(now)),
                ..JobPatch::default()
            },
            log_status: LogStatus::Completed,
            log_message: "Job executed successfully".to_string(),
        },
        ExecutionOutcome::Failure(reason) => {
            let attempt = job.retry_count.saturating_add(1);
            if attempt < job.max_retries {
                let retry_at = backoff.delay_for(attempt).and_then(|d| {
                    chrono::Duration::from_std(d).ok().map(|d| now + d)
                });
                Transition {
                    verdict: Verdict::Retry {
                        attempt,
                        max: job.max_retries,
                    },
                    patch: JobPatch {
                        status: Some(JobStatus::Pending),
                        retry_count: Some(attempt),
                        retry_at: Some(retry_at),
                        last_executed_at: Some(Some(now)),
                        ..JobPatch::default()
                    },
                    log_status: LogStatus::Failed,
                    log_message: format!(
                        "Job failed (attempt {attempt}/{}): {reason}",
                        job.max_retries
                    ),
                }
            } else {
                Transition {
                    verdict: Verdict::DeadLettered { attempts: attempt },
                    patch: JobPatch {
                        status: Some(JobStatus::Failed),
                        retry_at: Some(None),
                        retry_count: Some(attempt),
                        dead_lettered: Some(true),
                        last_executed_at: Some(Some(now)),
                        ..JobPatch::default()
                    },
                    log_status: LogStatus::Failed,
                    log_message: format!(
                        "Job failed after {attempt} attempt(s), dead-lettered: {reason}"
                    ),
                }
            }
        }
    }
}

/// Persists outcomes: row update, audit log, counters, and successor rows
/// for recurring jobs.
#[derive(Clone)]
pub struct OutcomeHandler {
    store: Arc<dyn JobStore>,
    metrics: Arc<dyn MetricsRecorder>,
    backoff: RetryBackoff,
}

impl OutcomeHandler {
    pub fn new(
        store: Arc<dyn JobStore>,
        metrics: Arc<dyn MetricsRecorder>,
        backoff: RetryBackoff,
    ) -> Self {
        Self {
            store,
            metrics,
            backoff,
        }
    }

    /// Record `outcome` for `job` (the snapshot taken at claim time).
    pub fn apply(&self, job: &Job, outcome: &ExecutionOutcome) -> Result<Verdict> {
        let now = Utc::now();
        let t = transition(job, outcome, now, self.backoff);

        self.store.update_job(&job.id, &t.patch)?;
        self.store.append_log(&job.id, t.log_status, &t.log_message)?;

        match t.verdict {
            Verdict::Completed => {
                self.metrics.increment_processed();
                info!(job_id = %job.id, name = %job.name, "job completed");
                if job.recurrence.is_recurring() {
                    recurrence::reschedule(self.store.as_ref(), job, now)?;
                }
            }
            Verdict::Retry { attempt, max } => {
                self.metrics.increment_failed();
                warn!(job_id = %job.id, attempt, max, message = %t.log_message, "job failed, will retry");
            }
            Verdict::DeadLettered { attempts } => {
                self.metrics.increment_failed();
                self.metrics.increment_dead_lettered();
                warn!(job_id = %job.id, attempts, message = %t.log_message, "job dead-lettered");
            }
        }
        Ok(t.verdict)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rusqlite::Connection;
    use serde_json::json;

    use cadence_core::Recurrence;
    use cadence_store::SqliteJobStore;

    use super::*;
    use crate::metrics::{CounterSnapshot, JobCounters};

    fn jan1() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn job(max_retries: u32, recurrence: Recurrence) -> Job {
        Job::new("t", json!({}), jan1(), recurrence, max_retries, jan1())
    }

    fn handler() -> (OutcomeHandler, Arc<SqliteJobStore>, Arc<JobCounters>) {
        handler_with(RetryBackoff::immediate())
    }

    fn handler_with(backoff: RetryBackoff) -> (OutcomeHandler, Arc<SqliteJobStore>, Arc<JobCounters>) {
        let store = Arc::new(SqliteJobStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let counters = Arc::new(JobCounters::new());
        let h = OutcomeHandler::new(store.clone(), counters.clone(), backoff);
        (h, store, counters)
    }

    #[test]
    fn success_clears_retry_state() {
        let mut j = job(3, Recurrence::None);
        j.retry_count = 2;
        let t = transition(&j, &ExecutionOutcome::Success, jan1(), RetryBackoff::immediate());
        assert_eq!(t.verdict, Verdict::Completed);
        assert_eq!(t.patch.status, Some(JobStatus::Completed));
        assert_eq!(t.patch.retry_count, Some(0));
        assert_eq!(t.patch.retry_at, Some(None));
        assert_eq!(t.patch.dead_lettered, Some(false));
        assert_eq!(t.patch.last_executed_at, Some(Some(jan1())));
        assert_eq!(t.log_status, LogStatus::Completed);
    }

    #[test]
    fn failure_below_ceiling_returns_to_pending() {
        let j = job(3, Recurrence::None);
        let t = transition(&j, &ExecutionOutcome::failure("boom"), jan1(), RetryBackoff::immediate());
        assert_eq!(t.verdict, Verdict::Retry { attempt: 1, max: 3 });
        assert_eq!(t.patch.status, Some(JobStatus::Pending));
        assert_eq!(t.patch.retry_count, Some(1));
        assert_eq!(t.patch.dead_lettered, None);
        // No backoff: the job is due again at once.
        assert_eq!(t.patch.scheduled_at, None);
        assert_eq!(t.patch.retry_at, Some(None));
        assert!(t.log_message.contains("attempt 1/3"));
        assert!(t.log_message.contains("boom"));
    }

    #[test]
    fn failure_at_ceiling_dead_letters() {
        let mut j = job(3, Recurrence::None);
        j.retry_count = 2;
        let t = transition(&j, &ExecutionOutcome::failure("boom"), jan1(), RetryBackoff::immediate());
        assert_eq!(t.verdict, Verdict::DeadLettered { attempts: 3 });
        assert_eq!(t.patch.status, Some(JobStatus::Failed));
        assert_eq!(t.patch.dead_lettered, Some(true));
        assert_eq!(t.patch.retry_count, Some(3));
        assert!(t.log_message.contains("dead-lettered"));
    }

    #[test]
    fn zero_max_retries_dead_letters_on_first_failure() {
        let j = job(0, Recurrence::None);
        let t = transition(&j, &ExecutionOutcome::failure("x"), jan1(), RetryBackoff::immediate());
        assert_eq!(t.verdict, Verdict::DeadLettered { attempts: 1 });
    }

    #[test]
    fn backoff_sets_retry_at_and_keeps_anchor() {
        let mut j = job(5, Recurrence::None);
        j.retry_count = 1;
        let backoff = RetryBackoff::new(Duration::from_secs(10));
        let t = transition(&j, &ExecutionOutcome::failure("x"), jan1(), backoff);
        // Second attempt: 10s * 2.
        assert_eq!(
            t.patch.retry_at,
            Some(Some(jan1() + chrono::Duration::seconds(20)))
        );
        assert_eq!(t.patch.scheduled_at, None);
    }

    #[test]
    fn backed_off_daily_job_still_rolls_forward_from_anchor() {
        let (h, store, _) = handler_with(RetryBackoff::new(Duration::from_secs(10)));
        let j = store.insert_job(&job(3, Recurrence::Daily)).unwrap();

        h.apply(&j, &ExecutionOutcome::failure("flaky")).unwrap();
        let retried = store.get_job(&j.id).unwrap().unwrap();
        assert_eq!(retried.scheduled_at, jan1());
        assert!(retried.retry_at.is_some_and(|at| at > jan1()));

        h.apply(&retried, &ExecutionOutcome::Success).unwrap();

        let done = store.get_job(&j.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.retry_at, None);
        let pending = store.list_jobs(Some(JobStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].scheduled_at,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        );
        assert_eq!(pending[0].retry_at, None);
    }

    #[test]
    fn backoff_is_capped() {
        let backoff = RetryBackoff::new(Duration::from_secs(60));
        assert_eq!(backoff.delay_for(1), Some(Duration::from_secs(60)));
        assert_eq!(backoff.delay_for(40), Some(MAX_BACKOFF));
        assert_eq!(RetryBackoff::immediate().delay_for(3), None);
    }

    #[test]
    fn max_retries_one_dead_letters_after_single_failure() {
        let (h, store, counters) = handler();
        let j = store.insert_job(&job(1, Recurrence::None)).unwrap();

        let verdict = h.apply(&j, &ExecutionOutcome::failure("nope")).unwrap();

        assert_eq!(verdict, Verdict::DeadLettered { attempts: 1 });
        let stored = store.get_job(&j.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.dead_lettered);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                processed: 0,
                failed: 1,
                dead_lettered: 1
            }
        );
    }

    #[test]
    fn r_consecutive_failures_reach_dead_letter() {
        let (h, store, counters) = handler();
        let r = 4;
        let mut current = store.insert_job(&job(r, Recurrence::None)).unwrap();

        for attempt in 1..r {
            h.apply(&current, &ExecutionOutcome::failure("flaky")).unwrap();
            current = store.get_job(&current.id).unwrap().unwrap();
            assert_eq!(current.status, JobStatus::Pending);
            assert!(!current.dead_lettered);
            assert_eq!(current.retry_count, attempt);
        }

        h.apply(&current, &ExecutionOutcome::failure("flaky")).unwrap();
        let last = store.get_job(&current.id).unwrap().unwrap();
        assert_eq!(last.status, JobStatus::Failed);
        assert!(last.dead_lettered);
        assert_eq!(last.retry_count, r);
        assert_eq!(counters.snapshot().failed, r as u64);
        assert_eq!(counters.snapshot().dead_lettered, 1);
        assert_eq!(store.list_logs(&last.id).unwrap().len(), r as usize);
    }

    #[test]
    fn successful_daily_job_spawns_next_day() {
        let (h, store, counters) = handler();
        let j = store.insert_job(&job(3, Recurrence::Daily)).unwrap();

        assert_eq!(h.apply(&j, &ExecutionOutcome::Success).unwrap(), Verdict::Completed);

        let original = store.get_job(&j.id).unwrap().unwrap();
        assert_eq!(original.status, JobStatus::Completed);
        assert_eq!(original.retry_count, 0);

        let pending = store.list_jobs(Some(JobStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 1);
        let next = &pending[0];
        assert_ne!(next.id, j.id);
        assert_eq!(
            next.scheduled_at,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        );
        assert_eq!(next.retry_count, 0);
        assert_eq!(counters.snapshot().processed, 1);
    }

    #[test]
    fn one_shot_success_spawns_nothing() {
        let (h, store, _) = handler();
        let j = store.insert_job(&job(3, Recurrence::None)).unwrap();
        h.apply(&j, &ExecutionOutcome::Success).unwrap();
        assert_eq!(store.list_jobs(None).unwrap().len(), 1);
    }

    #[test]
    fn recurring_failure_does_not_reschedule() {
        let (h, store, _) = handler();
        let j = store.insert_job(&job(3, Recurrence::Weekly)).unwrap();
        h.apply(&j, &ExecutionOutcome::failure("x")).unwrap();
        assert_eq!(store.list_jobs(None).unwrap().len(), 1);
    }

    #[test]
    fn outcome_for_missing_job_surfaces_not_found() {
        let (h, _, _) = handler();
        let ghost = job(3, Recurrence::None);
        let err = h.apply(&ghost, &ExecutionOutcome::Success).unwrap_err();
        assert!(matches!(
            err,
            crate::error::SchedulerError::Store(cadence_store::StoreError::NotFound { .. })
        ));
    }
}
