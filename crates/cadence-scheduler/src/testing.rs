//! Shared fixtures for the engine's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::{Job, JobStatus, LogStatus, Recurrence};
use cadence_lock::{LockError, LockService, MemoryLockService};
use cadence_store::{JobStore, SqliteJobStore};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;
use tokio::sync::Notify;

use crate::executor::{ExecutionOutcome, JobExecutor};

pub fn memory_store() -> Arc<SqliteJobStore> {
    Arc::new(SqliteJobStore::new(Connection::open_in_memory().unwrap()).unwrap())
}

pub fn due_job(name: &str, scheduled_at: DateTime<Utc>, recurrence: Recurrence) -> Job {
    Job::new(name, json!({}), scheduled_at, recurrence, 3, Utc::now())
}

/// Returns a fixed outcome and counts calls.
pub struct FixedExecutor {
    outcome: ExecutionOutcome,
    pub calls: AtomicUsize,
}

impl FixedExecutor {
    pub fn new(outcome: ExecutionOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobExecutor for FixedExecutor {
    async fn execute(&self, _job: &Job) -> ExecutionOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// Fails the first `failures` calls, then succeeds.
pub struct FlakyExecutor {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyExecutor {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobExecutor for FlakyExecutor {
    async fn execute(&self, _job: &Job) -> ExecutionOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            ExecutionOutcome::failure(format!("flaky call {}", call + 1))
        } else {
            ExecutionOutcome::Success
        }
    }
}

pub struct PanickingExecutor;

#[async_trait]
impl JobExecutor for PanickingExecutor {
    async fn execute(&self, _job: &Job) -> ExecutionOutcome {
        panic!("executor blew up");
    }
}

/// Blocks every execution until [`GatedExecutor::open`] is called.
pub struct GatedExecutor {
    gate: Notify,
    pub started: AtomicUsize,
}

impl GatedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Notify::new(),
            started: AtomicUsize::new(0),
        })
    }

    pub fn open(&self) {
        self.gate.notify_waiters();
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobExecutor for GatedExecutor {
    async fn execute(&self, _job: &Job) -> ExecutionOutcome {
        let opened = self.gate.notified();
        self.started.fetch_add(1, Ordering::SeqCst);
        opened.await;
        ExecutionOutcome::Success
    }
}

/// Sleeps for a fixed duration, then succeeds.
pub struct SlowExecutor(pub Duration);

#[async_trait]
impl JobExecutor for SlowExecutor {
    async fn execute(&self, _job: &Job) -> ExecutionOutcome {
        tokio::time::sleep(self.0).await;
        ExecutionOutcome::Success
    }
}

/// Lock service whose backend is always unreachable.
pub struct DownLockService;

#[async_trait]
impl LockService for DownLockService {
    async fn try_acquire(&self, _: &str, _: &str, _: Duration) -> cadence_lock::Result<bool> {
        Err(LockError::Unavailable("connection refused".to_string()))
    }

    async fn compare_and_delete(&self, _: &str, _: &str) -> cadence_lock::Result<bool> {
        Err(LockError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _: &str) -> cadence_lock::Result<Option<String>> {
        Err(LockError::Unavailable("connection refused".to_string()))
    }

    async fn renew(&self, _: &str, _: &str, _: Duration) -> cadence_lock::Result<bool> {
        Err(LockError::Unavailable("connection refused".to_string()))
    }
}

/// Job row as seen at the moment its lock was released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSnapshot {
    pub status: JobStatus,
    pub retry_count: u32,
    pub last_log: Option<LogStatus>,
}

/// In-memory lock service that reads the job row and its log on every
/// release, before delegating.
pub struct RecordingLockService {
    inner: MemoryLockService,
    store: Arc<SqliteJobStore>,
    releases: Mutex<Vec<ReleaseSnapshot>>,
}

impl RecordingLockService {
    pub fn new(store: Arc<SqliteJobStore>) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryLockService::new(),
            store,
            releases: Mutex::new(Vec::new()),
        })
    }

    pub fn releases(&self) -> Vec<ReleaseSnapshot> {
        self.releases.lock().unwrap().clone()
    }
}

#[async_trait]
impl LockService for RecordingLockService {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> cadence_lock::Result<bool> {
        self.inner.try_acquire(key, token, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> cadence_lock::Result<bool> {
        let job_id = key.strip_prefix("job-lock:").unwrap();
        let job = self.store.get_job(job_id).unwrap().unwrap();
        let last_log = self.store.list_logs(job_id).unwrap().last().map(|l| l.status);
        self.releases.lock().unwrap().push(ReleaseSnapshot {
            status: job.status,
            retry_count: job.retry_count,
            last_log,
        });
        self.inner.compare_and_delete(key, token).await
    }

    async fn get(&self, key: &str) -> cadence_lock::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn renew(&self, key: &str, token: &str, ttl: Duration) -> cadence_lock::Result<bool> {
        self.inner.renew(key, token, ttl).await
    }
}

/// Poll `cond` every few milliseconds until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
