//! In-flight job accounting and the drain half of graceful shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

/// Count of dispatched executions that have not finished their
/// outcome/release sequence.
///
/// Only [`ActiveJobs::enter`] increments and only dropping the returned
/// guard decrements, so the count cannot drift on early returns or panics.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs {
    count: Arc<AtomicUsize>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> ActiveJobGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        ActiveJobGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ActiveJobGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Waits for in-flight executions to finish. No deadline.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    active: ActiveJobs,
    poll_every: Duration,
}

impl ShutdownCoordinator {
    pub fn new(active: ActiveJobs, poll_every: Duration) -> Self {
        Self { active, poll_every }
    }

    /// Return once the active-job count reaches zero.
    pub async fn drain(&self) {
        let mut remaining = self.active.count();
        if remaining > 0 {
            info!(in_flight = remaining, "waiting for in-flight jobs to finish");
        }
        while remaining > 0 {
            tokio::time::sleep(self.poll_every).await;
            remaining = self.active.count();
            debug!(in_flight = remaining, "drain poll");
        }
    }
}
