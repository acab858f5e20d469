use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Fire-and-forget counter sink the engine reports outcomes to.
pub trait MetricsRecorder: Send + Sync {
    fn increment_processed(&self);
    fn increment_failed(&self);
    fn increment_dead_lettered(&self);
}

/// In-process counters, readable via [`JobCounters::snapshot`].
#[derive(Debug, Default)]
pub struct JobCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

impl JobCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

impl MetricsRecorder for JobCounters {
    fn increment_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }
}
