use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::config::{PollConfig, DEFAULT_POLL_INTERVAL_SECS};
use cadence_core::CadenceError;
use cadence_store::JobStore;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatch, Dispatcher};
use crate::error::Result;

/// When the poller wakes up.
#[derive(Debug, Clone)]
pub enum PollCadence {
    /// Fixed gap between the end of one pass and the start of the next.
    Interval(Duration),
    /// Wake at each cron fire time.
    Cron(cron::Schedule),
}

impl PollCadence {
    pub fn from_config(poll: &PollConfig) -> Result<Self> {
        match poll.schedule {
            Some(ref expr) => {
                let schedule = cron::Schedule::from_str(expr)
                    .map_err(|e| CadenceError::InvalidSchedule(format!("{expr}: {e}")))?;
                Ok(PollCadence::Cron(schedule))
            }
            None => Ok(PollCadence::Interval(Duration::from_secs(poll.interval_secs))),
        }
    }

    /// How long to sleep from `now` until the next pass.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        match self {
            PollCadence::Interval(every) => *every,
            PollCadence::Cron(schedule) => match schedule.after(&now).next() {
                Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
                None => {
                    warn!("poll schedule has no future fire times, falling back to default interval");
                    Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
                }
            },
        }
    }
}

/// Counts for one poll pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub claimed: usize,
    pub dispatched: usize,
}

/// Claims due jobs on a cadence and hands each to the [`Dispatcher`].
#[derive(Clone)]
pub struct Poller {
    store: Arc<dyn JobStore>,
    dispatcher: Dispatcher,
    cadence: PollCadence,
}

impl Poller {
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Dispatcher, cadence: PollCadence) -> Self {
        Self {
            store,
            dispatcher,
            cadence,
        }
    }

    /// One pass: claim everything due now and dispatch it.
    ///
    /// A failed claim is logged and treated as an empty pass; the next tick
    /// tries again.
    pub async fn poll_once(&self) -> PollReport {
        let due = match self.store.claim_due_jobs(Utc::now()) {
            Ok(due) => due,
            Err(e) => {
                error!("claiming due jobs failed: {e}");
                return PollReport::default();
            }
        };
        if due.is_empty() {
            debug!("no due jobs");
            return PollReport::default();
        }

        let mut report = PollReport {
            claimed: due.len(),
            dispatched: 0,
        };
        info!(count = report.claimed, "claimed due jobs");

        for job in due {
            if let Dispatch::Started(_) = self.dispatcher.dispatch(job).await {
                report.dispatched += 1;
            }
        }
        report
    }

    /// Poll until `stop` flips to `true` (or its sender is dropped).
    ///
    /// Runs one pass immediately so jobs that came due while no worker was
    /// running are picked up at startup. A pass in progress always finishes
    /// before the loop observes the stop signal.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(cadence = ?self.cadence, "poller started");
        self.poll_once().await;

        loop {
            if *stop.borrow() {
                break;
            }
            let delay = self.cadence.delay_from(Utc::now());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.poll_once().await;
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!("poller stopped");
    }
}
