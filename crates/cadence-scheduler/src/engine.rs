use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_core::CadenceConfig;
use cadence_lock::LockService;
use cadence_store::JobStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::executor::JobExecutor;
use crate::metrics::MetricsRecorder;
use crate::outcome::{OutcomeHandler, RetryBackoff};
use crate::poller::{PollCadence, PollReport, Poller};
use crate::shutdown::{ActiveJobs, ShutdownCoordinator};

/// Runtime knobs for [`SchedulerEngine`], usually derived from [`CadenceConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cadence: PollCadence,
    pub lock_ttl: Duration,
    pub renew_interval: Option<Duration>,
    pub retry_backoff: RetryBackoff,
    pub drain_poll: Duration,
}

impl EngineConfig {
    pub fn from_config(config: &CadenceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cadence: PollCadence::from_config(&config.poll)?,
            lock_ttl: config.lock.ttl(),
            renew_interval: config.lock.renew_interval(),
            retry_backoff: RetryBackoff::new(Duration::from_secs(config.jobs.retry_backoff_secs)),
            drain_poll: Duration::from_millis(config.shutdown.drain_poll_ms),
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let config = CadenceConfig::default();
        Self {
            cadence: PollCadence::Interval(Duration::from_secs(config.poll.interval_secs)),
            lock_ttl: config.lock.ttl(),
            renew_interval: None,
            retry_backoff: RetryBackoff::immediate(),
            drain_poll: Duration::from_millis(config.shutdown.drain_poll_ms),
        }
    }
}

struct Running {
    stop_tx: watch::Sender<bool>,
    poller: JoinHandle<()>,
}

/// One worker's scheduling engine: a poll loop plus the dispatch, outcome
/// and shutdown machinery behind it.
///
/// Any number of engines (in one process or many) may share a store and a
/// lock service; the claim transaction and per-job locks keep each due job
/// executing once.
pub struct SchedulerEngine {
    poller: Poller,
    active: ActiveJobs,
    coordinator: ShutdownCoordinator,
    running: Mutex<Option<Running>>,
}

impl SchedulerEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        locks: Arc<dyn LockService>,
        executor: Arc<dyn JobExecutor>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        let active = ActiveJobs::new();
        let outcomes = OutcomeHandler::new(Arc::clone(&store), metrics, config.retry_backoff);
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            locks,
            executor,
            outcomes,
            active.clone(),
            config.lock_ttl,
        )
        .with_renewal(config.renew_interval);

        Self {
            poller: Poller::new(store, dispatcher, config.cadence),
            coordinator: ShutdownCoordinator::new(active.clone(), config.drain_poll),
            active,
            running: Mutex::new(None),
        }
    }

    /// Spawn the poll loop. Its first pass runs immediately, catching up on
    /// anything that came due while no worker was up.
    ///
    /// Must be called from within a Tokio runtime. Calling it while already
    /// running is a no-op.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if running.is_some() {
            warn!("scheduler engine already started");
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let poller = tokio::spawn(self.poller.clone().run(stop_rx));
        *running = Some(Running { stop_tx, poller });
        info!("scheduler engine started");
    }

    /// Stop polling, then wait for every in-flight job to finish its outcome
    /// and lock release. No new job starts once this is called.
    ///
    /// Safe to call more than once, or without a prior `start`.
    pub async fn shutdown(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        if let Some(Running { stop_tx, poller }) = running {
            info!("scheduler engine shutting down");
            // The receiver only disappears if the poller already exited.
            let _ = stop_tx.send(true);
            if let Err(e) = poller.await {
                error!("poller task ended abnormally: {e}");
            }
        }

        self.coordinator.drain().await;
        info!("scheduler engine stopped");
    }

    /// Run a single poll pass outside the loop. Does nothing unless the
    /// engine is running.
    ///
    /// The pass counts as in-flight work, so a concurrent `shutdown` drains
    /// it along with whatever it dispatches.
    pub async fn poll_once(&self) -> PollReport {
        let _pass = {
            let running = self.running.lock().unwrap_or_else(|p| p.into_inner());
            if running.is_none() {
                debug!("scheduler engine not running, skipping poll pass");
                return PollReport::default();
            }
            self.active.enter()
        };
        self.poller.poll_once().await
    }

    pub fn active_jobs(&self) -> usize {
        self.active.count()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }
}
