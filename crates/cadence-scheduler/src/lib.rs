//! `cadence-scheduler`: the worker-side engine that turns persisted job rows
//! into executions.
//!
//! # Overview
//!
//! Each [`SchedulerEngine`] runs a [`poller::Poller`] that, on a fixed
//! interval or a cron cadence, claims every due `pending` job inside one
//! store transaction. Each claimed job goes to the [`dispatcher::Dispatcher`],
//! which takes the `job-lock:<id>` key with a fresh token, runs the
//! user-supplied [`JobExecutor`], records the outcome and releases the lock
//! only if the token still matches.
//!
//! # Outcomes
//!
//! | Outcome                      | Job row                                      |
//! |------------------------------|----------------------------------------------|
//! | Success                      | `completed`, retries reset, successor row if recurring |
//! | Failure, retries remain      | back to `pending`, `retry_count + 1`         |
//! | Failure, retries exhausted   | `failed`, `dead_lettered = true`             |
//!
//! Shutdown stops the poller first, then waits for the active-job count to
//! reach zero.

pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod outcome;
pub mod poller;
pub mod recurrence;
pub mod shutdown;

#[cfg(test)]
mod testing;

pub use dispatcher::{Dispatch, Dispatcher};
pub use engine::{EngineConfig, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use executor::{ExecutionOutcome, JobExecutor};
pub use metrics::{CounterSnapshot, JobCounters, MetricsRecorder};
pub use outcome::{OutcomeHandler, RetryBackoff, Verdict};
pub use poller::{PollCadence, PollReport, Poller};
pub use shutdown::{ActiveJobs, ShutdownCoordinator};
