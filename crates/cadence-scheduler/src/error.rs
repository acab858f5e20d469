use thiserror::Error;

use cadence_core::CadenceError;
use cadence_store::StoreError;

/// Errors surfaced by the scheduling engine.
///
/// Inside the poll loop and dispatch tasks these are logged and swallowed;
/// they only reach callers through construction and one-shot helpers.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] CadenceError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
