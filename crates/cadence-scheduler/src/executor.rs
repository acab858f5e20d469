use async_trait::async_trait;
use cadence_core::Job;

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    Failure(String),
}

impl ExecutionOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        ExecutionOutcome::Failure(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for ExecutionOutcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => ExecutionOutcome::Success,
            Err(e) => ExecutionOutcome::Failure(e.to_string()),
        }
    }
}

/// The work a job performs, supplied by the embedding application.
///
/// The engine knows nothing about payload semantics. Implementations should
/// finish well within the lock TTL; a panic is recorded as a failure.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> ExecutionOutcome;
}
