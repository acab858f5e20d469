use thiserror::Error;

/// Lock service failures. Contention is *not* an error: `try_acquire`
/// simply returns `false`.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Lock service unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, LockError>;
