use thiserror::Error;

/// Errors raised by the job store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error. Treated as transient by the engine.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No job with the given ID exists.
    #[error("Job not found: {id}")]
    NotFound { id: String },

    /// Payload could not be encoded for storage.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A previous holder of the connection mutex panicked.
    #[error("Connection lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn not_found(id: &str) -> Self {
        StoreError::NotFound { id: id.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
