use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid poll schedule: {0}")]
    InvalidSchedule(String),
}

pub type Result<T> = std::result::Result<T, CadenceError>;
