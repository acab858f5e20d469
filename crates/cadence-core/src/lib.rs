//! `cadence-core`: shared job types, configuration, and errors for the
//! Cadence scheduler workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use types::{Job, JobLog, JobPatch, JobStatus, LogStatus, Recurrence};
