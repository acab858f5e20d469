//! `cadence-store`: SQLite-backed persistence for jobs and their audit log.
//!
//! The [`JobStore`] trait is what the scheduler consumes; [`SqliteJobStore`]
//! is the production implementation. Claiming due jobs runs inside a single
//! `BEGIN IMMEDIATE` transaction so concurrent workers sharing one database
//! file never claim the same row twice.

pub mod db;
pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{JobStore, SqliteJobStore};
