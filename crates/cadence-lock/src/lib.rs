//! `cadence-lock`: TTL-bounded, token-owned mutual exclusion keys.
//!
//! | Backend               | Scope                                   |
//! |-----------------------|-----------------------------------------|
//! | [`RedisLockService`]  | Every worker sharing one Redis instance |
//! | [`MemoryLockService`] | A single process (tests, solo worker)   |

pub mod error;
pub mod memory;
pub mod redis_lock;
pub mod service;

pub use error::{LockError, Result};
pub use memory::MemoryLockService;
pub use redis_lock::RedisLockService;
pub use service::{new_token, LockService};
