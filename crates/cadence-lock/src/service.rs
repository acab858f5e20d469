use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Shared key-value lock service used to keep two workers from executing
/// the same job at once.
///
/// Every operation is non-blocking: a held key makes `try_acquire` return
/// `false` immediately rather than wait.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Set `key = token` with expiry `ttl` only if `key` is absent (or expired).
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if it still holds `expected`. Returns whether a
    /// delete happened; `false` means the lock expired or changed hands.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// Current owner token, if the key is held.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Push the expiry of `key` out to `ttl` from now, only if it still
    /// holds `token`.
    async fn renew(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;
}

/// Fresh opaque owner token for one acquisition attempt.
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}
