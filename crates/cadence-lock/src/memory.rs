use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::debug;

use crate::error::Result;
use crate::service::LockService;

#[derive(Debug, Clone)]
struct Held {
    token: String,
    expires_at: Instant,
}

impl Held {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local lock service.
///
/// Expired entries behave exactly as if the key were absent, matching Redis
/// `PX` semantics. Only suitable when a single worker process runs.
#[derive(Debug, Default)]
pub struct MemoryLockService {
    entries: DashMap<String, Held>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let held = Held {
            token: token.to_string(),
            expires_at: now + ttl,
        };
        // The entry guard holds the shard lock, so check-and-set is atomic.
        let acquired = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                if e.get().live(now) {
                    false
                } else {
                    e.insert(held);
                    true
                }
            }
            Entry::Vacant(e) => {
                e.insert(held);
                true
            }
        };
        debug!(key, acquired, "memory lock acquire");
        Ok(acquired)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let now = Instant::now();
        let removed = self
            .entries
            .remove_if(key, |_, held| held.live(now) && held.token == expected)
            .is_some();
        Ok(removed)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|held| held.live(now))
            .map(|held| held.token.clone()))
    }

    async fn renew(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut held) if held.live(now) && held.token == token => {
                held.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
