use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, info};

use crate::error::Result;
use crate::service::LockService;

// Both scripts compare the stored token before touching the key, so a holder
// whose lock expired and was re-taken cannot delete or extend the new lock.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const COMPARE_AND_EXPIRE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Redis-backed lock service shared by every worker process.
///
/// Acquisition is `SET key token NX PX ttl`; release and renewal are Lua
/// scripts so the token check and the mutation happen atomically server-side.
#[derive(Clone)]
pub struct RedisLockService {
    conn: ConnectionManager,
    release: Script,
    extend: Script,
}

impl RedisLockService {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`). The connection
    /// manager reconnects transparently after transient failures.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(url, "connected to redis lock service");
        Ok(Self {
            conn,
            release: Script::new(COMPARE_AND_DELETE),
            extend: Script::new(COMPARE_AND_EXPIRE),
        })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis.
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LockService for RedisLockService {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        let acquired = reply.is_some();
        debug!(key, acquired, "redis lock acquire");
        Ok(acquired)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let token: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(token)
    }

    async fn renew(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .extend
            .key(key)
            .arg(token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }
}
