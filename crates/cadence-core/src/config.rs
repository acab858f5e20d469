use std::str::FromStr;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_LOCK_TTL_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_DRAIN_POLL_MS: u64 = 100;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub jobs: JobDefaults,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// How long a claim transaction waits on another worker's write lock.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Due-job poll cadence. A cron `schedule`, when set, takes precedence over
/// `interval_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    /// Cron expression in `cron` crate syntax (seconds field first),
    /// e.g. `"0 * * * * *"` for the top of every minute.
    #[serde(default)]
    pub schedule: Option<String>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            schedule: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LockBackend {
    /// Shared Redis instance. Required when more than one worker process runs.
    Redis,
    /// Process-local map. Only safe for a single worker.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_lock_backend")]
    pub backend: LockBackend,
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Must exceed the worst-case executor runtime unless renewal is enabled.
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: u64,
    /// When set, held locks are re-extended at this cadence while a job runs.
    #[serde(default)]
    pub renew_interval_secs: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: default_lock_backend(),
            url: default_redis_url(),
            ttl_secs: DEFAULT_LOCK_TTL_SECS,
            renew_interval_secs: None,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn renew_interval(&self) -> Option<Duration> {
        self.renew_interval_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefaults {
    /// Applied to jobs created without an explicit ceiling.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay before a failed job becomes eligible again. 0 = next poll.
    #[serde(default)]
    pub retry_backoff_secs: u64,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_drain_poll_ms")]
    pub drain_poll_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_poll_ms: DEFAULT_DRAIN_POLL_MS,
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}
fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_lock_backend() -> LockBackend {
    LockBackend::Redis
}
fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}
fn default_lock_ttl_secs() -> u64 {
    DEFAULT_LOCK_TTL_SECS
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_drain_poll_ms() -> u64 {
    DEFAULT_DRAIN_POLL_MS
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `CADENCE_LOCK__TTL_SECS=60`
    /// or `CADENCE_POLL__SCHEDULE="0 */5 * * * *"`. A missing file is not an
    /// error; defaults fill every gap.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let config = Self::extract(config_path)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge defaults, file and environment without validating the result.
    /// Fails only when a source cannot be read or parsed.
    pub fn extract(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Figment::from(Serialized::defaults(CadenceConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| CadenceError::Config(e.to_string()))
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_secs == 0 {
            return Err(CadenceError::Config(
                "poll.interval_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(ref expr) = self.poll.schedule {
            cron::Schedule::from_str(expr)
                .map_err(|e| CadenceError::InvalidSchedule(format!("{expr}: {e}")))?;
        }
        if self.lock.ttl_secs == 0 {
            return Err(CadenceError::Config(
                "lock.ttl_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(renew) = self.lock.renew_interval_secs {
            if renew == 0 || renew >= self.lock.ttl_secs {
                return Err(CadenceError::Config(format!(
                    "lock.renew_interval_secs ({renew}) must be between 1 and ttl_secs ({})",
                    self.lock.ttl_secs
                )));
            }
        }
        if self.shutdown.drain_poll_ms == 0 {
            return Err(CadenceError::Config(
                "shutdown.drain_poll_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
