use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a persisted job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `scheduled_at` to arrive (or re-eligible after a failed attempt).
    Pending,
    /// Claimed by a poller; owned by whichever worker holds the job lock.
    Running,
    /// Last execution succeeded.
    Completed,
    /// Retries exhausted; see `Job::dead_lettered`.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Recurrence rule attached to a job.
///
/// Rules are matched case-insensitively. Anything not understood is kept
/// verbatim in `Other` so it round-trips through storage untouched; such jobs
/// never produce a successor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
    Other(String),
}

impl Recurrence {
    pub fn as_str(&self) -> &str {
        match self {
            Recurrence::None => "none",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Other(raw) => raw,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Recurrence::None)
    }
}

impl std::fmt::Display for Recurrence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Recurrence {
    fn from(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "none" => Recurrence::None,
            "daily" => Recurrence::Daily,
            "weekly" => Recurrence::Weekly,
            _ => Recurrence::Other(trimmed.to_string()),
        }
    }
}

impl Serialize for Recurrence {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Recurrence {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Recurrence::from(raw.as_str()))
    }
}

/// A persisted job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// UUID v7 string, primary key. Successor rows always get a fresh one.
    pub id: String,
    pub name: String,
    /// Opaque JSON interpreted only by the executor.
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Recurrence anchor. Never moved by retries.
    pub scheduled_at: DateTime<Utc>,
    pub recurrence: Recurrence,
    /// Earliest instant a backed-off retry may be claimed. When set it
    /// takes the place of `scheduled_at` for due-ness.
    #[serde(default)]
    pub retry_at: Option<DateTime<Utc>>,
    /// Failed attempts since the last success.
    pub retry_count: u32,
    pub max_retries: u32,
    /// Terminal failure marker. Dead-lettered jobs are never picked up again.
    pub dead_lettered: bool,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh pending job with a new identity.
    pub fn new(
        name: impl Into<String>,
        payload: serde_json::Value,
        scheduled_at: DateTime<Utc>,
        recurrence: Recurrence,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            payload,
            status: JobStatus::Pending,
            scheduled_at,
            recurrence,
            retry_at: None,
            retry_count: 0,
            max_retries,
            dead_lettered: false,
            last_executed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Next instance of a recurring job: same definition, new identity,
    /// pending, retry/dead-letter state reset.
    pub fn successor(&self, scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Job::new(
            self.name.clone(),
            self.payload.clone(),
            scheduled_at,
            self.recurrence.clone(),
            self.max_retries,
            now,
        )
    }

    /// Distributed lock key guarding execution of this job.
    pub fn lock_key(&self) -> String {
        lock_key(&self.id)
    }
}

/// `job-lock:<job-id>`
pub fn lock_key(job_id: &str) -> String {
    format!("job-lock:{job_id}")
}

/// Partial update applied by `JobStore::update_job`. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub name: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub status: Option<JobStatus>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    /// Outer `Some` means "write this column"; inner `None` clears it.
    pub retry_at: Option<Option<DateTime<Utc>>>,
    pub retry_count: Option<u32>,
    pub max_retries: Option<u32>,
    pub dead_lettered: Option<bool>,
    pub last_executed_at: Option<Option<DateTime<Utc>>>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Status recorded on a `JobLog` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Started,
    Completed,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Started => "started",
            LogStatus::Completed => "completed",
            LogStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "started" => Ok(LogStatus::Started),
            "completed" => Ok(LogStatus::Completed),
            "failed" => Ok(LogStatus::Failed),
            other => Err(format!("unknown log status: {other}")),
        }
    }
}

/// Append-only audit record of a job transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLog {
    pub id: String,
    pub job_id: String,
    pub status: LogStatus,
    pub message: String,
    pub logged_at: DateTime<Utc>,
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}
