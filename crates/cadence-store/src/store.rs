use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use cadence_core::types::{format_ts, parse_ts};
use cadence_core::{Job, JobLog, JobPatch, JobStatus, LogStatus, Recurrence};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, StoreError};

/// Repository over job rows and their append-only log.
///
/// Implementations must make [`JobStore::claim_due_jobs`] atomic across every
/// process sharing the backing datastore.
pub trait JobStore: Send + Sync {
    /// Select every pending job that is due at `now`, mark it running, and
    /// return the pre-update snapshots, all in one transaction. A job is due
    /// once `retry_at` has passed, or `scheduled_at` when no retry is pending.
    fn claim_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>>;

    /// Apply `patch` to the job and return the updated row.
    fn update_job(&self, id: &str, patch: &JobPatch) -> Result<Job>;

    fn insert_job(&self, job: &Job) -> Result<Job>;

    /// Append an audit entry. Fails with `NotFound` if the job does not exist.
    fn append_log(&self, job_id: &str, status: LogStatus, message: &str) -> Result<JobLog>;

    fn get_job(&self, id: &str) -> Result<Option<Job>>;

    fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>>;

    fn list_logs(&self, job_id: &str) -> Result<Vec<JobLog>>;

    /// External management only; the engine never deletes jobs.
    fn delete_job(&self, id: &str) -> Result<()>;
}

const JOB_COLUMNS: &str = "id, name, payload, status, scheduled_at, recurrence, retry_count,
     max_retries, dead_lettered, last_executed_at, created_at, updated_at, retry_at";

/// SQLite implementation of [`JobStore`].
///
/// Wraps one connection in a `Mutex`. Several workers may each open their own
/// store on the same database file; cross-process exclusion comes from
/// SQLite's write lock, not from this mutex.
pub struct SqliteJobStore {
    db: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Wrap an already-open connection, enabling foreign keys and creating
    /// the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (or create) the database file at `path`.
    ///
    /// `busy_timeout` bounds how long a claim waits while another worker's
    /// claim transaction holds the write lock.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!(path = %path.display(), "job store opened");
        Self::new(conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl JobStore for SqliteJobStore {
    #[instrument(skip(self))]
    fn claim_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let now_str = format_ts(now);
        let mut db = self.conn()?;

        // IMMEDIATE takes the database write lock before the SELECT, so a
        // second claimer blocks here until we commit and then no longer sees
        // these rows as pending.
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let due: Vec<Job> = {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE status = 'pending' AND COALESCE(retry_at, scheduled_at) <= ?1
                 ORDER BY COALESCE(retry_at, scheduled_at)"
            ))?;
            let rows = stmt.query_map([&now_str], row_to_job)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        if !due.is_empty() {
            let mut update = tx.prepare_cached(
                "UPDATE jobs SET status = 'running', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
            )?;
            for job in &due {
                update.execute(rusqlite::params![now_str, job.id])?;
            }
        }

        tx.commit()?;

        if !due.is_empty() {
            debug!(count = due.len(), "claimed due jobs");
        }
        Ok(due)
    }

    #[instrument(skip(self, patch))]
    fn update_job(&self, id: &str, patch: &JobPatch) -> Result<Job> {
        let mut sets: Vec<&'static str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(ref name) = patch.name {
            sets.push("name");
            values.push(Value::Text(name.clone()));
        }
        if let Some(ref payload) = patch.payload {
            sets.push("payload");
            values.push(Value::Text(serde_json::to_string(payload)?));
        }
        if let Some(status) = patch.status {
            sets.push("status");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(at) = patch.scheduled_at {
            sets.push("scheduled_at");
            values.push(Value::Text(format_ts(at)));
        }
        if let Some(ref recurrence) = patch.recurrence {
            sets.push("recurrence");
            values.push(Value::Text(recurrence.as_str().to_string()));
        }
        if let Some(at) = patch.retry_at {
            sets.push("retry_at");
            values.push(at.map(format_ts).map(Value::Text).unwrap_or(Value::Null));
        }
        if let Some(n) = patch.retry_count {
            sets.push("retry_count");
            values.push(Value::Integer(n as i64));
        }
        if let Some(n) = patch.max_retries {
            sets.push("max_retries");
            values.push(Value::Integer(n as i64));
        }
        if let Some(flag) = patch.dead_lettered {
            sets.push("dead_lettered");
            values.push(Value::Integer(flag as i64));
        }
        if let Some(at) = patch.last_executed_at {
            sets.push("last_executed_at");
            values.push(at.map(format_ts).map(Value::Text).unwrap_or(Value::Null));
        }
        sets.push("updated_at");
        values.push(Value::Text(format_ts(Utc::now())));

        let assignments = sets
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{col} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE jobs SET {assignments} WHERE id = ?{}",
            values.len() + 1
        );
        values.push(Value::Text(id.to_string()));

        let db = self.conn()?;
        let n = db.execute(&sql, rusqlite::params_from_iter(values.iter()))?;
        if n == 0 {
            return Err(StoreError::not_found(id));
        }
        fetch_job(&db, id)?.ok_or_else(|| StoreError::not_found(id))
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    fn insert_job(&self, job: &Job) -> Result<Job> {
        let payload = serde_json::to_string(&job.payload)?;
        let db = self.conn()?;
        db.execute(
            "INSERT INTO jobs
             (id, name, payload, status, scheduled_at, recurrence, retry_count,
              max_retries, dead_lettered, last_executed_at, created_at, updated_at,
              retry_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                job.id,
                job.name,
                payload,
                job.status.as_str(),
                format_ts(job.scheduled_at),
                job.recurrence.as_str(),
                job.retry_count,
                job.max_retries,
                job.dead_lettered,
                job.last_executed_at.map(format_ts),
                format_ts(job.created_at),
                format_ts(job.updated_at),
                job.retry_at.map(format_ts),
            ],
        )?;
        debug!(name = %job.name, scheduled_at = %job.scheduled_at, "job inserted");
        Ok(job.clone())
    }

    #[instrument(skip(self, message))]
    fn append_log(&self, job_id: &str, status: LogStatus, message: &str) -> Result<JobLog> {
        let db = self.conn()?;
        let exists = db
            .query_row("SELECT 1 FROM jobs WHERE id = ?1", [job_id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(StoreError::not_found(job_id));
        }

        let log = JobLog {
            id: Uuid::now_v7().to_string(),
            job_id: job_id.to_string(),
            status,
            message: message.to_string(),
            logged_at: Utc::now(),
        };
        db.execute(
            "INSERT INTO job_logs (id, job_id, status, message, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                log.id,
                log.job_id,
                log.status.as_str(),
                log.message,
                format_ts(log.logged_at)
            ],
        )?;
        Ok(log)
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let db = self.conn()?;
        fetch_job(&db, id)
    }

    fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let db = self.conn()?;
        let jobs = match status {
            Some(status) => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY scheduled_at"
                ))?;
                let rows = stmt.query_map([status.as_str()], row_to_job)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = db.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY scheduled_at"
                ))?;
                let rows = stmt.query_map([], row_to_job)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(jobs)
    }

    fn list_logs(&self, job_id: &str) -> Result<Vec<JobLog>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, job_id, status, message, logged_at FROM job_logs
             WHERE job_id = ?1 ORDER BY logged_at, id",
        )?;
        let rows = stmt.query_map([job_id], row_to_log)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[instrument(skip(self))]
    fn delete_job(&self, id: &str) -> Result<()> {
        let db = self.conn()?;
        let n = db.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::not_found(id));
        }
        info!(job_id = %id, "job deleted");
        Ok(())
    }
}

fn fetch_job(db: &Connection, id: &str) -> Result<Option<Job>> {
    let job = db
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            [id],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_err(idx, e))
}

fn optional_ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_ts(&raw).map(Some).map_err(|e| conversion_err(idx, e)),
        None => Ok(None),
    }
}

/// Map a SQLite row (selected with `JOB_COLUMNS`) to a `Job`.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let payload_raw: String = row.get(2)?;
    let payload = serde_json::from_str(&payload_raw).map_err(|e| conversion_err(2, e))?;
    let status_raw: String = row.get(3)?;
    let status: JobStatus = status_raw.parse().map_err(|e: String| conversion_err(3, e))?;
    let recurrence_raw: String = row.get(5)?;
    let last_executed_at = optional_ts_column(row, 9)?;
    let retry_count = row.get::<_, i64>(6)?;
    let max_retries = row.get::<_, i64>(7)?;

    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        payload,
        status,
        scheduled_at: ts_column(row, 4)?,
        recurrence: Recurrence::from(recurrence_raw.as_str()),
        retry_at: optional_ts_column(row, 12)?,
        retry_count: u32::try_from(retry_count).map_err(|e| conversion_err(6, e))?,
        max_retries: u32::try_from(max_retries).map_err(|e| conversion_err(7, e))?,
        dead_lettered: row.get(8)?,
        last_executed_at,
        created_at: ts_column(row, 10)?,
        updated_at: ts_column(row, 11)?,
    })
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobLog> {
    let status_raw: String = row.get(2)?;
    Ok(JobLog {
        id: row.get(0)?,
        job_id: row.get(1)?,
        status: status_raw.parse().map_err(|e: String| conversion_err(2, e))?,
        message: row.get(3)?,
        logged_at: ts_column(row, 4)?,
    })
}
