//! Subcommand handlers. Everything except `run` prints one JSON document
//! per line on stdout.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use cadence_core::config::LockBackend;
use cadence_core::{CadenceConfig, Job, JobPatch, JobStatus, Recurrence};
use cadence_lock::{LockService, MemoryLockService, RedisLockService};
use cadence_scheduler::{EngineConfig, JobCounters, SchedulerEngine};
use cadence_store::{JobStore, SqliteJobStore};

use crate::webhook::WebhookExecutor;

pub async fn run(config: &CadenceConfig, store: Arc<SqliteJobStore>) -> anyhow::Result<()> {
    let locks: Arc<dyn LockService> = match config.lock.backend {
        LockBackend::Redis => Arc::new(
            RedisLockService::connect(&config.lock.url)
                .await
                .with_context(|| format!("connecting to lock service at {}", config.lock.url))?,
        ),
        LockBackend::Memory => {
            warn!("using in-memory lock backend; do not run more than one worker");
            Arc::new(MemoryLockService::new())
        }
    };

    let counters = Arc::new(JobCounters::new());
    let engine = SchedulerEngine::new(
        EngineConfig::from_config(config)?,
        store,
        locks,
        Arc::new(WebhookExecutor::new()),
        counters.clone(),
    );

    engine.start();
    wait_for_signal().await?;
    info!("shutdown signal received");
    engine.shutdown().await;

    let totals = counters.snapshot();
    info!(
        processed = totals.processed,
        failed = totals.failed,
        dead_lettered = totals.dead_lettered,
        "worker stopped"
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

pub fn add(
    store: &dyn JobStore,
    name: &str,
    payload: &str,
    at: Option<&str>,
    recurrence: &str,
    max_retries: u32,
) -> anyhow::Result<()> {
    let job = build_job(name, payload, at, recurrence, max_retries, Utc::now())?;
    let job = store.insert_job(&job)?;
    info!(job_id = %job.id, name = %job.name, scheduled_at = %job.scheduled_at, "job added");
    print_json(&job)
}

pub fn list(store: &dyn JobStore, status: Option<&str>) -> anyhow::Result<()> {
    let status = status
        .map(|s| s.parse::<JobStatus>().map_err(|e| anyhow!(e)))
        .transpose()?;
    for job in store.list_jobs(status)? {
        print_json(&job)?;
    }
    Ok(())
}

pub fn show(store: &dyn JobStore, id: &str) -> anyhow::Result<()> {
    match store.get_job(id)? {
        Some(job) => print_json(&job),
        None => bail!("job {id} not found"),
    }
}

pub fn logs(store: &dyn JobStore, id: &str) -> anyhow::Result<()> {
    if store.get_job(id)?.is_none() {
        bail!("job {id} not found");
    }
    for entry in store.list_logs(id)? {
        print_json(&entry)?;
    }
    Ok(())
}

/// Field edits accepted by `update`. Unset flags leave the column alone.
#[derive(Debug, Default, clap::Args)]
pub struct JobEdits {
    #[arg(long)]
    pub name: Option<String>,
    /// Replacement JSON payload.
    #[arg(long)]
    pub payload: Option<String>,
    /// New RFC 3339 due instant. Also cancels any pending retry backoff.
    #[arg(long)]
    pub at: Option<String>,
    /// none, daily or weekly.
    #[arg(long)]
    pub recurrence: Option<String>,
    #[arg(long)]
    pub max_retries: Option<u32>,
    /// pending, running, completed or failed.
    #[arg(long)]
    pub status: Option<String>,
}

pub fn update(store: &dyn JobStore, id: &str, edits: &JobEdits) -> anyhow::Result<()> {
    let patch = build_patch(edits)?;
    let job = store.update_job(id, &patch)?;
    info!(job_id = %job.id, status = %job.status, "job updated");
    print_json(&job)
}

pub fn remove(store: &dyn JobStore, id: &str) -> anyhow::Result<()> {
    store.delete_job(id)?;
    info!(job_id = %id, "job removed");
    print_json(&serde_json::json!({ "removed": id }))
}

fn build_job(
    name: &str,
    payload: &str,
    at: Option<&str>,
    recurrence: &str,
    max_retries: u32,
    now: DateTime<Utc>,
) -> anyhow::Result<Job> {
    let payload = parse_payload(payload)?;
    let scheduled_at = match at {
        Some(raw) => parse_at(raw)?,
        None => now,
    };
    let recurrence = parse_recurrence(recurrence);
    Ok(Job::new(name, payload, scheduled_at, recurrence, max_retries, now))
}

fn build_patch(edits: &JobEdits) -> anyhow::Result<JobPatch> {
    let scheduled_at = edits.at.as_deref().map(parse_at).transpose()?;
    let patch = JobPatch {
        name: edits.name.clone(),
        payload: edits.payload.as_deref().map(parse_payload).transpose()?,
        status: edits
            .status
            .as_deref()
            .map(|s| s.parse::<JobStatus>().map_err(|e| anyhow!(e)))
            .transpose()?,
        scheduled_at,
        retry_at: scheduled_at.map(|_| None),
        recurrence: edits.recurrence.as_deref().map(parse_recurrence),
        max_retries: edits.max_retries,
        ..JobPatch::default()
    };
    if patch.is_empty() {
        bail!("nothing to update: pass at least one of --name, --payload, --at, --recurrence, --max-retries, --status");
    }
    Ok(patch)
}

fn parse_payload(raw: &str) -> anyhow::Result<serde_json::Value> {
    serde_json::from_str(raw).context("--payload must be valid JSON")
}

fn parse_at(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("--at {raw:?} is not an RFC 3339 timestamp"))?
        .with_timezone(&Utc))
}

fn parse_recurrence(raw: &str) -> Recurrence {
    let recurrence = Recurrence::from(raw);
    if let Recurrence::Other(ref rule) = recurrence {
        warn!(rule = %rule, "unrecognised recurrence rule; the job will not repeat");
    }
    recurrence
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn build_job_defaults_to_now() {
        let job = build_job("ping", "{}", None, "none", 3, now()).unwrap();
        assert_eq!(job.scheduled_at, now());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.recurrence, Recurrence::None);
        assert_eq!(job.max_retries, 3);
    }

    #[test]
    fn build_job_parses_time_payload_and_rule() {
        let job = build_job(
            "report",
            r#"{"webhook":{"url":"http://localhost/x"}}"#,
            Some("2024-03-02T08:30:00+01:00"),
            "Weekly",
            5,
            now(),
        )
        .unwrap();
        assert_eq!(
            job.scheduled_at,
            Utc.with_ymd_and_hms(2024, 3, 2, 7, 30, 0).unwrap()
        );
        assert_eq!(job.recurrence, Recurrence::Weekly);
        assert_eq!(job.payload, json!({ "webhook": { "url": "http://localhost/x" } }));
        assert_eq!(job.max_retries, 5);
    }

    #[test]
    fn build_job_rejects_bad_input() {
        assert!(build_job("x", "{not json", None, "none", 3, now()).is_err());
        assert!(build_job("x", "{}", Some("tomorrow"), "none", 3, now()).is_err());
    }

    #[test]
    fn build_job_keeps_unknown_rule() {
        let job = build_job("x", "{}", None, "monthly", 3, now()).unwrap();
        assert_eq!(job.recurrence, Recurrence::Other("monthly".to_string()));
    }

    fn temp_store() -> (tempfile::TempDir, SqliteJobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            SqliteJobStore::open(dir.path().join("jobs.db"), std::time::Duration::from_secs(1))
                .unwrap();
        (dir, store)
    }

    #[test]
    fn empty_edit_is_rejected() {
        let err = build_patch(&JobEdits::default()).unwrap_err();
        assert!(err.to_string().contains("nothing to update"));
    }

    #[test]
    fn build_patch_maps_each_flag() {
        let patch = build_patch(&JobEdits {
            name: Some("renamed".to_string()),
            payload: Some(r#"{"k":1}"#.to_string()),
            at: Some("2024-03-05T10:00:00Z".to_string()),
            recurrence: Some("daily".to_string()),
            max_retries: Some(7),
            status: Some("pending".to_string()),
        })
        .unwrap();

        assert_eq!(patch.name.as_deref(), Some("renamed"));
        assert_eq!(patch.payload, Some(json!({ "k": 1 })));
        assert_eq!(
            patch.scheduled_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap())
        );
        assert_eq!(patch.retry_at, Some(None));
        assert_eq!(patch.recurrence, Some(Recurrence::Daily));
        assert_eq!(patch.max_retries, Some(7));
        assert_eq!(patch.status, Some(JobStatus::Pending));
        assert_eq!(patch.retry_count, None);
    }

    #[test]
    fn build_patch_rejects_bad_values() {
        let bad_status = JobEdits {
            status: Some("missed".to_string()),
            ..JobEdits::default()
        };
        assert!(build_patch(&bad_status).is_err());

        let bad_payload = JobEdits {
            payload: Some("{nope".to_string()),
            ..JobEdits::default()
        };
        assert!(build_patch(&bad_payload).is_err());
    }

    #[test]
    fn update_changes_only_given_fields() {
        let (_dir, store) = temp_store();
        let job = store
            .insert_job(&build_job("report", r#"{"a":1}"#, None, "none", 3, now()).unwrap())
            .unwrap();

        update(
            &store,
            &job.id,
            &JobEdits {
                name: Some("weekly-report".to_string()),
                recurrence: Some("weekly".to_string()),
                max_retries: Some(5),
                ..JobEdits::default()
            },
        )
        .unwrap();

        let stored = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(stored.name, "weekly-report");
        assert_eq!(stored.recurrence, Recurrence::Weekly);
        assert_eq!(stored.max_retries, 5);
        assert_eq!(stored.payload, json!({ "a": 1 }));
        assert_eq!(stored.scheduled_at, now());
        assert_eq!(stored.status, JobStatus::Pending);
    }

    #[test]
    fn update_of_missing_job_fails() {
        let (_dir, store) = temp_store();
        let edits = JobEdits {
            name: Some("x".to_string()),
            ..JobEdits::default()
        };
        assert!(update(&store, "missing", &edits).is_err());
    }
}
