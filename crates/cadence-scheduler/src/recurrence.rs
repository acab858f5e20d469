use cadence_core::{Job, Recurrence};
use cadence_store::JobStore;
use chrono::{DateTime, Days, Utc};
use tracing::{debug, info};

use crate::error::Result;

/// Next occurrence for `rule`, counted from the job's own `scheduled_at`
/// rather than from when it actually ran. `None` for non-recurring or
/// unrecognised rules.
pub fn next_occurrence(scheduled_at: DateTime<Utc>, rule: &Recurrence) -> Option<DateTime<Utc>> {
    match rule {
        Recurrence::Daily => scheduled_at.checked_add_days(Days::new(1)),
        Recurrence::Weekly => scheduled_at.checked_add_days(Days::new(7)),
        Recurrence::None | Recurrence::Other(_) => None,
    }
}

/// Insert the successor row for a successfully executed recurring job.
///
/// The original row is left untouched. Returns the new job, or `None` if the
/// rule produces no further occurrence.
pub fn reschedule(store: &dyn JobStore, job: &Job, now: DateTime<Utc>) -> Result<Option<Job>> {
    let Some(next_at) = next_occurrence(job.scheduled_at, &job.recurrence) else {
        if let Recurrence::Other(ref raw) = job.recurrence {
            debug!(job_id = %job.id, rule = %raw, "unrecognised recurrence rule, not rescheduling");
        }
        return Ok(None);
    };

    let successor = store.insert_job(&job.successor(next_at, now))?;
    info!(
        job_id = %job.id,
        next_job_id = %successor.id,
        scheduled_at = %successor.scheduled_at,
        "recurring job rescheduled"
    );
    Ok(Some(successor))
}
