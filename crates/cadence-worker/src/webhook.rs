use std::time::Duration;

use async_trait::async_trait;
use cadence_core::Job;
use cadence_scheduler::{ExecutionOutcome, JobExecutor};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// `payload.webhook` section of a job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WebhookTarget {
    pub url: String,
    /// JSON body to POST. Defaults to `{"job_id", "name"}`.
    #[serde(default)]
    pub body: Option<Value>,
}

/// Extract the webhook section, if any. A present but malformed section is
/// an error so the job fails visibly instead of silently succeeding.
pub fn webhook_of(payload: &Value) -> Result<Option<WebhookTarget>, String> {
    match payload.get("webhook") {
        None | Some(Value::Null) => Ok(None),
        Some(section) => serde_json::from_value(section.clone())
            .map(Some)
            .map_err(|e| format!("invalid webhook payload: {e}")),
    }
}

/// Default executor for the worker binary: POSTs to the job's webhook and
/// treats any 2xx as success. Jobs without a webhook succeed after logging.
pub struct WebhookExecutor {
    client: reqwest::Client,
}

impl WebhookExecutor {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("webhook client builder failed ({e}), using defaults");
                reqwest::Client::new()
            });
        Self { client }
    }
}

impl Default for WebhookExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobExecutor for WebhookExecutor {
    async fn execute(&self, job: &Job) -> ExecutionOutcome {
        let target = match webhook_of(&job.payload) {
            Ok(Some(target)) => target,
            Ok(None) => {
                info!(job_id = %job.id, name = %job.name, payload = %job.payload, "job fired (no webhook configured)");
                return ExecutionOutcome::Success;
            }
            Err(e) => return ExecutionOutcome::Failure(e),
        };

        let body = target
            .body
            .unwrap_or_else(|| json!({ "job_id": job.id, "name": job.name }));
        debug!(job_id = %job.id, url = %target.url, "posting webhook");

        let resp = match self.client.post(&target.url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => return ExecutionOutcome::failure(format!("webhook request failed: {e}")),
        };

        let status = resp.status();
        if status.is_success() {
            ExecutionOutcome::Success
        } else {
            let text = resp.text().await.unwrap_or_default();
            ExecutionOutcome::failure(format!("webhook returned {status}: {text}"))
        }
    }
}
