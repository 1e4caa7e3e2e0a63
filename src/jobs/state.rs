//! Job state and its lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::JobError;
use crate::workflow::JsonMap;

/// One `{type, url}` input of a job request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputItem {
    #[serde(rename = "type")]
    pub input_type: String,
    pub url: String,
}

/// Job lifecycle: `pending → processing → {completed | failed | cancelled}`.
/// Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the service tracks about one job. Single writer: the job
/// manager.
#[derive(Debug, Clone, Serialize)]
pub struct JobState {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub model: String,
    pub input: Vec<InputItem>,
    pub webhook_url: Option<String>,
    pub options: JsonMap,
    pub pod_id: String,
    pub pod_url: String,
    pub workflow_task_id: Option<String>,
    pub output_url: Option<String>,
    pub local_url: Option<String>,
    pub output_wasabi_url: Option<String>,
    pub error: Option<String>,
}

impl JobState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        model: String,
        input: Vec<InputItem>,
        options: JsonMap,
        webhook_url: Option<String>,
        pod_id: String,
        pod_url: String,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            completed_at: None,
            status: JobStatus::Pending,
            model,
            input,
            webhook_url,
            options,
            pod_id,
            pod_url,
            workflow_task_id: None,
            output_url: None,
            local_url: None,
            output_wasabi_url: None,
            error: None,
        }
    }

    /// Move to the next status. Terminal states reject every transition.
    pub fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if self.status.is_terminal() {
            return Err(JobError::InvalidTransition(self.status.to_string()));
        }
        self.status = next;
        Ok(())
    }

    /// The webhook body posted to the user on every status transition.
    ///
    /// Derived solely from this state; the output URL fields are always
    /// present, null until produced.
    pub fn webhook_payload(&self) -> Value {
        json!({
            "id": self.id,
            "created_at": self.created_at.to_rfc3339(),
            "status": self.status,
            "model": self.model,
            "input": self.input,
            "webhook_url": self.webhook_url,
            "options": self.options,
            "stream": false,
            "output_url": self.output_url,
            "local_url": self.local_url,
            "output_wasabi_url": self.output_wasabi_url,
            "error": self.error,
        })
    }
}
