//! Request/response payload types for the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{GraphError, JobError};
use crate::jobs::InputItem;
use crate::workflow::{GraphDefinition, JsonMap};

/// Body of `POST /v1/jobs/generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    #[serde(default)]
    pub input: Vec<InputItem>,
    #[serde(default)]
    pub options: JsonMap,
    #[serde(default, alias = "webhookUrl")]
    pub webhook_url: Option<String>,
    /// Caller-supplied job id; a fresh UUID is assigned when absent.
    #[serde(default)]
    pub id: Option<String>,
}

/// Body of `POST /v1/workflow/execute`.
#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    pub workflow: GraphDefinition,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Body of the internal `POST /v1/workflow/webhook/{job_id}`.
#[derive(Debug, Deserialize)]
pub struct WorkflowWebhook {
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Error response: `{"detail": ...}` with the mapped status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"detail": self.message}))).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        let status = match &e {
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::InvalidTransition(_)
            | JobError::Catalog(_)
            | JobError::Graph(_)
            | JobError::Workflow(_) => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<GraphError> for ApiError {
    fn from(e: GraphError) -> Self {
        Self::bad_request(e.to_string())
    }
}
