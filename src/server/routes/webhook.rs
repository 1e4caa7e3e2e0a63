//! Inbound webhooks: remote-service deliveries and internal workflow
//! completions.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use crate::server::AppState;
use crate::server::types::{ApiError, WorkflowWebhook};

/// Unified webhook endpoint for remote services. Dispatch is by the `id`
/// field alone; unknown ids are logged and acknowledged with 200.
pub async fn service_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    if payload.get("id").and_then(Value::as_str).is_none() {
        return Err(ApiError::bad_request("Missing job ID in webhook data"));
    }

    state.coordinator.handle(payload).await;
    Ok(Json(json!({"status": "success"})))
}

/// Internal callback posted by the workflow layer when a job's workflow
/// reaches a terminal state.
pub async fn workflow_webhook(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(payload): Json<WorkflowWebhook>,
) -> Result<Json<Value>, ApiError> {
    if payload.task_id.is_none() {
        return Err(ApiError::bad_request("Missing task_id in webhook data"));
    }

    state
        .jobs
        .handle_workflow_callback(
            &job_id,
            payload.status.as_deref().unwrap_or("error"),
            payload.result.as_ref(),
            payload.error,
        )
        .await?;
    Ok(Json(json!({"status": "success"})))
}
