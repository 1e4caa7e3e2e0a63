//! Standalone workflow execution routes.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};
use tracing::error;

use crate::server::AppState;
use crate::server::types::{ApiError, WorkflowRequest};
use crate::workflow::TaskReport;

pub async fn execute(
    State(state): State<AppState>,
    Json(request): Json<WorkflowRequest>,
) -> Result<Json<Value>, ApiError> {
    let task_id = state
        .workflows
        .execute(&request.workflow, request.webhook_url, None)
        .await
        .map_err(|e| {
            error!("Error executing workflow: {}", e);
            ApiError::from(e)
        })?;

    Ok(Json(json!({"task_id": task_id, "status": "accepted"})))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.workflows.cancel(&task_id).await {
        return Err(ApiError::not_found("Workflow task not found"));
    }
    Ok(Json(json!({"task_id": task_id, "status": "cancelled"})))
}

pub async fn status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskReport>, ApiError> {
    let report = state.workflows.status(&task_id).await;
    if report.status == "not_found" {
        return Err(ApiError::not_found("Workflow task not found"));
    }
    Ok(Json(report))
}

/// Enumerate registered node types with their port schemas. Served from
/// the registry's static descriptors; nothing is instantiated.
pub async fn nodes(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "nodes": state.registry.descriptors(),
        "categories": state.registry.categories(),
    }))
}
