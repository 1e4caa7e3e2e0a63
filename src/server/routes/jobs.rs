//! Job submission, cancellation, and queue purge.

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};
use tracing::info;

use crate::jobs::JobTicket;
use crate::server::AppState;
use crate::server::types::{ApiError, GenerateRequest};

pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<JobTicket>, ApiError> {
    info!(model = %request.model, inputs = request.input.len(), "New generation request");

    let ticket = state
        .jobs
        .submit(
            request.model,
            request.input,
            request.options,
            request.webhook_url,
            request.id,
        )
        .await?;
    Ok(Json(ticket))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.jobs.cancel(&job_id).await?;
    Ok(Json(json!({"status": "cancelled", "job_id": job_id})))
}

pub async fn purge_queue(State(state): State<AppState>) -> Json<Value> {
    let removed = state.jobs.purge_queue().await;
    Json(json!({"removed": removed, "status": "completed"}))
}
