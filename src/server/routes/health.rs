//! Health and readiness probes.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::jobs::HealthReport;
use crate::server::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.jobs.health().await)
}

pub async fn ready() -> Json<Value> {
    Json(json!({"ready": true}))
}
