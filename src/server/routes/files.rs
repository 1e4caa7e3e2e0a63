//! Read-only file serving for generated outputs.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::server::AppState;
use crate::server::types::ApiError;
use crate::storage::FileInfo;

pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    let path = state
        .files
        .path(&file_id)
        .await
        .ok_or_else(|| ApiError::not_found("File not found or expired"))?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ApiError::not_found("File not found or expired"))?;

    let content_type = mime_guess::from_path(&path).first_or_octet_stream();
    Ok((
        [(header::CONTENT_TYPE, content_type.to_string())],
        bytes::Bytes::from(bytes),
    )
        .into_response())
}

pub async fn file_info(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<FileInfo>, ApiError> {
    let info = state
        .files
        .info(&file_id)
        .await
        .ok_or_else(|| ApiError::not_found("File not found or expired"))?;
    Ok(Json(info))
}
