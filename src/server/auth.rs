//! API-key authentication middleware.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;

use crate::server::AppState;

/// Reject requests whose `X-API-Key` header does not match the shared
/// secret. Applied as a route_layer on every authenticated route.
///
/// The comparison is constant-time over the secret bytes.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());

    let expected = state.settings.api_key.expose_secret();
    match provided {
        Some(key) if bool::from(expected.as_bytes().ct_eq(key.as_bytes())) => {
            next.run(request).await
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({"detail": "Invalid API key"})),
        )
            .into_response(),
    }
}
