//! HTTP surface: router assembly and the server entry point.

pub mod auth;
pub mod routes;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::callback::CallbackCoordinator;
use crate::config::Settings;
use crate::jobs::JobManager;
use crate::registry::NodeRegistry;
use crate::storage::FileStore;
use crate::workflow::WorkflowManager;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jobs: Arc<JobManager>,
    pub workflows: Arc<WorkflowManager>,
    pub coordinator: Arc<CallbackCoordinator>,
    pub registry: Arc<NodeRegistry>,
    pub files: Arc<FileStore>,
}

/// Build the full application router.
///
/// Authenticated routes sit behind the API-key route_layer; webhook,
/// health, and file routes are open (remote services and probes don't hold
/// the shared key).
pub fn router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/v1/jobs/generate", post(routes::jobs::generate))
        .route("/cancel/{job_id}", post(routes::jobs::cancel))
        .route("/purge-queue", post(routes::jobs::purge_queue))
        .route("/v1/workflow/execute", post(routes::workflow::execute))
        .route("/v1/workflow/cancel/{task_id}", post(routes::workflow::cancel))
        .route("/v1/workflow/status/{task_id}", get(routes::workflow::status))
        .route("/v1/workflow/nodes", get(routes::workflow::nodes))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    let open = Router::new()
        .route("/webhook", post(routes::webhook::service_webhook))
        .route(
            "/v1/workflow/webhook/{job_id}",
            post(routes::webhook::workflow_webhook),
        )
        .route("/health", get(routes::health::health))
        .route("/ready", get(routes::health::ready))
        .route("/files/{file_id}", get(routes::files::get_file))
        .route("/files/{file_id}/info", get(routes::files::file_info));

    Router::new()
        .merge(authenticated)
        .merge(open)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
