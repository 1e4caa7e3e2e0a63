//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use serde_json::Value;

use switchyard::callback::CallbackCoordinator;
use switchyard::client::ServiceClient;
use switchyard::config::Settings;
use switchyard::jobs::{JobManager, ModelCatalog};
use switchyard::registry::NodeRegistry;
use switchyard::server::{self, AppState};
use switchyard::storage::FileStore;
use switchyard::workflow::{ExecutionEnv, WorkflowManager};

pub const API_KEY: &str = "test-api-key";

/// An execution environment for library-level workflow tests.
pub fn test_env() -> Arc<ExecutionEnv> {
    Arc::new(ExecutionEnv {
        registry: Arc::new(NodeRegistry::builtin()),
        coordinator: Arc::new(CallbackCoordinator::new()),
        client: ServiceClient::new(SecretString::from(API_KEY), "http://127.0.0.1:0"),
    })
}

/// Write a model catalog with a single model whose workflow is the given
/// definition, and return the catalog path.
pub fn write_catalog(
    dir: &Path,
    model: &str,
    workflow: &Value,
    output_mapping: Value,
) -> PathBuf {
    std::fs::write(
        dir.join("workflow.json"),
        serde_json::to_string_pretty(workflow).unwrap(),
    )
    .unwrap();

    let catalog = serde_json::json!({
        "default_model": model,
        "models": {
            model: {
                "workflow_path": "workflow.json",
                "parameter_mapping": {},
                "input_mapping": {},
                "output_mapping": output_mapping,
                "timeout_minutes": 1
            }
        }
    });
    let path = dir.join("model_config.json");
    std::fs::write(&path, serde_json::to_string_pretty(&catalog).unwrap()).unwrap();
    path
}

/// Build the full application state against a catalog file.
pub fn app_state(service_url: &str, catalog_path: &Path, files_dir: &Path) -> AppState {
    let settings = Arc::new(Settings {
        api_key: SecretString::from(API_KEY),
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        service_url: service_url.trim_end_matches('/').to_string(),
        model_config_path: catalog_path.to_path_buf(),
        files_dir: files_dir.to_path_buf(),
        file_ttl_secs: 3600,
        pod_id: "test-pod".to_string(),
        default_model: None,
    });

    let catalog = Arc::new(ModelCatalog::load(catalog_path, None).unwrap());
    let registry = Arc::new(NodeRegistry::builtin());
    let coordinator = Arc::new(CallbackCoordinator::new());
    let client = ServiceClient::new(
        SecretString::from(API_KEY),
        settings.service_url.clone(),
    );

    let env = Arc::new(ExecutionEnv {
        registry: Arc::clone(&registry),
        coordinator: Arc::clone(&coordinator),
        client: client.clone(),
    });
    let workflows = Arc::new(WorkflowManager::new(env));
    let jobs = Arc::new(JobManager::new(
        Arc::clone(&settings),
        catalog,
        Arc::clone(&workflows),
        client,
    ));
    let files = Arc::new(FileStore::new(files_dir, Duration::from_secs(3600)));

    AppState {
        settings,
        jobs,
        workflows,
        coordinator,
        registry,
        files,
    }
}

/// Serve the full app on an ephemeral port. Binds first so the state's
/// `service_url` (used for the internal workflow webhook and the outbound
/// webhook URL) points at the real address.
pub async fn spawn_app(catalog_path: &Path, files_dir: &Path) -> (String, AppState) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");

    let state = app_state(&base, catalog_path, files_dir);
    let router = server::router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (base, state)
}
