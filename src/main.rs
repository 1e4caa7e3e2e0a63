use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use switchyard::callback::CallbackCoordinator;
use switchyard::client::ServiceClient;
use switchyard::config::Settings;
use switchyard::jobs::{JobManager, ModelCatalog};
use switchyard::registry::NodeRegistry;
use switchyard::server::{self, AppState};
use switchyard::storage::FileStore;
use switchyard::workflow::{ExecutionEnv, WorkflowManager};

/// Agent orchestration service for graph-structured generation workflows.
#[derive(Parser, Debug)]
#[command(name = "switchyard", version, about)]
struct Cli {
    /// Path to the model catalog JSON file.
    #[arg(long, env = "SWITCHYARD_MODEL_CONFIG")]
    model_config: Option<PathBuf>,

    /// Address to bind the HTTP server to.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; real deployments set the environment directly.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchyard=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = Arc::new(
        Settings::from_env(cli.bind, cli.model_config).context("failed to load settings")?,
    );

    let catalog = Arc::new(
        ModelCatalog::load(
            &settings.model_config_path,
            settings.default_model.as_deref(),
        )
        .with_context(|| {
            format!(
                "failed to load model catalog from {}",
                settings.model_config_path.display()
            )
        })?,
    );

    let registry = Arc::new(NodeRegistry::builtin());
    tracing::info!("Registered {} node types", registry.len());

    let coordinator = Arc::new(CallbackCoordinator::new());
    let client = ServiceClient::new(settings.api_key.clone(), settings.service_url.clone());

    let env = Arc::new(ExecutionEnv {
        registry: Arc::clone(&registry),
        coordinator: Arc::clone(&coordinator),
        client: client.clone(),
    });
    let workflows = Arc::new(WorkflowManager::new(env));

    let jobs = Arc::new(JobManager::new(
        Arc::clone(&settings),
        Arc::clone(&catalog),
        Arc::clone(&workflows),
        client.clone(),
    ));

    let files = Arc::new(FileStore::new(
        settings.files_dir.clone(),
        Duration::from_secs(settings.file_ttl_secs),
    ));

    let state = AppState {
        settings: Arc::clone(&settings),
        jobs,
        workflows,
        coordinator,
        registry,
        files,
    };

    server::serve(state, settings.bind_addr).await
}
