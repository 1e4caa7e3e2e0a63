//! Service settings read once at startup.
//!
//! Everything operational comes from environment variables (a `.env` file is
//! honored via dotenvy in `main`). The service URL is what remote services
//! call back to; when not set explicitly it is derived from the local IP and
//! the bind port.

use std::net::SocketAddr;
use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default bind port when neither the CLI nor the environment says otherwise.
pub const DEFAULT_PORT: u16 = 8001;

/// Default time-to-live for generated files served from local storage.
pub const DEFAULT_FILE_TTL_SECS: u64 = 60 * 60;

/// Resolved service settings.
pub struct Settings {
    /// Shared secret expected in the `X-API-Key` header.
    pub api_key: SecretString,
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Externally reachable base URL of this service, used to construct the
    /// webhook URL injected into remote requests.
    pub service_url: String,
    /// Path to the model catalog JSON file.
    pub model_config_path: PathBuf,
    /// Directory generated files are served from.
    pub files_dir: PathBuf,
    /// TTL for served files.
    pub file_ttl_secs: u64,
    /// Identifier of this service instance, reported in job tickets.
    pub pod_id: String,
    /// Default model override (otherwise the catalog file decides).
    pub default_model: Option<String>,
}

impl Settings {
    /// Build settings from the environment, with optional CLI overrides for
    /// the bind address and model config path.
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        config_override: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let api_key = std::env::var("SWITCHYARD_API_KEY").map_err(|_| {
            ConfigError::InvalidSetting {
                name: "SWITCHYARD_API_KEY".to_string(),
                reason: "must be set".to_string(),
            }
        })?;

        let port = match std::env::var("SWITCHYARD_PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidSetting {
                name: "SWITCHYARD_PORT".to_string(),
                reason: format!("'{raw}' is not a valid port"),
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let bind_addr = match bind_override {
            Some(addr) => addr,
            None => SocketAddr::from(([0, 0, 0, 0], port)),
        };

        let service_url = match std::env::var("SWITCHYARD_SERVICE_URL") {
            Ok(url) => {
                let url = url.trim_end_matches('/').to_string();
                tracing::info!("Using service URL from environment: {}", url);
                url
            }
            Err(_) => {
                let ip = local_ip();
                let url = format!("http://{}:{}", ip, bind_addr.port());
                tracing::info!("Service URL derived from local address: {}", url);
                url
            }
        };

        let model_config_path = config_override
            .or_else(|| std::env::var("SWITCHYARD_MODEL_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/model_config.json"));

        let files_dir = std::env::var("SWITCHYARD_FILES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("output"));

        let file_ttl_secs = match std::env::var("SWITCHYARD_FILE_TTL_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| ConfigError::InvalidSetting {
                name: "SWITCHYARD_FILE_TTL_SECS".to_string(),
                reason: format!("'{raw}' is not a valid duration in seconds"),
            })?,
            Err(_) => DEFAULT_FILE_TTL_SECS,
        };

        let pod_id = std::env::var("SWITCHYARD_POD_ID")
            .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let default_model = std::env::var("SWITCHYARD_DEFAULT_MODEL").ok();

        Ok(Self {
            api_key: SecretString::from(api_key),
            bind_addr,
            service_url,
            model_config_path,
            files_dir,
            file_ttl_secs,
            pod_id,
            default_model,
        })
    }

    /// The webhook endpoint remote services deliver results to.
    pub fn webhook_url(&self) -> String {
        format!("{}/webhook", self.service_url)
    }

    /// The internal webhook URL the workflow layer posts job completions to.
    pub fn workflow_webhook_url(&self, job_id: &str) -> String {
        format!("{}/v1/workflow/webhook/{}", self.service_url, job_id)
    }
}

/// Best-effort local IP discovery via a connected UDP socket.
///
/// No packet is sent; connecting just selects the outbound interface.
fn local_ip() -> String {
    let probe = || -> std::io::Result<String> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    match probe() {
        Ok(ip) => ip,
        Err(e) => {
            tracing::warn!("Failed to detect local IP: {}", e);
            "0.0.0.0".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_urls_are_derived_from_service_url() {
        let settings = Settings {
            api_key: SecretString::from("secret"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8001)),
            service_url: "http://10.0.0.5:8001".to_string(),
            model_config_path: PathBuf::from("config/model_config.json"),
            files_dir: PathBuf::from("output"),
            file_ttl_secs: DEFAULT_FILE_TTL_SECS,
            pod_id: "pod-1".to_string(),
            default_model: None,
        };

        assert_eq!(settings.webhook_url(), "http://10.0.0.5:8001/webhook");
        assert_eq!(
            settings.workflow_webhook_url("j1"),
            "http://10.0.0.5:8001/v1/workflow/webhook/j1"
        );
    }
}
