//! Environment-driven configuration, read once at startup.
//!
//! Replaces the module-level globals the original operator kept
//! (`NODE_NAME`, `GOSSIP_ADDR`, `CACHE_PATH`, `METRICS_PORT`) with a single
//! immutable value threaded through the rest of the agent.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing or invalid environment variable {0}: {1}")]
    BadVar(&'static str, String),
    #[error("cache path parent directory is not writable: {0}")]
    UnwritableCachePath(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,
    pub gossip_addr: String,
    pub cache_path: String,
    pub metrics_port: u16,
    pub log_level: String,
    pub control_plane_url: String,
    pub control_plane_timeout: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// `NODE_NAME` falls back to the host's node name if unset, matching the
    /// source's `os.uname().nodename` fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_name = std::env::var("NODE_NAME").ok().filter(|s| !s.is_empty()).unwrap_or_else(|| {
            hostname_fallback()
        });

        let gossip_addr = std::env::var("GOSSIP_ADDR").unwrap_or_else(|_| "127.0.0.1:7373".to_string());

        let cache_path = std::env::var("CACHE_PATH").unwrap_or_else(|_| "/data/desired.db".to_string());

        let metrics_port: u16 = match std::env::var("METRICS_PORT") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::BadVar("METRICS_PORT", v))?,
            Err(_) => 8000,
        };

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let control_plane_url = std::env::var("CONTROL_PLANE_URL").unwrap_or_else(|_| {
            match (
                std::env::var("KUBERNETES_SERVICE_HOST"),
                std::env::var("KUBERNETES_SERVICE_PORT"),
            ) {
                (Ok(host), Ok(port)) => format!("https://{host}:{port}"),
                _ => "https://127.0.0.1:6443".to_string(),
            }
        });

        let control_plane_timeout_ms: u64 = match std::env::var("CONTROL_PLANE_TIMEOUT_MS") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::BadVar("CONTROL_PLANE_TIMEOUT_MS", v))?,
            Err(_) => 1000,
        };

        if let Some(parent) = std::path::Path::new(&cache_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::UnwritableCachePath(format!("{parent:?}: {e}")))?;
            }
        }

        Ok(Config {
            node_name,
            gossip_addr,
            cache_path,
            metrics_port,
            log_level,
            control_plane_url,
            control_plane_timeout: Duration::from_millis(control_plane_timeout_ms),
        })
    }
}

fn hostname_fallback() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-node".to_string())
}
