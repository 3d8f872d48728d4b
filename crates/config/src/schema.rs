use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default listen address: loopback only, which also turns on the
/// local-origin restriction.
pub const DEFAULT_HTTP: &str = "localhost:7080";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriwebConfig {
    pub server: ServerConfig,
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` to listen on. An empty host means `localhost`.
    pub http: String,

    /// Log every request (method, path, peer).
    pub verbose: bool,

    /// Serve the web UI from this directory instead of the embedded copy.
    /// Files are re-read on every request and sent as non-cacheable.
    pub assets_dir: Option<PathBuf>,

    /// JSON driver-state snapshot exposed through the state API.
    pub state_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http: DEFAULT_HTTP.to_string(),
            verbose: false,
            assets_dir: None,
            state_file: None,
        }
    }
}
