use std::{fmt::Display, path::Path};

use serde::{Deserialize, Serialize};

// ── Driver state (input) ─────────────────────────────────────────────────────

/// Outcome of driver initialisation on the host, as reported by whatever
/// loaded the drivers. The gateway only ever reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverState {
    pub loaded: Vec<String>,
    pub skipped: Vec<DriverFailure>,
    pub failed: Vec<DriverFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverFailure {
    pub driver: String,
    pub error: String,
}

impl DriverFailure {
    pub fn new(driver: impl Display, error: impl Display) -> Self {
        Self {
            driver: driver.to_string(),
            error: error.to_string(),
        }
    }
}

impl DriverState {
    /// Read a snapshot written as JSON.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read(path)?;
        serde_json::from_slice(&raw).map_err(std::io::Error::other)
    }
}

// ── Wire view ────────────────────────────────────────────────────────────────

/// Frozen, serialisable copy of a [`DriverState`], in the shape the web UI
/// reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateView {
    #[serde(rename = "Loaded")]
    pub loaded: Vec<String>,
    #[serde(rename = "Skipped")]
    pub skipped: Vec<FailureView>,
    #[serde(rename = "Failed")]
    pub failed: Vec<FailureView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureView {
    #[serde(rename = "D")]
    pub driver: String,
    #[serde(rename = "Err")]
    pub error: String,
}

impl From<&DriverFailure> for FailureView {
    fn from(f: &DriverFailure) -> Self {
        Self {
            driver: f.driver.clone(),
            error: f.error.clone(),
        }
    }
}

impl From<&DriverState> for StateView {
    fn from(s: &DriverState) -> Self {
        Self {
            loaded: s.loaded.clone(),
            skipped: s.skipped.iter().map(FailureView::from).collect(),
            failed: s.failed.iter().map(FailureView::from).collect(),
        }
    }
}

/// Body of the server state API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "State")]
    pub state: StateView,
}
