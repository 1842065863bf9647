//! Per-plugin readiness status.

use serde::{Deserialize, Serialize};

/// Readiness state of a single downstream plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginState {
    NotReady,
    Ok,
    Err,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::NotReady => "not-ready",
            PluginState::Ok => "ok",
            PluginState::Err => "err",
        }
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single named plugin as last reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStatus {
    pub name: String,
    pub state: PluginState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PluginStatus {
    pub fn new(name: impl Into<String>, state: PluginState) -> Self {
        Self {
            name: name.into(),
            state,
            message: None,
        }
    }
}
