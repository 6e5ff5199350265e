//! Mesh membership configuration.
//!
//! The membership is read from a YAML document and can be overridden from the
//! environment. Certificate material is kept as PEM text; it is validated
//! later by the trust store, which records problems as mesh errors instead of
//! refusing to start.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Configuration loading failures
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// Path of the configuration file
        path: String,
        /// Underlying I/O error
        source: std::io::Error,
    },
    /// Document is not valid YAML for a membership
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// One mesh membership
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Mesh name
    pub name: String,
    /// Mesh CA certificate (PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
    /// Identity of this agent
    #[serde(default)]
    pub agent: AgentIdentity,
    /// Bootstrap hub addresses, first one is the directory
    #[serde(default)]
    pub bootstraps: Vec<String>,
}

/// Identity of this agent within the mesh
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    /// Agent id, generated when absent
    #[serde(default)]
    pub id: String,
    /// Display name reported to hubs
    #[serde(default)]
    pub name: String,
    /// Agent certificate chain (PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// Agent private key (PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl MeshConfig {
    /// Load a membership from a YAML file and apply environment overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_yaml(&content)?;
        config.apply_environment_overrides();
        config.ensure_agent_id();

        info!(
            "Loaded mesh {} for agent {} ({} bootstrap hubs) from {:?}",
            config.name,
            config.agent.name,
            config.bootstraps.len(),
            path
        );
        Ok(config)
    }

    /// Parse a membership document
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `MESH_*` environment variable overrides
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("MESH_NAME") {
            info!("Mesh name overridden by environment: {}", name);
            self.name = name;
        }
        if let Some(id) = lookup("MESH_AGENT_ID") {
            info!("Agent id overridden by environment: {}", id);
            self.agent.id = id;
        }
        if let Some(name) = lookup("MESH_AGENT_NAME") {
            info!("Agent name overridden by environment: {}", name);
            self.agent.name = name;
        }
        if let Some(bootstraps) = lookup("MESH_BOOTSTRAPS") {
            self.bootstraps = bootstraps
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            info!("Bootstrap hubs overridden by environment: {:?}", self.bootstraps);
        }
    }

    /// Give the agent a fresh UUID when the configuration has none
    pub fn ensure_agent_id(&mut self) {
        if self.agent.id.trim().is_empty() {
            self.agent.id = uuid::Uuid::new_v4().to_string();
            info!("Generated agent id {}", self.agent.id);
        }
    }
}
