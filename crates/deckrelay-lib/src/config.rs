//! Panel configuration file
//!
//! The panel stores its whole layout in one JSON document. Only `pcServer` and
//! `xiaomiUrl` are interpreted here; every other key is carried through untouched.

use anyhow::{Context, Result};
use deckrelay_proto::AgentAddress;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::sensors::DEFAULT_SENSOR_URL;

/// Panel configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Where the PC agent listens
    #[serde(rename = "pcServer", default, skip_serializing_if = "Option::is_none")]
    pub pc_server: Option<AgentAddress>,

    /// Sensor bridge serving the Xiaomi thermometer reading
    #[serde(rename = "xiaomiUrl", default, skip_serializing_if = "Option::is_none")]
    pub sensor_url: Option<String>,

    /// Pages, tiles, auth and anything else the panel stores
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PanelConfig {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).context("Invalid panel configuration")
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).context("Failed to serialize panel configuration")
    }

    /// Sensor bridge URL, falling back to the default bridge
    pub fn sensor_endpoint(&self) -> &str {
        self.sensor_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(DEFAULT_SENSOR_URL)
    }
}

/// Reads and writes the configuration file
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration, or an empty one if the file doesn't exist
    pub async fn load(&self) -> Result<PanelConfig> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            warn!(path = %self.path.display(), "Config file not found, using empty configuration");
            return Ok(PanelConfig::default());
        }

        let json = tokio::fs::read_to_string(&self.path)
            .await
            .context(format!("Failed to read config file: {:?}", self.path))?;

        let config: PanelConfig = serde_json::from_str(&json)
            .context(format!("Failed to parse config file: {:?}", self.path))?;

        Ok(config)
    }

    /// Save the configuration to disk
    pub async fn save(&self, config: &PanelConfig) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context(format!("Failed to create config directory: {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;

        tokio::fs::write(&self.path, json)
            .await
            .context(format!("Failed to write config file: {:?}", self.path))?;

        info!(path = %self.path.display(), "Config saved");
        Ok(())
    }
}
