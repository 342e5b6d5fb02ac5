//! Configuration types for the webrelay switch server

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Device identification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub unique_id: String,
    pub description: String,
    #[serde(default)]
    pub device_number: u32,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

/// Persistent store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store image file; the state is kept in memory only when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Persist relay states and output values, not just configuration changes
    #[serde(default = "default_true")]
    pub persist_switch_state: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "Web Relay Switch".to_string(),
            unique_id: "webrelay-switch-001".to_string(),
            description: "Relay, PWM and DAC switch bank".to_string(),
            device_number: 0,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 11113 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            persist_switch_state: default_true(),
        }
    }
}

/// Load configuration from a JSON file
pub fn load_config(path: &PathBuf) -> std::result::Result<Config, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
