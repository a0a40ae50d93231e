//! Configuration management for the runtime server.
//!
//! This module handles loading, validation, and conversion of server configuration
//! from TOML files.

use match_host::HostConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

fn default_queue_size() -> usize {
    128
}

fn default_max_tick_rate() -> u32 {
    60
}

fn default_label_max_bytes() -> usize {
    2048
}

fn default_grace_seconds() -> u64 {
    10
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Match runtime settings
    pub runtime: RuntimeSettings,
    /// Lobbies created at startup
    #[serde(default)]
    pub lobby: LobbySettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Settings passed through to the match host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Name of this node, embedded in every match ID
    pub node: String,
    /// Capacity of each match's data queue
    #[serde(default = "default_queue_size")]
    pub input_queue_size: usize,
    /// Capacity of each match's call queue
    #[serde(default = "default_queue_size")]
    pub call_queue_size: usize,
    #[serde(default = "default_max_tick_rate")]
    pub max_tick_rate: u32,
    #[serde(default = "default_label_max_bytes")]
    pub label_max_bytes: usize,
    /// Seconds an empty match may run before it is stopped (0 disables)
    #[serde(default)]
    pub max_empty_sec: u64,
    /// Grace period handed to matches on shutdown
    #[serde(default = "default_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Match module used for client-created matches
    #[serde(default)]
    pub realtime_match_module: Option<String>,
    /// Values exposed to modules through the context environment
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Lobbies opened when the server starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbySettings {
    pub startup_lobbies: u32,
    pub max_players: u64,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            startup_lobbies: 1,
            max_players: 4,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeSettings {
                node: "node-1".to_string(),
                input_queue_size: default_queue_size(),
                call_queue_size: default_queue_size(),
                max_tick_rate: default_max_tick_rate(),
                label_max_bytes: default_label_max_bytes(),
                max_empty_sec: 0,
                shutdown_grace_seconds: default_grace_seconds(),
                realtime_match_module: Some(plugin_lobby::LOBBY_MODULE.to_string()),
                env: HashMap::new(),
            },
            lobby: LobbySettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there
    /// and returns it.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the runtime section into host settings.
    pub fn to_host_config(&self) -> HostConfig {
        let runtime = &self.runtime;
        HostConfig {
            node: runtime.node.clone(),
            input_queue_size: runtime.input_queue_size,
            call_queue_size: runtime.call_queue_size,
            max_tick_rate: runtime.max_tick_rate,
            label_max_bytes: runtime.label_max_bytes,
            max_empty_sec: runtime.max_empty_sec,
            default_grace_seconds: runtime.shutdown_grace_seconds,
            realtime_match_module: runtime.realtime_match_module.clone(),
            env: runtime.env.clone(),
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        self.to_host_config().validate().map_err(|e| e.to_string())?;

        if self.lobby.startup_lobbies > 0 && self.lobby.max_players == 0 {
            return Err("Lobby max_players must be greater than 0".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
