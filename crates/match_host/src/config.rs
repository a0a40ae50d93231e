//! Host configuration types and defaults.
//!
//! This module contains the settings that shape how the host runs matches:
//! queue sizes, tick and label limits, teardown timing and the module used
//! for client-created matches.

use std::collections::HashMap;

use crate::error::HostError;

/// Configuration structure for the runtime host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    /// Name of this node, embedded in every match ID it creates
    pub node: String,

    /// Capacity of each match's inbound data queue
    pub input_queue_size: usize,

    /// Capacity of each match's control call queue (joins, leaves, signals)
    pub call_queue_size: usize,

    /// Highest tick rate a match may request at init
    pub max_tick_rate: u32,

    /// Maximum match label size in bytes
    pub label_max_bytes: usize,

    /// Seconds a match may stay without presences before it is stopped; 0 disables
    pub max_empty_sec: u64,

    /// Grace period handed to `match_terminate` on shutdown
    pub default_grace_seconds: u64,

    /// Match module used for realtime `MatchCreate` messages
    pub realtime_match_module: Option<String>,

    /// Environment values exposed to plugins through `Context::env`
    pub env: HashMap<String, String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            node: "node-1".to_string(),
            input_queue_size: 128,
            call_queue_size: 128,
            max_tick_rate: 60,
            label_max_bytes: 2048,
            max_empty_sec: 0,
            default_grace_seconds: 10,
            realtime_match_module: None,
            env: HashMap::new(),
        }
    }
}

impl HostConfig {
    /// Checks the configuration for values the host cannot run with.
    pub fn validate(&self) -> Result<(), HostError> {
        if self.node.trim().is_empty() {
            return Err(HostError::InvalidConfig("node name cannot be empty".to_string()));
        }
        if self.input_queue_size == 0 || self.call_queue_size == 0 {
            return Err(HostError::InvalidConfig(
                "match queue sizes must be greater than 0".to_string(),
            ));
        }
        if self.max_tick_rate == 0 {
            return Err(HostError::InvalidConfig(
                "max_tick_rate must be greater than 0".to_string(),
            ));
        }
        if self.label_max_bytes == 0 {
            return Err(HostError::InvalidConfig(
                "label_max_bytes must be greater than 0".to_string(),
            ));
        }
        if let Some(module) = &self.realtime_match_module {
            if module.trim().is_empty() {
                return Err(HostError::InvalidConfig(
                    "realtime_match_module cannot be an empty string".to_string(),
                ));
            }
        }
        Ok(())
    }
}
