// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION Edge.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Configuration for the edge binary.

use anyhow::Context;
use edge_core::{DeviceLimits, SUPPORTED_SCHEDULE_VERSIONS};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_device_id() -> String {
    "fluxion-edge-dev".to_string()
}

fn default_mqtt_host() -> String {
    "127.0.0.1".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_storage_path() -> String {
    "/data/fluxion-edge.db".to_string()
}

fn default_max_power_kw() -> f64 {
    50.0
}

fn default_supported_versions() -> Vec<u32> {
    SUPPORTED_SCHEDULE_VERSIONS.to_vec()
}

fn default_60() -> u64 {
    60
}

fn default_1() -> u64 {
    1
}

fn default_1024() -> usize {
    1024
}

fn default_5() -> u64 {
    5
}

fn default_7() -> i64 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// Device identity; also the `{device_id}` segment of all topics
    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,

    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,

    /// MQTT client id; defaults to the device id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_client_id: Option<String>,

    /// SQLite database holding schedules, records and the outbox
    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    /// Hard per-interval power bound (kW) for schedules that carry none
    #[serde(default = "default_max_power_kw")]
    pub max_power_kw: f64,

    /// Schedule schema versions this device accepts
    #[serde(default = "default_supported_versions")]
    pub supported_versions: Vec<u32>,

    /// Executor tick cadence (seconds)
    #[serde(default = "default_60")]
    pub tick_interval_secs: u64,

    /// Report delivery poll cadence (seconds)
    #[serde(default = "default_1")]
    pub report_poll_secs: u64,

    /// Max reports held in the outbox before the oldest are dropped
    #[serde(default = "default_1024")]
    pub outbox_capacity: usize,

    /// How long shutdown waits for the outbox to drain (seconds)
    #[serde(default = "default_5")]
    pub flush_timeout_secs: u64,

    /// Reported execution records older than this are pruned (days)
    #[serde(default = "default_7")]
    pub prune_retention_days: i64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_client_id: None,
            storage_path: default_storage_path(),
            max_power_kw: default_max_power_kw(),
            supported_versions: default_supported_versions(),
            tick_interval_secs: default_60(),
            report_poll_secs: default_1(),
            outbox_capacity: default_1024(),
            flush_timeout_secs: default_5(),
            prune_retention_days: default_7(),
        }
    }
}

impl EdgeConfig {
    pub fn client_id(&self) -> &str {
        self.mqtt_client_id.as_deref().unwrap_or(&self.device_id)
    }

    pub fn device_limits(&self) -> DeviceLimits {
        DeviceLimits {
            max_power_kw: self.max_power_kw,
            supported_versions: self.supported_versions.clone(),
        }
    }
}

/// Load the config, creating it with defaults on first start.
pub fn load_config(path: &Path) -> anyhow::Result<EdgeConfig> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    } else {
        let config = EdgeConfig::default();
        save_config(path, &config)?;
        Ok(config)
    }
}

pub fn save_config(path: &Path, config: &EdgeConfig) -> anyhow::Result<()> {
    let temp_path = path.with_extension("tmp");
    let content = toml::to_string_pretty(config)?;

    // Atomic write
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EdgeConfig::default();
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.tick_interval_secs, 60);
        assert_eq!(config.outbox_capacity, 1024);
        assert_eq!(config.client_id(), "fluxion-edge-dev");
        assert_eq!(config.device_limits().max_power_kw, 50.0);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: EdgeConfig = toml::from_str(
            r#"
            device_id = "device-001"
            mqtt_host = "broker.local"
            max_power_kw = 11.0
            "#,
        )
        .unwrap();
        assert_eq!(config.device_id, "device-001");
        assert_eq!(config.mqtt_host, "broker.local");
        assert_eq!(config.max_power_kw, 11.0);
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.supported_versions, vec![1, 2]);
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.toml");

        let config = load_config(&path).unwrap();
        assert_eq!(config.mqtt_port, 1883);
        assert!(path.exists());

        // Round-trips through the file it just wrote.
        let reloaded = load_config(&path).unwrap();
        assert_eq!(reloaded.device_id, config.device_id);
    }
}
