// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for acq-server.
//!
//! Reads the `[acq-server]` section of `acq-rs.toml` from the search paths
//! provided by acq-app.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use acq_app::{ConfigError, ConfigFile};
use acq_backend::BackendSettings;
use acq_core::DataAction;

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Device backend configuration
    pub device: DeviceConfig,
    /// Acquisition timeouts and queueing
    pub behavior: BehaviorConfig,
    /// TCP listener configuration
    pub listen: ListenConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
    /// Device identity, hashed into every run id
    pub device_id: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: None,
            device_id: "SIM00001".to_string(),
        }
    }
}

/// Device backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Registered backend name (e.g. "simulated")
    pub backend: String,
    /// Time the device needs to become ready after power-up or reset
    pub ready_delay_ms: u64,
    pub sample_rate_hz: u64,
    pub channel_count: u32,
    /// Output storage size; unlimited when unset
    pub disk_capacity_bytes: Option<u64>,
    /// Make every automatic device reset fail
    pub fail_recovery: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: "simulated".to_string(),
            ready_delay_ms: 500,
            sample_rate_hz: 4_000,
            channel_count: 512,
            disk_capacity_bytes: None,
            fail_recovery: false,
        }
    }
}

/// Acquisition task behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Upper bound on waiting for device readiness during start
    pub readiness_timeout_ms: u64,
    /// Upper bound on one automatic device reset
    pub recovery_timeout_ms: u64,
    /// Pending updates kept per watcher before coalescing
    pub subscriber_queue_depth: usize,
    /// Capacity of the acquisition request channel
    pub request_channel_buffer: usize,
    /// Data action used when a stop does not name one ("keep_all_data" or "finish_processing")
    pub default_stop_action: String,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            readiness_timeout_ms: 60_000,
            recovery_timeout_ms: 10_000,
            subscriber_queue_depth: 16,
            request_channel_buffer: 32,
            default_stop_action: "keep_all_data".to_string(),
        }
    }
}

impl BehaviorConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn stop_action(&self) -> Result<DataAction, String> {
        parse_stop_action(&self.default_stop_action)
    }
}

/// TCP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Whether the listener is enabled
    pub enabled: bool,
    /// IP address to listen on
    pub listen: IpAddr,
    /// TCP port to listen on
    pub port: u16,
    /// Authentication configuration
    pub auth: AuthConfig,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 4600,
            auth: AuthConfig::default(),
        }
    }
}

/// Authentication configuration for the TCP listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Valid authentication tokens (empty = no auth required)
    pub tokens: Vec<String>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;
        if self.general.device_id.trim().is_empty() {
            return Err("[general].device_id must not be empty".to_string());
        }

        if self.device.backend.trim().is_empty() {
            return Err("[device].backend must not be empty".to_string());
        }
        if self.device.sample_rate_hz == 0 {
            return Err("[device].sample_rate_hz must be > 0".to_string());
        }
        if self.device.channel_count == 0 {
            return Err("[device].channel_count must be > 0".to_string());
        }
        if self.device.disk_capacity_bytes == Some(0) {
            return Err("[device].disk_capacity_bytes must be > 0 when set".to_string());
        }

        if self.behavior.readiness_timeout_ms == 0 {
            return Err("[behavior].readiness_timeout_ms must be > 0".to_string());
        }
        if self.behavior.recovery_timeout_ms == 0 {
            return Err("[behavior].recovery_timeout_ms must be > 0".to_string());
        }
        if self.behavior.subscriber_queue_depth == 0 {
            return Err("[behavior].subscriber_queue_depth must be > 0".to_string());
        }
        if self.behavior.request_channel_buffer == 0 {
            return Err("[behavior].request_channel_buffer must be > 0".to_string());
        }
        self.behavior.stop_action()?;

        validate_tokens("[listen.auth].tokens", &self.listen.auth.tokens)?;
        if self.listen.enabled && self.listen.port == 0 {
            return Err("[listen].port must be > 0 when listener is enabled".to_string());
        }

        Ok(())
    }

    /// Backend parameters derived from the `[general]` and `[device]` sections.
    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            device_id: self.general.device_id.clone(),
            ready_delay: Duration::from_millis(self.device.ready_delay_ms),
            sample_rate_hz: self.device.sample_rate_hz,
            channel_count: self.device.channel_count,
            disk_capacity_bytes: self.device.disk_capacity_bytes,
            fail_recovery: self.device.fail_recovery,
            ..BackendSettings::default()
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        <Self as ConfigFile>::load_from_file(path)
    }

    /// Load configuration from the default search paths.
    /// Returns default config if no config file is found.
    pub fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        <Self as ConfigFile>::load_from_default_paths()
    }

    /// Example configuration under the `[acq-server]` section header.
    pub fn example_toml() -> String {
        #[derive(Serialize)]
        struct Wrapper {
            #[serde(rename = "acq-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
                device_id: "MN12345".to_string(),
            },
            device: DeviceConfig {
                disk_capacity_bytes: Some(500_000_000_000),
                ..DeviceConfig::default()
            },
            behavior: BehaviorConfig::default(),
            listen: ListenConfig {
                auth: AuthConfig {
                    tokens: vec!["change-me".to_string()],
                },
                ..ListenConfig::default()
            },
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn parse_stop_action(value: &str) -> Result<DataAction, String> {
    match value.trim() {
        "keep_all_data" => Ok(DataAction::KeepAllData),
        "finish_processing" => Ok(DataAction::FinishProcessing),
        other => Err(format!(
            "[behavior].default_stop_action '{}' is invalid (expected one of: keep_all_data, finish_processing)",
            other
        )),
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    if let Some(level) = level {
        match level {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(format!(
                    "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
                    level
                ))
            }
        }
    }
    Ok(())
}

fn validate_tokens(path: &str, tokens: &[String]) -> Result<(), String> {
    if tokens.iter().any(|t| t.trim().is_empty()) {
        return Err(format!("{path} must not contain empty tokens"));
    }
    Ok(())
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "acq-server"
    }
}
