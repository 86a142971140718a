use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::bluetooth::LinkSettings;
use crate::pairing::{PairingPolicy, MAX_WAIT_WINDOW};
use crate::protocol::registry::Role;

/// Application configuration stored as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default speaker Bluetooth address.
    pub device_address: Option<String>,
    pub device_name: Option<String>,
    /// Skip SDP lookup and use this RFCOMM channel.
    pub rfcomm_channel: Option<u8>,
    pub send_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub pairing: PairingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    pub wait_window_secs: u64,
    pub poll_interval_secs: u64,
    pub settle_delay_ms: u64,
    pub default_role: Option<RoleSetting>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RoleSetting {
    Left,
    Right,
}

impl From<RoleSetting> for Role {
    fn from(value: RoleSetting) -> Self {
        match value {
            RoleSetting::Left => Role::Left,
            RoleSetting::Right => Role::Right,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_address: None,
            device_name: None,
            rfcomm_channel: None,
            send_timeout_ms: 3000,
            response_timeout_ms: 1000,
            pairing: PairingConfig::default(),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            wait_window_secs: 45,
            poll_interval_secs: 5,
            settle_delay_ms: 1000,
            default_role: None,
        }
    }
}

impl AppConfig {
    /// Config file path: ~/.config/boomctl/config.toml
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("boomctl")
            .join("config.toml")
    }

    /// Load config from disk, or return defaults.
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => tracing::warn!("Failed to parse config: {}", e),
                },
                Err(e) => tracing::warn!("Failed to read config: {}", e),
            }
        }
        Self::default()
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        tracing::info!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            rfcomm_channel: self.rfcomm_channel,
            send_timeout: Duration::from_millis(self.send_timeout_ms.max(1)),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
        }
    }

    pub fn pairing_policy(&self) -> PairingPolicy {
        let window = Duration::from_secs(self.pairing.wait_window_secs);
        if window > MAX_WAIT_WINDOW {
            tracing::warn!(
                "pairing.wait_window_secs={} exceeds the {}s maximum, clamping",
                self.pairing.wait_window_secs,
                MAX_WAIT_WINDOW.as_secs()
            );
        }
        PairingPolicy {
            wait_window: window.min(MAX_WAIT_WINDOW),
            poll_interval: Duration::from_secs(self.pairing.poll_interval_secs.max(1)),
            settle_delay: Duration::from_millis(self.pairing.settle_delay_ms),
        }
    }
}
