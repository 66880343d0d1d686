//! Device and service configuration

use crate::storage::FirmwareLocations;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Upper bound on the detection debounce delay
pub const MAX_DEBOUNCE_MS: u64 = 1000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Per-device tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Delay between an interrupt and the status readback
    pub debounce_ms: u64,

    /// Read `FW_STATUS` after every load; the load faults unless the DSP reports init success
    pub verify_fw_status: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 50,
            verify_fw_status: true,
        }
    }
}

impl DeviceConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::Invalid(format!(
                "debounce_ms must be at most {}",
                MAX_DEBOUNCE_MS
            )));
        }

        Ok(())
    }
}

/// Configuration of the `im401-service` binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub device: DeviceConfig,
    pub firmware: FirmwareLocations,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            firmware: FirmwareLocations::default(),
            log_filter: "im401_bridge=info,im401_service=info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `IM401_FIRMWARE_DIR`, `IM401_CUSTOM_FIRMWARE_DIR` and `IM401_DEBOUNCE_MS`
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(dir) = std::env::var("IM401_FIRMWARE_DIR") {
            self.firmware.firmware_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("IM401_CUSTOM_FIRMWARE_DIR") {
            self.firmware.custom_firmware_dir = PathBuf::from(dir);
        }

        if let Ok(ms) = std::env::var("IM401_DEBOUNCE_MS") {
            self.device.debounce_ms = ms.parse().map_err(|_| {
                ConfigError::Invalid(format!("IM401_DEBOUNCE_MS is not a number: {}", ms))
            })?;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device.validate()?;

        if self.firmware.firmware_file.is_empty() {
            return Err(ConfigError::Invalid(
                "firmware_file must not be empty".to_string(),
            ));
        }

        if self.firmware.firmware_dir == self.firmware.custom_firmware_dir {
            debug!(
                "Custom firmware dir is the default dir ({})",
                self.firmware.firmware_dir.display()
            );
        }

        Ok(())
    }
}
