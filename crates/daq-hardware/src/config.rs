//! Hardware configuration loading.
//!
//! A hardware config is a TOML file with one `[[devices]]` entry per
//! instrument plus an optional `[settings]` table:
//!
//! ```toml
//! [settings]
//! strict = true
//!
//! [[devices]]
//! id = "scanner"
//! name = "Keithley 705"
//! [devices.driver]
//! type = "keithley705"
//! port = "/dev/ttyUSB0"
//! ```
//!
//! Settings can be overridden from the environment with the `BENCH_DAQ_`
//! prefix (`BENCH_DAQ_SETTINGS__STRICT=true`).

use crate::registry::{DeviceConfig, DeviceRegistry};
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Environment variable prefix for config overrides.
pub const ENV_PREFIX: &str = "BENCH_DAQ_";

/// Error types for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// File not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Cross-device validation error
    #[error("Config validation failed:\n  - {0}")]
    ValidationError(String),

    /// One or more devices failed to register in strict mode
    #[error("Failed to register {count} device(s):\n  - {details}")]
    RegistrationFailed {
        /// Number of failed devices
        count: usize,
        /// One line per failure
        details: String,
    },
}

/// Hardware configuration loaded from a TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Loader behaviour
    #[serde(default)]
    pub settings: HardwareSettings,

    /// List of devices to register
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Loader behaviour settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareSettings {
    /// Fail when any device cannot be registered (default: warn and skip)
    #[serde(default)]
    pub strict: bool,
}

impl HardwareConfig {
    /// Load hardware configuration from a TOML file, merged with
    /// `BENCH_DAQ_` environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.display().to_string()).into());
        }
        debug!("Loading hardware config from: {}", path.display());

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load hardware configuration from a TOML string.
    ///
    /// Useful for testing or loading configs from embedded resources.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::extract(Figment::new().merge(Toml::string(content)))
            .context("Failed to parse TOML content")
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        info!("Loaded hardware config with {} device(s)", config.devices.len());
        Ok(config)
    }

    /// Cross-device checks that individual factories cannot make.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                errors.push(format!("Device '{}' has an empty id", device.name));
            } else if !seen.insert(device.id.as_str()) {
                errors.push(format!("Duplicate device id '{}'", device.id));
            }
            if let Err(e) = device.driver_type() {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigLoadError::ValidationError(errors.join("\n  - ")).into())
        }
    }
}

/// Register every configured device with `registry`.
///
/// Unless `settings.strict` is set, devices that fail to register are logged
/// and skipped.
pub async fn register_devices(registry: &DeviceRegistry, config: &HardwareConfig) -> Result<()> {
    let mut failures = Vec::new();
    for device_config in &config.devices {
        if let Err(e) = registry.register(device_config.clone()).await {
            if config.settings.strict {
                failures.push(format!("{}: {:#}", device_config.id, e));
            } else {
                warn!(
                    "Failed to register device '{}': {:#} (continuing with other devices)",
                    device_config.id, e
                );
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ConfigLoadError::RegistrationFailed {
            count: failures.len(),
            details: failures.join("\n  - "),
        }
        .into())
    }
}

/// Create a DeviceRegistry with the built-in factories from a config.
pub async fn create_registry_from_config(config: &HardwareConfig) -> Result<DeviceRegistry> {
    let registry = DeviceRegistry::with_builtin_factories();
    register_devices(&registry, config).await?;
    Ok(registry)
}

/// Load hardware configuration from a file and create a DeviceRegistry
pub async fn create_registry_from_file(path: &Path) -> Result<DeviceRegistry> {
    let config = HardwareConfig::from_file(path)?;
    create_registry_from_config(&config).await
}
