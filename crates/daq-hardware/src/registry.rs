//! Device Registry for Runtime Hardware Management
//!
//! Central hub that maps driver type names to [`DriverFactory`] instances and
//! device ids to the capability objects those factories build.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      DeviceRegistry                             │
//! │  factories: "keithley705" | "kusg245_250a" | "rod4" | ...       │
//! │  devices:   "scanner" | "magnetron" | "mfc" | ...               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                    Capability Traits                            │
//! │  Readable | Settable | Commandable | EmissionControl | ...      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                    Hardware Drivers                             │
//! │  Keithley705Driver | Kusg245Driver | Rod4Driver                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use daq_hardware::registry::{DeviceConfig, DeviceRegistry};
//!
//! let registry = DeviceRegistry::with_builtin_factories();
//!
//! registry.register(DeviceConfig {
//!     id: "scanner".into(),
//!     name: "Keithley 705".into(),
//!     driver: toml::toml! { port = "/dev/ttyUSB0" }.into(),
//! }).await?;
//!
//! if let Some(switch) = registry.get_channel_switch("scanner") {
//!     switch.exclusive_close(3).await?;
//! }
//! ```

use anyhow::{anyhow, Context, Result};
use daq_core::capabilities::{
    ChannelSwitch, Commandable, DeviceCategory, EmissionControl, Readable, Settable,
};
use daq_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Unique device identifier
pub type DeviceId = String;

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for registering a device
///
/// `driver` is the raw `[devices.driver]` table. Its `type` key selects the
/// factory; the whole table is handed to that factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique identifier (e.g., "scanner", "magnetron")
    pub id: DeviceId,
    /// Human-readable name (e.g., "Keithley 705")
    pub name: String,
    /// Driver table including the `type` key
    pub driver: toml::Value,
}

impl DeviceConfig {
    /// Value of the `type` key in the driver table.
    pub fn driver_type(&self) -> Result<&str> {
        self.driver
            .get("type")
            .and_then(toml::Value::as_str)
            .ok_or_else(|| anyhow!("Device '{}' has no driver `type`", self.id))
    }
}

// =============================================================================
// Introspection Types
// =============================================================================

/// Information about a registered device (returned by list operations)
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    /// Unique identifier
    pub id: DeviceId,
    /// Human-readable name
    pub name: String,
    /// Driver type name (e.g., "keithley705")
    pub driver_type: String,
    /// Device category
    pub category: DeviceCategory,
    /// Capabilities this device supports
    pub capabilities: Vec<Capability>,
    /// Capability-specific metadata
    pub metadata: DeviceMetadata,
}

/// Information about a registered driver factory
#[derive(Debug, Clone, Serialize)]
pub struct FactoryInfo {
    /// Value of the `type` key that selects this factory
    pub driver_type: &'static str,
    /// Human-readable driver name
    pub name: &'static str,
    /// Capabilities the driver declares
    pub capabilities: &'static [Capability],
}

/// A registered device with its capability objects
struct RegisteredDevice {
    config: DeviceConfig,
    driver_type: String,
    components: DeviceComponents,
}

impl RegisteredDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            driver_type: self.driver_type.clone(),
            category: self.components.category.unwrap_or_default(),
            capabilities: self.components.capabilities(),
            metadata: self.components.metadata.clone(),
        }
    }
}

// =============================================================================
// Device Registry
// =============================================================================

/// Central registry for hardware device management
///
/// Registration and lookups take `&self`; the maps sit behind
/// `parking_lot::RwLock`s that are never held across an `.await`.
#[derive(Default)]
pub struct DeviceRegistry {
    factories: RwLock<HashMap<&'static str, Arc<dyn DriverFactory>>>,
    devices: RwLock<HashMap<DeviceId, RegisteredDevice>>,
}

impl DeviceRegistry {
    /// Create a new empty device registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every driver factory compiled into this build.
    pub fn with_builtin_factories() -> Self {
        let registry = Self::new();
        registry.register_builtin_factories();
        registry
    }

    /// Register the factories enabled by cargo features.
    pub fn register_builtin_factories(&self) {
        #[cfg(feature = "keithley")]
        self.register_factory(daq_driver_keithley::Keithley705Factory);
        #[cfg(feature = "kuhne")]
        self.register_factory(daq_driver_kuhne::Kusg245Factory);
        #[cfg(feature = "proterial")]
        self.register_factory(daq_driver_proterial::Rod4Factory);
    }

    /// Register a driver factory. A factory with the same type replaces the
    /// previous one.
    pub fn register_factory<F: DriverFactory>(&self, factory: F) {
        let driver_type = factory.driver_type();
        if self
            .factories
            .write()
            .insert(driver_type, Arc::new(factory))
            .is_some()
        {
            tracing::warn!("Driver factory '{}' replaced", driver_type);
        } else {
            tracing::debug!("Registered driver factory '{}'", driver_type);
        }
    }

    /// Look up a factory by driver type.
    pub fn factory(&self, driver_type: &str) -> Option<Arc<dyn DriverFactory>> {
        self.factories.read().get(driver_type).cloned()
    }

    /// All registered factories, sorted by driver type.
    pub fn list_factories(&self) -> Vec<FactoryInfo> {
        let mut infos: Vec<FactoryInfo> = self
            .factories
            .read()
            .values()
            .map(|f| FactoryInfo {
                driver_type: f.driver_type(),
                name: f.name(),
                capabilities: f.capabilities(),
            })
            .collect();
        infos.sort_by_key(|i| i.driver_type);
        infos
    }

    /// Register a device from configuration
    ///
    /// Validates the driver table with its factory, then builds the driver
    /// (which opens the connection and runs its init sequence).
    ///
    /// # Errors
    /// Returns error if:
    /// - Device ID is already registered
    /// - The driver type is unknown
    /// - Configuration validation fails
    /// - The driver fails to initialize
    pub async fn register(&self, config: DeviceConfig) -> Result<()> {
        if self.contains(&config.id) {
            return Err(anyhow!("Device '{}' is already registered", config.id));
        }

        let driver_type = config.driver_type()?.to_string();
        let factory = self.factory(&driver_type).ok_or_else(|| {
            let known: Vec<&str> = self.list_factories().iter().map(|f| f.driver_type).collect();
            anyhow!(
                "Unknown driver type '{}' for device '{}' (known: {})",
                driver_type,
                config.id,
                known.join(", ")
            )
        })?;

        factory.validate(&config.driver).with_context(|| {
            format!(
                "Configuration validation failed for device '{}' ({})",
                config.id, driver_type
            )
        })?;

        let components = factory
            .build(config.driver.clone())
            .await
            .with_context(|| format!("Failed to initialize device '{}'", config.id))?;

        tracing::info!(
            "Registered device '{}' ({}) with {:?}",
            config.id,
            driver_type,
            components.capabilities()
        );

        let mut devices = self.devices.write();
        if devices.contains_key(&config.id) {
            return Err(anyhow!("Device '{}' is already registered", config.id));
        }
        devices.insert(
            config.id.clone(),
            RegisteredDevice {
                config,
                driver_type,
                components,
            },
        );
        Ok(())
    }

    /// Unregister a device
    ///
    /// # Returns
    /// true if device was found and removed, false if not found
    pub fn unregister(&self, id: &str) -> bool {
        self.devices.write().remove(id).is_some()
    }

    /// List all registered devices, sorted by id
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        let mut infos: Vec<DeviceInfo> =
            self.devices.read().values().map(RegisteredDevice::info).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Get device info by ID
    pub fn get_device_info(&self, id: &str) -> Option<DeviceInfo> {
        self.devices.read().get(id).map(RegisteredDevice::info)
    }

    /// Check if a device is registered
    pub fn contains(&self, id: &str) -> bool {
        self.devices.read().contains_key(id)
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    // =========================================================================
    // Capability Access
    // =========================================================================

    /// Get a device as Readable
    pub fn get_readable(&self, id: &str) -> Option<Arc<dyn Readable>> {
        self.devices.read().get(id)?.components.readable.clone()
    }

    /// Get a device as Settable
    pub fn get_settable(&self, id: &str) -> Option<Arc<dyn Settable>> {
        self.devices.read().get(id)?.components.settable.clone()
    }

    /// Get a device as Commandable
    pub fn get_commandable(&self, id: &str) -> Option<Arc<dyn Commandable>> {
        self.devices.read().get(id)?.components.commandable.clone()
    }

    /// Get a device as EmissionControl
    pub fn get_emission_control(&self, id: &str) -> Option<Arc<dyn EmissionControl>> {
        self.devices.read().get(id)?.components.emission_control.clone()
    }

    /// Get a device as ChannelSwitch
    pub fn get_channel_switch(&self, id: &str) -> Option<Arc<dyn ChannelSwitch>> {
        self.devices.read().get(id)?.components.channel_switch.clone()
    }

    /// Ids of all devices with the given capability, sorted
    pub fn devices_with_capability(&self, capability: Capability) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .devices
            .read()
            .values()
            .filter(|d| d.components.capabilities().contains(&capability))
            .map(|d| d.config.id.clone())
            .collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut factories: Vec<&'static str> = self.factories.read().keys().copied().collect();
        factories.sort_unstable();
        let mut devices: Vec<DeviceId> = self.devices.read().keys().cloned().collect();
        devices.sort();
        f.debug_struct("DeviceRegistry")
            .field("factories", &factories)
            .field("devices", &devices)
            .finish()
    }
}
