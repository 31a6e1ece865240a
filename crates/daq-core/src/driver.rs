//! Driver Factory and Component Types
//!
//! This module provides the plugin API for registered drivers.
//! Drivers implement [`DriverFactory`] and are registered with the DeviceRegistry
//! at startup via explicit `registry.register_factory(factory)` calls.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Composition Root (main.rs)              │
//! │  registry.register_factory(Keithley705Factory);                │
//! │  registry.register_factory(Kusg245Factory);                    │
//! │  registry.register_factory(Rod4Factory);                       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        DeviceRegistry                           │
//! │  factories: HashMap<driver_type, Arc<dyn DriverFactory>>       │
//! │  devices: HashMap<device_id, DeviceComponents>                 │
//! └─────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    DriverFactory::build()                       │
//! │  Parses TOML config, instantiates driver, returns capabilities │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example: Implementing a Driver Factory
//!
//! ```rust,ignore
//! use daq_core::driver::{DriverFactory, DeviceComponents, Capability};
//! use futures::future::BoxFuture;
//! use std::sync::Arc;
//!
//! pub struct Keithley705Factory;
//!
//! impl DriverFactory for Keithley705Factory {
//!     fn driver_type(&self) -> &'static str { "keithley705" }
//!     fn name(&self) -> &'static str { "Keithley 705 Scanner" }
//!     fn capabilities(&self) -> &'static [Capability] { &[Capability::ChannelSwitch] }
//!
//!     fn validate(&self, config: &toml::Value) -> anyhow::Result<()> {
//!         let cfg: Keithley705Config = config.clone().try_into()?;
//!         cfg.connection.validate()?;
//!         Ok(())
//!     }
//!
//!     fn build(&self, config: toml::Value) -> BoxFuture<'static, anyhow::Result<DeviceComponents>> {
//!         Box::pin(async move {
//!             let cfg: Keithley705Config = config.try_into()?;
//!             let driver = Arc::new(Keithley705Driver::new_async(cfg).await?);
//!
//!             Ok(DeviceComponents::new()
//!                 .with_channel_switch(driver.clone())
//!                 .with_settable(driver))
//!         })
//!     }
//! }
//! ```

use crate::capabilities::{
    ChannelSwitch, Commandable, DeviceCategory, EmissionControl, Readable, Settable,
};
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Capability Enum (Runtime Introspection)
// =============================================================================

/// Runtime capability flags for device introspection.
///
/// Mirrors the capability traits as an enum for easy matching and listing.
///
/// # Example
///
/// ```rust,ignore
/// use daq_core::driver::Capability;
///
/// let caps = device.capabilities();
/// if caps.contains(&Capability::ChannelSwitch) {
///     println!("Device switches relay channels");
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Can read a scalar value
    /// Corresponds to [`crate::capabilities::Readable`]
    Readable,

    /// Has named properties
    /// Corresponds to [`crate::capabilities::Settable`]
    Settable,

    /// Can execute structured JSON commands
    /// Corresponds to [`crate::capabilities::Commandable`]
    Commandable,

    /// Has emission on/off control (sources)
    /// Corresponds to [`crate::capabilities::EmissionControl`]
    EmissionControl,

    /// Switches numbered relay channels
    /// Corresponds to [`crate::capabilities::ChannelSwitch`]
    ChannelSwitch,
}

// =============================================================================
// Device Components (Capability Bag)
// =============================================================================

/// Container for capability trait objects returned by drivers.
///
/// When a driver is instantiated, it returns a `DeviceComponents` struct
/// containing all the capabilities it implements. The registry then uses
/// these for capability-based lookups.
///
/// ```rust,ignore
/// let driver = Arc::new(MyDriver::new().await?);
///
/// let components = DeviceComponents::new()
///     .with_readable(driver.clone())
///     .with_settable(driver);
/// ```
#[derive(Default)]
pub struct DeviceComponents {
    /// Device category for grouping
    pub category: Option<DeviceCategory>,

    /// Readable implementation (scalar measurements)
    pub readable: Option<Arc<dyn Readable>>,

    /// Settable implementation (named properties)
    pub settable: Option<Arc<dyn Settable>>,

    /// Commandable implementation (structured commands)
    pub commandable: Option<Arc<dyn Commandable>>,

    /// EmissionControl implementation (source on/off)
    pub emission_control: Option<Arc<dyn EmissionControl>>,

    /// ChannelSwitch implementation (relay channels)
    pub channel_switch: Option<Arc<dyn ChannelSwitch>>,

    /// Capability-specific metadata (units, channel count)
    pub metadata: DeviceMetadata,
}

impl std::fmt::Debug for DeviceComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceComponents")
            .field("category", &self.category)
            .field("capabilities", &self.capabilities())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl DeviceComponents {
    /// Create a new empty DeviceComponents
    pub fn new() -> Self {
        Self::default()
    }

    /// Get list of capabilities this device supports
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();

        if self.readable.is_some() {
            caps.push(Capability::Readable);
        }
        if self.settable.is_some() {
            caps.push(Capability::Settable);
        }
        if self.commandable.is_some() {
            caps.push(Capability::Commandable);
        }
        if self.emission_control.is_some() {
            caps.push(Capability::EmissionControl);
        }
        if self.channel_switch.is_some() {
            caps.push(Capability::ChannelSwitch);
        }

        caps
    }

    // Builder methods

    /// Set device category
    pub fn with_category(mut self, category: DeviceCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Set Readable implementation
    pub fn with_readable(mut self, r: Arc<dyn Readable>) -> Self {
        self.readable = Some(r);
        self
    }

    /// Set Settable implementation
    pub fn with_settable(mut self, s: Arc<dyn Settable>) -> Self {
        self.settable = Some(s);
        self
    }

    /// Set Commandable implementation
    pub fn with_commandable(mut self, c: Arc<dyn Commandable>) -> Self {
        self.commandable = Some(c);
        self
    }

    /// Set EmissionControl implementation
    pub fn with_emission_control(mut self, e: Arc<dyn EmissionControl>) -> Self {
        self.emission_control = Some(e);
        self
    }

    /// Set ChannelSwitch implementation
    pub fn with_channel_switch(mut self, s: Arc<dyn ChannelSwitch>) -> Self {
        self.channel_switch = Some(s);
        self
    }

    /// Set device metadata
    pub fn with_metadata(mut self, metadata: DeviceMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// =============================================================================
// Device Metadata
// =============================================================================

/// Capability-specific metadata for a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceMetadata {
    /// For Readable devices: measurement units (e.g., "W", "%")
    pub measurement_units: Option<String>,

    /// For ChannelSwitch devices and multi-channel instruments
    pub channel_count: Option<u32>,

    /// Firmware or model string reported at connect time
    pub firmware: Option<String>,
}

// =============================================================================
// Driver Factory Trait
// =============================================================================

/// Trait for driver factories that create device instances.
///
/// Each driver crate implements this trait to register itself with the
/// DeviceRegistry. The factory is responsible for:
///
/// 1. Declaring what driver type it handles (matching TOML `type` field)
/// 2. Validating configuration before instantiation
/// 3. Asynchronously creating the driver and returning capabilities
///
/// # Thread Safety
///
/// The `build()` method takes `&self` and returns a `BoxFuture<'static, ...>`,
/// so the factory must not hold mutable state across builds.
pub trait DriverFactory: Send + Sync + 'static {
    /// Driver type name used in TOML config `type` field.
    ///
    /// ```toml
    /// [devices.driver]
    /// type = "keithley705"  # matches driver_type() returning "keithley705"
    /// ```
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// List of capabilities this driver type provides.
    ///
    /// Used for introspection. The actual capabilities are determined by what
    /// `build()` returns.
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// Validate configuration without instantiating.
    ///
    /// Called before `build()`; must not touch hardware.
    ///
    /// * `config` - TOML value containing driver configuration (the `[devices.driver]` section)
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Async instantiation of the driver.
    ///
    /// Called after validation passes. Opens the connection, runs the device's
    /// initialization sequence and returns its capabilities.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Fixed;

    #[async_trait]
    impl Readable for Fixed {
        async fn read(&self) -> Result<f64> {
            Ok(1.0)
        }
    }

    #[test]
    fn test_device_components_builder() {
        let components = DeviceComponents::new()
            .with_category(DeviceCategory::Switch)
            .with_metadata(DeviceMetadata {
                channel_count: Some(20),
                ..Default::default()
            });

        assert_eq!(components.category, Some(DeviceCategory::Switch));
        assert_eq!(components.metadata.channel_count, Some(20));
    }

    #[test]
    fn test_device_components_capabilities() {
        // Empty components should have no capabilities
        let empty = DeviceComponents::new();
        assert!(empty.capabilities().is_empty());

        let readable = DeviceComponents::new().with_readable(Arc::new(Fixed));
        assert_eq!(readable.capabilities(), vec![Capability::Readable]);
    }

    #[test]
    fn test_capability_serde() {
        let json = serde_json::to_string(&Capability::ChannelSwitch).unwrap();
        assert_eq!(json, "\"channel_switch\"");

        let cap: Capability = serde_json::from_str("\"emission_control\"").unwrap();
        assert_eq!(cap, Capability::EmissionControl);
    }
}
