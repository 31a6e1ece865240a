//! Atomic Hardware Capabilities
//!
//! Fine-grained capability traits that instrument drivers implement. A device
//! implements only the capabilities it actually supports:
//!
//! - A relay scanner implements: `ChannelSwitch + Settable + Commandable`
//! - A microwave generator implements: `EmissionControl + Readable + Settable + Commandable`
//! - A mass-flow-controller operator implements: `Settable`
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! async fn sweep<S: ChannelSwitch>(scanner: &S) -> Result<()> {
//!     for channel in 1..=scanner.channel_count() {
//!         scanner.exclusive_close(channel).await?;
//!         // measure...
//!     }
//!     Ok(())
//! }
//! ```

use crate::property::{CommandInfo, PropertyInfo};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Device Category
// =============================================================================

/// Device category for classification and grouping in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    /// Relay scanners and multiplexers
    Switch,
    /// RF / microwave sources
    Source,
    /// Mass flow controllers and their operators
    FlowController,
    /// Devices that don't fit other categories
    #[default]
    Other,
}

// =============================================================================
// Readable
// =============================================================================

/// Capability: Scalar readout
///
/// Devices with one primary measurement (a generator's forward power, a
/// flow controller's actual flow).
#[async_trait]
pub trait Readable: Send + Sync {
    /// Read current value
    ///
    /// Units depend on device type and are reported in
    /// [`crate::driver::DeviceMetadata::measurement_units`].
    async fn read(&self) -> Result<f64>;
}

// =============================================================================
// EmissionControl
// =============================================================================

/// Capability: Emission on/off for sources
#[async_trait]
pub trait EmissionControl: Send + Sync {
    /// Enable emission (turn on the source)
    ///
    /// # Safety
    /// Enabling a microwave source requires a terminated output or a load in
    /// the waveguide.
    async fn enable_emission(&self) -> Result<()>;

    /// Disable emission (turn off the source)
    async fn disable_emission(&self) -> Result<()>;

    /// Query emission state
    ///
    /// # Default Implementation
    /// Returns error indicating state query is not supported.
    async fn is_emission_enabled(&self) -> Result<bool> {
        anyhow::bail!("Emission state query not supported by this device")
    }
}

// =============================================================================
// Settable
// =============================================================================

/// Capability: Named properties
///
/// Name-based access to the properties a driver lists in its static
/// [`PropertyInfo`] table. Values travel as JSON so the CLI and config
/// layers do not need to know each property's type.
#[async_trait]
pub trait Settable: Send + Sync {
    /// Set a named property to a new value.
    ///
    /// # Arguments
    /// * `name` - The identifier for the property to set.
    /// * `value` - The new value for the property.
    async fn set_value(&self, name: &str, value: serde_json::Value) -> Result<()>;

    /// Get the current value of a named property.
    ///
    /// # Arguments
    /// * `name` - The identifier for the property to query.
    async fn get_value(&self, name: &str) -> Result<serde_json::Value> {
        anyhow::bail!("Get value for '{}' not supported by this device", name)
    }

    /// Property table for introspection.
    fn properties(&self) -> &'static [PropertyInfo] {
        &[]
    }
}

// =============================================================================
// Commandable
// =============================================================================

/// Capability: Structured commands
///
/// Named device methods (tune, store settings, reset, ...) that are not a
/// property get or set.
#[async_trait]
pub trait Commandable: Send + Sync {
    /// Execute a specialized command
    ///
    /// # Arguments
    /// * `command` - Command identifier
    /// * `args` - Command arguments as a JSON object
    ///
    /// # Returns
    /// - Ok(JSON value) with results (`null` for commands without output)
    /// - Err if command unknown or execution failed
    async fn execute_command(
        &self,
        command: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Command table for introspection.
    fn commands(&self) -> &'static [CommandInfo] {
        &[]
    }
}

// =============================================================================
// ChannelSwitch
// =============================================================================

/// Capability: Numbered relay channels
///
/// Channels are numbered from 1 to [`ChannelSwitch::channel_count`].
#[async_trait]
pub trait ChannelSwitch: Send + Sync {
    /// Open (disconnect) one channel.
    async fn open_channel(&self, channel: u32) -> Result<()>;

    /// Close (connect) one channel, leaving the others as they are.
    async fn close_channel(&self, channel: u32) -> Result<()>;

    /// Open every other channel, then close `channel`.
    ///
    /// # Default Implementation
    /// Opens channels in ascending order with [`ChannelSwitch::open_channel`].
    async fn exclusive_close(&self, channel: u32) -> Result<()> {
        let count = self.channel_count();
        if channel == 0 || channel > count {
            anyhow::bail!("Channel {} out of range 1..={}", channel, count);
        }
        for other in (1..=count).filter(|c| *c != channel) {
            self.open_channel(other).await?;
        }
        self.close_channel(channel).await
    }

    /// Number of channels installed.
    fn channel_count(&self) -> u32;
}
