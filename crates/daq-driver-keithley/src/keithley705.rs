//! Keithley 705 Scanner Driver
//!
//! Reference: Model 705 Scanner Instruction Manual, device-dependent commands
//!
//! Protocol Overview:
//! - Format: single-letter command, decimal argument, `X` to execute
//! - Response terminator: CR (\r)
//! - Command terminator: CR (\r), configurable for gateways that add EOI
//! - No queries: every setting is write-only
//!
//! | Setting | Command |
//! |---------|---------|
//! | poles | `A{0,1,2,4}X` |
//! | display channel | `B{ch}X` |
//! | display mode | `D{0..4}X` |
//! | date format | `E{0,1}X` |
//! | first / last channel | `F{ch}X` / `L{ch}X` |
//! | settle time (s) | `H{s}X` |
//! | reset | `RX` |
//! | open / close channel | `N{ch}X` / `C{ch}X` |
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_keithley::Keithley705Factory;
//!
//! registry.register_factory(Keithley705Factory);
//!
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB0"
//! };
//! let components = factory.build(config.into()).await?;
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use daq_core::adapter::{Adapter, ConnectionConfig};
use daq_core::capabilities::{ChannelSwitch, Commandable, DeviceCategory, Settable};
use daq_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use daq_core::error::DaqError;
use daq_core::property::{self, CommandInfo, PropertyInfo};
use daq_core::validators::{strict_discrete_set, strict_range, ValueMap};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

/// Channels per installed scanner card.
pub const CHANNELS_PER_CARD: u32 = 20;

/// Maximum channel count (ten cards).
pub const MAX_CHANNELS: u32 = 200;

const POLE_OPTIONS: [u8; 4] = [0, 1, 2, 4];

// =============================================================================
// Value types
// =============================================================================

/// Front panel display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// Closed channel
    Channel,
    /// Scan interval
    Interval,
    /// Time of day
    Time,
    /// Date
    Date,
    /// User message
    Message,
}

static DISPLAY_MODES: ValueMap<DisplayMode, u8> = ValueMap::new(&[
    (DisplayMode::Channel, 0),
    (DisplayMode::Interval, 1),
    (DisplayMode::Time, 2),
    (DisplayMode::Date, 3),
    (DisplayMode::Message, 4),
]);

/// Date display format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DateFormat {
    /// MM/DD/YY
    #[serde(alias = "american")]
    American,
    /// DD/MM/YY
    #[serde(alias = "international")]
    International,
}

static DATE_FORMATS: ValueMap<DateFormat, u8> =
    ValueMap::new(&[(DateFormat::American, 0), (DateFormat::International, 1)]);

// =============================================================================
// Property and command tables
// =============================================================================

static KEITHLEY705_PROPERTIES: &[PropertyInfo] = &[
    PropertyInfo::setting(
        "number_of_poles",
        "A{}X",
        None,
        "Pole configuration: 0 (matrix), 1, 2 or 4. Resets first/last channel",
    ),
    PropertyInfo::setting("display_channel", "B{}X", None, "Channel shown on the display"),
    PropertyInfo::setting(
        "display_mode",
        "D{}X",
        None,
        "channel, interval, time, date or message",
    ),
    PropertyInfo::setting("date_format", "E{}X", None, "American or International"),
    PropertyInfo::setting("first_channel", "F{}X", None, "First channel of the scan list"),
    PropertyInfo::setting("settle_time", "H{}X", Some("s"), "Relay settle time"),
    PropertyInfo::setting("last_channel", "L{}X", None, "Last channel of the scan list"),
];

static KEITHLEY705_COMMANDS: &[CommandInfo] = &[
    CommandInfo {
        name: "reset",
        args: &[],
        description: "Open all channels and display the first channel",
    },
    CommandInfo {
        name: "open_channel",
        args: &["channel"],
        description: "Open one channel",
    },
    CommandInfo {
        name: "close_channel",
        args: &["channel"],
        description: "Close one channel",
    },
    CommandInfo {
        name: "exclusive_close",
        args: &["channel"],
        description: "Open every other channel, then close this one",
    },
];

// =============================================================================
// Keithley705Factory - DriverFactory implementation
// =============================================================================

/// Configuration for the Keithley 705 driver
#[derive(Debug, Clone, Deserialize)]
pub struct Keithley705Config {
    /// Serial port or TCP gateway
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    /// Installed channels, 20 per card (default: 20)
    #[serde(default = "default_channel_count")]
    pub channel_count: u32,
    /// Command terminator (default: "\r")
    #[serde(default = "default_write_termination")]
    pub write_termination: String,
}

fn default_channel_count() -> u32 {
    CHANNELS_PER_CARD
}

fn default_write_termination() -> String {
    "\r".to_string()
}

/// Default baud rate for RS-232 to IEEE-488 bridges.
const DEFAULT_BAUD_RATE: u32 = 9600;

fn validate_channel_count(count: u32) -> Result<u32, DaqError> {
    if count == 0 || count > MAX_CHANNELS || count % CHANNELS_PER_CARD != 0 {
        return Err(DaqError::Configuration(format!(
            "channel_count must be a multiple of {} between {} and {}, got {}",
            CHANNELS_PER_CARD, CHANNELS_PER_CARD, MAX_CHANNELS, count
        )));
    }
    Ok(count)
}

/// Factory for creating Keithley 705 driver instances.
pub struct Keithley705Factory;

static KEITHLEY705_CAPABILITIES: &[Capability] = &[
    Capability::ChannelSwitch,
    Capability::Settable,
    Capability::Commandable,
];

impl DriverFactory for Keithley705Factory {
    fn driver_type(&self) -> &'static str {
        "keithley705"
    }

    fn name(&self) -> &'static str {
        "Keithley 705 Scanner"
    }

    fn capabilities(&self) -> &'static [Capability] {
        KEITHLEY705_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: Keithley705Config = config.clone().try_into()?;
        cfg.connection.validate()?;
        validate_channel_count(cfg.channel_count)?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: Keithley705Config =
                config.try_into().context("Invalid Keithley 705 config")?;
            let driver = Arc::new(Keithley705Driver::new_async(&cfg).await?);

            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::Switch)
                .with_metadata(DeviceMetadata {
                    channel_count: Some(driver.channel_count()),
                    ..Default::default()
                })
                .with_channel_switch(driver.clone())
                .with_settable(driver.clone())
                .with_commandable(driver))
        })
    }
}

// =============================================================================
// Keithley705Driver
// =============================================================================

/// Driver for the Keithley 705 relay scanner.
///
/// Construction resets the scanner, so every channel starts open.
pub struct Keithley705Driver {
    adapter: Adapter,
    channel_count: u32,
}

impl Keithley705Driver {
    /// Open the configured connection and reset the scanner.
    pub async fn new_async(config: &Keithley705Config) -> Result<Self> {
        validate_channel_count(config.channel_count)?;
        let adapter = Adapter::open("Keithley 705", &config.connection, DEFAULT_BAUD_RATE)
            .await?
            .with_read_termination(b'\r')
            .with_write_termination(&config.write_termination);
        Self::with_adapter(adapter, config.channel_count).await
    }

    /// Wrap an existing adapter and reset the scanner.
    pub async fn with_adapter(adapter: Adapter, channel_count: u32) -> Result<Self> {
        let driver = Self {
            adapter,
            channel_count: validate_channel_count(channel_count)?,
        };
        driver.reset().await?;
        tracing::info!(
            "Keithley 705 ready on {} ({} channels)",
            driver.adapter.name(),
            driver.channel_count
        );
        Ok(driver)
    }

    fn check_channel(&self, channel: u32) -> Result<u32, DaqError> {
        strict_range(channel, 1, self.channel_count)
    }

    async fn send(&self, command: String) -> Result<()> {
        self.adapter
            .write(&command)
            .await
            .with_context(|| format!("Keithley 705 write {:?} failed", command))
    }

    /// Set the pole configuration (0 = matrix, 1, 2 or 4).
    ///
    /// The scanner resets first channel to 1, last channel to the highest
    /// installed and displays channel 1.
    pub async fn set_number_of_poles(&self, poles: u8) -> Result<()> {
        let poles = strict_discrete_set(poles, &POLE_OPTIONS)?;
        self.send(format!("A{}X", poles)).await
    }

    /// Set the displayed channel.
    pub async fn set_display_channel(&self, channel: u32) -> Result<()> {
        let channel = self.check_channel(channel)?;
        self.send(format!("B{}X", channel)).await
    }

    /// Set the display mode.
    pub async fn set_display_mode(&self, mode: DisplayMode) -> Result<()> {
        let code = DISPLAY_MODES.to_wire(mode)?;
        self.send(format!("D{}X", code)).await
    }

    /// Set the date format.
    pub async fn set_date_format(&self, format: DateFormat) -> Result<()> {
        let code = DATE_FORMATS.to_wire(format)?;
        self.send(format!("E{}X", code)).await
    }

    /// Set the first channel of the scan list.
    pub async fn set_first_channel(&self, channel: u32) -> Result<()> {
        let channel = self.check_channel(channel)?;
        self.send(format!("F{}X", channel)).await
    }

    /// Set the relay settle time in seconds.
    pub async fn set_settle_time(&self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(DaqError::invalid_value(seconds, "finite and >= 0").into());
        }
        self.send(format!("H{:.6}X", seconds)).await
    }

    /// Set the last channel of the scan list.
    pub async fn set_last_channel(&self, channel: u32) -> Result<()> {
        let channel = self.check_channel(channel)?;
        self.send(format!("L{}X", channel)).await
    }

    /// Open all channels and display the first channel.
    pub async fn reset(&self) -> Result<()> {
        self.send("RX".to_string()).await
    }

    async fn set_by_name(&self, name: &str, value: &Value) -> Result<()> {
        property::find_writable(KEITHLEY705_PROPERTIES, name)?;
        match name {
            "number_of_poles" => {
                let poles = property::expect_u64(name, value)?;
                let poles = u8::try_from(poles)
                    .map_err(|_| DaqError::invalid_value(poles, POLE_OPTIONS))?;
                self.set_number_of_poles(poles).await
            }
            "display_channel" => self.set_display_channel(channel_arg(name, value)?).await,
            "display_mode" => {
                let mode: DisplayMode = serde_json::from_value(value.clone())
                    .map_err(|e| invalid_arg(name, e))?;
                self.set_display_mode(mode).await
            }
            "date_format" => {
                let format: DateFormat = serde_json::from_value(value.clone())
                    .map_err(|e| invalid_arg(name, e))?;
                self.set_date_format(format).await
            }
            "first_channel" => self.set_first_channel(channel_arg(name, value)?).await,
            "settle_time" => self.set_settle_time(property::expect_f64(name, value)?).await,
            "last_channel" => self.set_last_channel(channel_arg(name, value)?).await,
            _ => Err(DaqError::UnknownProperty(name.to_string()).into()),
        }
    }
}

fn channel_arg(name: &str, value: &Value) -> Result<u32, DaqError> {
    let raw = property::expect_u64(name, value)?;
    u32::try_from(raw).map_err(|_| DaqError::invalid_value(raw, "a channel number"))
}

fn invalid_arg(name: &str, err: serde_json::Error) -> DaqError {
    DaqError::InvalidArgument {
        name: name.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl ChannelSwitch for Keithley705Driver {
    #[instrument(skip(self), err)]
    async fn open_channel(&self, channel: u32) -> Result<()> {
        let channel = self.check_channel(channel)?;
        self.send(format!("N{}X", channel)).await
    }

    #[instrument(skip(self), err)]
    async fn close_channel(&self, channel: u32) -> Result<()> {
        let channel = self.check_channel(channel)?;
        self.send(format!("C{}X", channel)).await
    }

    #[instrument(skip(self), err)]
    async fn exclusive_close(&self, channel: u32) -> Result<()> {
        let channel = self.check_channel(channel)?;
        for other in (1..=self.channel_count).filter(|c| *c != channel) {
            self.send(format!("N{}X", other)).await?;
        }
        self.send(format!("C{}X", channel)).await
    }

    fn channel_count(&self) -> u32 {
        self.channel_count
    }
}

#[async_trait]
impl Settable for Keithley705Driver {
    #[instrument(skip(self, value), err)]
    async fn set_value(&self, name: &str, value: Value) -> Result<()> {
        self.set_by_name(name, &value).await
    }

    async fn get_value(&self, name: &str) -> Result<Value> {
        // Every known property is a setting, so this always fails
        let info = property::find_readable(KEITHLEY705_PROPERTIES, name)?;
        Err(DaqError::ParameterWriteOnly(info.name.to_string()).into())
    }

    fn properties(&self) -> &'static [PropertyInfo] {
        KEITHLEY705_PROPERTIES
    }
}

#[async_trait]
impl Commandable for Keithley705Driver {
    #[instrument(skip(self, args), err)]
    async fn execute_command(&self, command: &str, args: Value) -> Result<Value> {
        property::find_command(KEITHLEY705_COMMANDS, command)?;
        match command {
            "reset" => self.reset().await?,
            "open_channel" => {
                let channel = channel_arg("channel", property::arg(&args, "channel")?)?;
                self.open_channel(channel).await?
            }
            "close_channel" => {
                let channel = channel_arg("channel", property::arg(&args, "channel")?)?;
                self.close_channel(channel).await?
            }
            "exclusive_close" => {
                let channel = channel_arg("channel", property::arg(&args, "channel")?)?;
                self.exclusive_close(channel).await?
            }
            _ => return Err(DaqError::UnknownCommand(command.to_string()).into()),
        }
        Ok(Value::Null)
    }

    fn commands(&self) -> &'static [CommandInfo] {
        KEITHLEY705_COMMANDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncReadExt;

    async fn scanner(channel_count: u32) -> (tokio::io::DuplexStream, Keithley705Driver) {
        let (host, device) = tokio::io::duplex(8192);
        let adapter = Adapter::from_stream("test scanner", device)
            .with_read_termination(b'\r')
            .with_write_termination("\r");
        let driver = Keithley705Driver::with_adapter(adapter, channel_count)
            .await
            .unwrap();
        (host, driver)
    }

    async fn sent(mut host: tokio::io::DuplexStream, driver: Keithley705Driver) -> String {
        drop(driver);
        let mut buf = Vec::new();
        host.read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_factory_driver_type() {
        let factory = Keithley705Factory;
        assert_eq!(factory.driver_type(), "keithley705");
        assert_eq!(factory.name(), "Keithley 705 Scanner");
        assert!(factory.capabilities().contains(&Capability::ChannelSwitch));
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = Keithley705Factory;

        let valid = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB0"
        });
        assert!(factory.validate(&valid).is_ok());

        let two_cards = toml::Value::Table(toml::toml! {
            address = "10.0.0.5:1234"
            channel_count = 40
        });
        assert!(factory.validate(&two_cards).is_ok());

        let odd_count = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB0"
            channel_count = 30
        });
        assert!(factory.validate(&odd_count).is_err());

        let missing_port = toml::Value::Table(toml::toml! {
            channel_count = 20
        });
        assert!(factory.validate(&missing_port).is_err());
    }

    #[test]
    fn test_value_maps_are_bijective() {
        assert!(DISPLAY_MODES.is_bijective());
        assert!(DATE_FORMATS.is_bijective());
    }

    #[tokio::test]
    async fn construction_resets() {
        let (host, driver) = scanner(20).await;
        assert_eq!(sent(host, driver).await, "RX\r");
    }

    #[tokio::test]
    async fn settings_write_expected_commands() {
        let (host, driver) = scanner(20).await;

        driver.set_number_of_poles(2).await.unwrap();
        driver.set_display_channel(7).await.unwrap();
        driver.set_display_mode(DisplayMode::Date).await.unwrap();
        driver.set_date_format(DateFormat::International).await.unwrap();
        driver.set_first_channel(1).await.unwrap();
        driver.set_last_channel(20).await.unwrap();
        driver.set_settle_time(0.5).await.unwrap();

        assert_eq!(
            sent(host, driver).await,
            "RX\rA2X\rB7X\rD3X\rE1X\rF1X\rL20X\rH0.500000X\r"
        );
    }

    #[tokio::test]
    async fn invalid_values_are_not_sent() {
        let (host, driver) = scanner(20).await;

        assert!(driver.set_number_of_poles(3).await.is_err());
        assert!(driver.set_display_channel(21).await.is_err());
        assert!(driver.set_first_channel(0).await.is_err());
        assert!(driver.set_settle_time(-1.0).await.is_err());
        assert!(driver.set_settle_time(f64::NAN).await.is_err());
        assert!(driver.open_channel(21).await.is_err());

        assert_eq!(sent(host, driver).await, "RX\r");
    }

    #[tokio::test]
    async fn open_and_close_channel() {
        let (host, driver) = scanner(20).await;

        driver.open_channel(3).await.unwrap();
        driver.close_channel(12).await.unwrap();

        assert_eq!(sent(host, driver).await, "RX\rN3X\rC12X\r");
    }

    #[tokio::test]
    async fn exclusive_close_opens_all_others_first() {
        for channel in 1..=20u32 {
            let (host, driver) = scanner(20).await;
            driver.exclusive_close(channel).await.unwrap();

            let mut expected = String::from("RX\r");
            for other in (1..=20).filter(|c| *c != channel) {
                expected.push_str(&format!("N{}X\r", other));
            }
            expected.push_str(&format!("C{}X\r", channel));

            assert_eq!(sent(host, driver).await, expected, "channel {}", channel);
        }
    }

    #[tokio::test]
    async fn exclusive_close_rejects_before_writing() {
        let (host, driver) = scanner(20).await;
        assert!(driver.exclusive_close(0).await.is_err());
        assert!(driver.exclusive_close(21).await.is_err());
        assert_eq!(sent(host, driver).await, "RX\r");
    }

    #[tokio::test]
    async fn exclusive_close_covers_extra_cards() {
        let (host, driver) = scanner(40).await;
        driver.exclusive_close(40).await.unwrap();

        let wire = sent(host, driver).await;
        assert!(wire.contains("N39X\r"));
        assert!(wire.ends_with("N39X\rC40X\r"));
    }

    #[tokio::test]
    async fn set_value_by_name() {
        let (host, driver) = scanner(20).await;

        driver.set_value("display_mode", json!("message")).await.unwrap();
        driver.set_value("date_format", json!("American")).await.unwrap();
        driver.set_value("number_of_poles", json!(4)).await.unwrap();
        assert!(driver.set_value("display_mode", json!("clock")).await.is_err());
        assert!(driver.set_value("volume", json!(3)).await.is_err());
        assert!(driver.get_value("settle_time").await.is_err());

        assert_eq!(sent(host, driver).await, "RX\rD4X\rE0X\rA4X\r");
    }

    #[tokio::test]
    async fn commands_by_name() {
        let (host, driver) = scanner(20).await;

        driver
            .execute_command("close_channel", json!({"channel": 5}))
            .await
            .unwrap();
        driver.execute_command("reset", json!({})).await.unwrap();
        assert!(driver.execute_command("close_channel", json!({})).await.is_err());
        assert!(driver.execute_command("scan", json!({})).await.is_err());

        assert_eq!(sent(host, driver).await, "RX\rC5X\rRX\r");
    }
}
