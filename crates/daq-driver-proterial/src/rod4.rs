//! Proterial ROD-4(A) Mass Flow Controller Operator Driver
//!
//! Operates up to four analog mass flow controllers (MFCs).
//!
//! Protocol Overview:
//! - Format: DLE (0x10) + channel digit + three-letter command + argument
//! - Channel `0` addresses the operator itself, `1`..`4` the MFC channels
//! - Command terminator: CR (\r)
//! - Response terminator: LF (\n)
//! - `R..` commands query, `S..` commands set
//!
//! | Quantity | Query | Set |
//! |----------|-------|-----|
//! | version | `0RVN` | |
//! | keyboard lock | | `0SKO{0,1}` |
//! | actual flow (%) | `{ch}RFX` | |
//! | setpoint (%) | `{ch}RFD` | `{ch}SFD%.1f` |
//! | MFC range (sccm) | `{ch}RFK` | `{ch}SFK%d` |
//! | ramp time (s) | `{ch}RRT` | `{ch}SRT%.1f` |
//! | valve mode | `{ch}RVM` | `{ch}SVM{0,1,2}` |
//! | flow unit | | `{ch}SFU{0,1}` |
//!
//! Keyboard lock and flow unit cannot be queried; the driver caches the last
//! value written.
//!
//! # Usage
//!
//! ```rust,ignore
//! let rod4 = Rod4Driver::new_async(&config).await?;
//!
//! println!("{}", rod4.version().await?);
//! rod4.channel(1)?.set_mfc_range(500.0).await?;
//! rod4.channel(2)?.set_valve_mode(ValveMode::Flow).await?;
//! rod4.channel(3)?.set_setpoint(50.0).await?;
//! println!("{}", rod4.channel(4)?.actual_flow().await?);
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use daq_core::adapter::{Adapter, ConnectionConfig};
use daq_core::capabilities::{DeviceCategory, Settable};
use daq_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use daq_core::error::DaqError;
use daq_core::property::{self, PropertyInfo};
use daq_core::validators::{strict_range, truncated_range, ValueMap};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::instrument;

/// Data link escape, first byte of every command.
const DLE: char = '\x10';

/// MFC channels on the operator.
pub const CHANNEL_COUNT: u8 = 4;

const SETPOINT_PERCENT: (f64, f64) = (0.0, 100.0);
const MFC_RANGE_SCCM: (f64, f64) = (0.0, 200_000.0);
const RAMP_TIME_S: (f64, f64) = (0.0, 200_000.0);

// =============================================================================
// Value types
// =============================================================================

/// MFC valve mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValveMode {
    /// Closed-loop flow control
    Flow,
    /// Valve fully closed
    Close,
    /// Valve fully open (purge)
    Open,
}

static VALVE_MODES: ValueMap<ValveMode, u8> = ValueMap::new(&[
    (ValveMode::Flow, 0),
    (ValveMode::Close, 1),
    (ValveMode::Open, 2),
]);

/// Flow display unit of a channel.
///
/// `sccm` and `slm` share one wire code; the operator picks the absolute
/// unit from the MFC range (sccm below 10 slm).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowUnit {
    /// Percent of MFC range
    #[serde(rename = "%")]
    Percent,
    /// Standard cubic centimetres per minute
    #[serde(rename = "sccm", alias = "SCCM")]
    Sccm,
    /// Standard litres per minute
    #[serde(rename = "slm", alias = "SLM")]
    Slm,
}

static FLOW_UNITS: ValueMap<FlowUnit, u8> = ValueMap::new(&[
    (FlowUnit::Percent, 0),
    (FlowUnit::Sccm, 1),
    (FlowUnit::Slm, 1),
]);

/// Front panel keyboard state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyboardLock {
    /// Front panel usable
    Unlocked,
    /// Front panel locked
    Locked,
}

static KEYBOARD_STATES: ValueMap<KeyboardLock, u8> =
    ValueMap::new(&[(KeyboardLock::Unlocked, 0), (KeyboardLock::Locked, 1)]);

// =============================================================================
// Property table
// =============================================================================

static ROD4_PROPERTIES: &[PropertyInfo] = &[
    PropertyInfo::measurement("version", "\\x100RVN", None, "Version and serial number"),
    PropertyInfo::cached("keyboard", "\\x100SKO{}", None, "unlocked or locked"),
    PropertyInfo::measurement("ch{n}.actual_flow", "\\x10{n}RFX", Some("%"), "Actual flow"),
    PropertyInfo::control(
        "ch{n}.setpoint",
        "\\x10{n}RFD",
        "\\x10{n}SFD{:.1}",
        Some("%"),
        "Setpoint in % of control range",
    ),
    PropertyInfo::control(
        "ch{n}.mfc_range",
        "\\x10{n}RFK",
        "\\x10{n}SFK{}",
        Some("sccm"),
        "MFC full scale, up to 200 slm",
    ),
    PropertyInfo::control(
        "ch{n}.ramp_time",
        "\\x10{n}RRT",
        "\\x10{n}SRT{:.1}",
        Some("s"),
        "Setpoint ramping time",
    ),
    PropertyInfo::control(
        "ch{n}.valve_mode",
        "\\x10{n}RVM",
        "\\x10{n}SVM{}",
        None,
        "flow, close or open",
    ),
    PropertyInfo::cached("ch{n}.flow_unit", "\\x10{n}SFU{}", None, "%, sccm or slm"),
];

/// Split `ch3.setpoint` into channel 3 and the table key `ch{n}.setpoint`.
fn resolve_name(name: &str) -> Result<(Option<u8>, String), DaqError> {
    let Some(rest) = name.strip_prefix("ch") else {
        return Ok((None, name.to_string()));
    };
    let Some((number, base)) = rest.split_once('.') else {
        return Err(DaqError::UnknownProperty(name.to_string()));
    };
    let channel: u8 = number
        .parse()
        .map_err(|_| DaqError::UnknownProperty(name.to_string()))?;
    Ok((Some(channel), format!("ch{{n}}.{}", base)))
}

// =============================================================================
// Rod4Factory - DriverFactory implementation
// =============================================================================

/// Configuration for the ROD-4 driver
#[derive(Debug, Clone, Deserialize)]
pub struct Rod4Config {
    /// Serial port or TCP gateway
    #[serde(flatten)]
    pub connection: ConnectionConfig,
}

const DEFAULT_BAUD_RATE: u32 = 9600;

/// Factory for creating ROD-4 driver instances.
pub struct Rod4Factory;

static ROD4_CAPABILITIES: &[Capability] = &[Capability::Settable];

impl DriverFactory for Rod4Factory {
    fn driver_type(&self) -> &'static str {
        "rod4"
    }

    fn name(&self) -> &'static str {
        "Proterial ROD-4 MFC Operator"
    }

    fn capabilities(&self) -> &'static [Capability] {
        ROD4_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: Rod4Config = config.clone().try_into()?;
        cfg.connection.validate()?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: Rod4Config = config.try_into().context("Invalid ROD-4 config")?;
            let driver = Arc::new(Rod4Driver::new_async(&cfg).await?);

            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::FlowController)
                .with_metadata(DeviceMetadata {
                    measurement_units: Some("%".to_string()),
                    channel_count: Some(u32::from(CHANNEL_COUNT)),
                    ..Default::default()
                })
                .with_settable(driver))
        })
    }
}

// =============================================================================
// Rod4Driver
// =============================================================================

/// Driver for the ROD-4 operator.
///
/// Construction sets every channel's flow unit to sccm and unlocks the
/// keyboard.
pub struct Rod4Driver {
    adapter: Adapter,
    keyboard: Mutex<KeyboardLock>,
    flow_units: Mutex<[FlowUnit; CHANNEL_COUNT as usize]>,
}

impl Rod4Driver {
    /// Open the configured connection and initialize the operator.
    pub async fn new_async(config: &Rod4Config) -> Result<Self> {
        let adapter = Adapter::open("ROD-4", &config.connection, DEFAULT_BAUD_RATE)
            .await?
            .with_read_termination(b'\n')
            .with_write_termination("\r");
        let driver = Self::with_adapter(adapter).await?;
        tracing::info!("ROD-4 ready on {}", driver.adapter.name());
        Ok(driver)
    }

    /// Wrap an existing adapter and initialize the operator.
    pub async fn with_adapter(adapter: Adapter) -> Result<Self> {
        let driver = Self {
            adapter,
            keyboard: Mutex::new(KeyboardLock::Unlocked),
            flow_units: Mutex::new([FlowUnit::Sccm; CHANNEL_COUNT as usize]),
        };
        for number in 1..=CHANNEL_COUNT {
            driver.channel(number)?.set_flow_unit(FlowUnit::Sccm).await?;
        }
        driver.set_keyboard(KeyboardLock::Unlocked).await?;
        Ok(driver)
    }

    /// Handle for MFC channel 1..=4.
    pub fn channel(&self, number: u8) -> Result<Rod4Channel<'_>, DaqError> {
        let number = strict_range(number, 1, CHANNEL_COUNT)?;
        Ok(Rod4Channel {
            driver: self,
            number,
        })
    }

    async fn send(&self, command: String) -> Result<()> {
        self.adapter
            .write(&command)
            .await
            .with_context(|| format!("ROD-4 write {:?} failed", command))
    }

    async fn ask(&self, command: String) -> Result<String> {
        self.adapter
            .ask(&command)
            .await
            .with_context(|| format!("ROD-4 query {:?} failed", command))
    }

    async fn query_f64(&self, command: String) -> Result<f64> {
        self.adapter
            .query_value::<f64>(&command)
            .await
            .with_context(|| format!("ROD-4 query {:?} failed", command))
    }

    /// Firmware version and serial number, `x.xx<TAB>S/N`.
    pub async fn version(&self) -> Result<String> {
        self.ask(format!("{}0RVN", DLE)).await
    }

    /// Last keyboard state written.
    pub fn keyboard(&self) -> KeyboardLock {
        *self.keyboard.lock()
    }

    /// Lock or unlock the front panel keyboard.
    pub async fn set_keyboard(&self, state: KeyboardLock) -> Result<()> {
        let code = KEYBOARD_STATES.to_wire(state)?;
        self.send(format!("{}0SKO{}", DLE, code)).await?;
        *self.keyboard.lock() = state;
        Ok(())
    }

    async fn get_by_name(&self, name: &str) -> Result<Value> {
        let (channel, key) = resolve_name(name)?;
        property::find_readable(ROD4_PROPERTIES, &key)?;
        let value = match (channel, key.as_str()) {
            (None, "version") => json!(self.version().await?),
            (None, "keyboard") => json!(self.keyboard()),
            (Some(n), "ch{n}.actual_flow") => json!(self.channel(n)?.actual_flow().await?),
            (Some(n), "ch{n}.setpoint") => json!(self.channel(n)?.setpoint().await?),
            (Some(n), "ch{n}.mfc_range") => json!(self.channel(n)?.mfc_range().await?),
            (Some(n), "ch{n}.ramp_time") => json!(self.channel(n)?.ramp_time().await?),
            (Some(n), "ch{n}.valve_mode") => json!(self.channel(n)?.valve_mode().await?),
            (Some(n), "ch{n}.flow_unit") => json!(self.channel(n)?.flow_unit()),
            _ => return Err(DaqError::UnknownProperty(name.to_string()).into()),
        };
        Ok(value)
    }

    async fn set_by_name(&self, name: &str, value: &Value) -> Result<()> {
        let (channel, key) = resolve_name(name)?;
        property::find_writable(ROD4_PROPERTIES, &key)?;
        match (channel, key.as_str()) {
            (None, "keyboard") => self.set_keyboard(parse_enum(name, value)?).await,
            (Some(n), "ch{n}.setpoint") => {
                self.channel(n)?
                    .set_setpoint(property::expect_f64(name, value)?)
                    .await
            }
            (Some(n), "ch{n}.mfc_range") => {
                self.channel(n)?
                    .set_mfc_range(property::expect_f64(name, value)?)
                    .await
            }
            (Some(n), "ch{n}.ramp_time") => {
                self.channel(n)?
                    .set_ramp_time(property::expect_f64(name, value)?)
                    .await
            }
            (Some(n), "ch{n}.valve_mode") => {
                self.channel(n)?
                    .set_valve_mode(parse_enum(name, value)?)
                    .await
            }
            (Some(n), "ch{n}.flow_unit") => {
                self.channel(n)?
                    .set_flow_unit(parse_enum(name, value)?)
                    .await
            }
            _ => Err(DaqError::UnknownProperty(name.to_string()).into()),
        }
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(name: &str, value: &Value) -> Result<T, DaqError> {
    // Accept the same spellings regardless of case ("Locked", "SCCM")
    let normalized = match value {
        Value::String(s) => Value::String(s.to_lowercase()),
        other => other.clone(),
    };
    serde_json::from_value(normalized).map_err(|e| DaqError::InvalidArgument {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// Rod4Channel
// =============================================================================

/// One MFC channel of a [`Rod4Driver`].
#[derive(Clone, Copy)]
pub struct Rod4Channel<'a> {
    driver: &'a Rod4Driver,
    number: u8,
}

impl Rod4Channel<'_> {
    /// Channel number (1..=4).
    pub fn number(&self) -> u8 {
        self.number
    }

    fn command(&self, body: &str) -> String {
        format!("{}{}{}", DLE, self.number, body)
    }

    /// Actual flow in % of range.
    pub async fn actual_flow(&self) -> Result<f64> {
        self.driver.query_f64(self.command("RFX")).await
    }

    /// Setpoint in % of range.
    pub async fn setpoint(&self) -> Result<f64> {
        self.driver.query_f64(self.command("RFD")).await
    }

    /// Set the setpoint in %, truncated to 0..=100.
    pub async fn set_setpoint(&self, percent: f64) -> Result<()> {
        let percent = truncated_range(percent, SETPOINT_PERCENT.0, SETPOINT_PERCENT.1)?;
        self.driver
            .send(self.command(&format!("SFD{:.1}", percent)))
            .await
    }

    /// MFC full scale in sccm.
    pub async fn mfc_range(&self) -> Result<f64> {
        self.driver.query_f64(self.command("RFK")).await
    }

    /// Set the MFC full scale in sccm, truncated to 0..=200000.
    pub async fn set_mfc_range(&self, sccm: f64) -> Result<()> {
        let sccm = truncated_range(sccm, MFC_RANGE_SCCM.0, MFC_RANGE_SCCM.1)?;
        self.driver
            .send(self.command(&format!("SFK{}", sccm.trunc() as u32)))
            .await
    }

    /// Setpoint ramp time in s.
    pub async fn ramp_time(&self) -> Result<f64> {
        self.driver.query_f64(self.command("RRT")).await
    }

    /// Set the ramp time in s, truncated to 0..=200000.
    pub async fn set_ramp_time(&self, seconds: f64) -> Result<()> {
        let seconds = truncated_range(seconds, RAMP_TIME_S.0, RAMP_TIME_S.1)?;
        self.driver
            .send(self.command(&format!("SRT{:.1}", seconds)))
            .await
    }

    /// Valve mode.
    pub async fn valve_mode(&self) -> Result<ValveMode> {
        let command = self.command("RVM");
        let code = self
            .driver
            .adapter
            .query_value::<u8>(&command)
            .await
            .with_context(|| format!("ROD-4 query {:?} failed", command))?;
        Ok(VALVE_MODES.from_wire(code)?)
    }

    /// Set the valve mode.
    pub async fn set_valve_mode(&self, mode: ValveMode) -> Result<()> {
        let code = VALVE_MODES.to_wire(mode)?;
        self.driver.send(self.command(&format!("SVM{}", code))).await
    }

    /// Last flow unit written.
    pub fn flow_unit(&self) -> FlowUnit {
        self.driver.flow_units.lock()[usize::from(self.number - 1)]
    }

    /// Set the flow display unit.
    pub async fn set_flow_unit(&self, unit: FlowUnit) -> Result<()> {
        let code = FLOW_UNITS.to_wire(unit)?;
        self.driver.send(self.command(&format!("SFU{}", code))).await?;
        self.driver.flow_units.lock()[usize::from(self.number - 1)] = unit;
        Ok(())
    }
}

#[async_trait]
impl Settable for Rod4Driver {
    #[instrument(skip(self, value), err)]
    async fn set_value(&self, name: &str, value: Value) -> Result<()> {
        self.set_by_name(name, &value).await
    }

    #[instrument(skip(self), err)]
    async fn get_value(&self, name: &str) -> Result<Value> {
        self.get_by_name(name).await
    }

    fn properties(&self) -> &'static [PropertyInfo] {
        ROD4_PROPERTIES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const INIT: &str = "\x101SFU1\r\x102SFU1\r\x103SFU1\r\x104SFU1\r\x100SKO0\r";

    async fn operator() -> (tokio::io::DuplexStream, Rod4Driver) {
        let (host, device) = tokio::io::duplex(1024);
        let adapter = Adapter::from_stream("test rod4", device)
            .with_read_termination(b'\n')
            .with_write_termination("\r");
        let driver = Rod4Driver::with_adapter(adapter).await.unwrap();
        (host, driver)
    }

    async fn sent(mut host: tokio::io::DuplexStream, driver: Rod4Driver) -> String {
        drop(driver);
        let mut buf = Vec::new();
        host.read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = Rod4Factory;
        assert_eq!(factory.driver_type(), "rod4");

        let valid = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB2"
            baud_rate = 9600
        });
        assert!(factory.validate(&valid).is_ok());

        let missing = toml::Value::Table(toml::toml! {
            baud_rate = 9600
        });
        assert!(factory.validate(&missing).is_err());
    }

    #[test]
    fn resolve_channel_names() {
        assert_eq!(
            resolve_name("ch3.setpoint").unwrap(),
            (Some(3), "ch{n}.setpoint".to_string())
        );
        assert_eq!(resolve_name("version").unwrap(), (None, "version".to_string()));
        assert!(resolve_name("chx.setpoint").is_err());
        assert!(resolve_name("ch3").is_err());
    }

    #[tokio::test]
    async fn construction_sets_units_and_unlocks() {
        let (host, driver) = operator().await;
        assert_eq!(driver.keyboard(), KeyboardLock::Unlocked);
        assert_eq!(driver.channel(2).unwrap().flow_unit(), FlowUnit::Sccm);
        assert_eq!(sent(host, driver).await, INIT);
    }

    #[tokio::test]
    async fn channel_numbers_are_checked() {
        let (_host, driver) = operator().await;
        assert!(driver.channel(0).is_err());
        assert!(driver.channel(5).is_err());
        assert_eq!(driver.channel(4).unwrap().number(), 4);
    }

    #[tokio::test]
    async fn version_and_keyboard() {
        let (mut host, driver) = operator().await;

        host.write_all(b"1.02\t12345\r\n").await.unwrap();
        assert_eq!(driver.version().await.unwrap(), "1.02\t12345");

        driver.set_keyboard(KeyboardLock::Locked).await.unwrap();
        assert_eq!(driver.keyboard(), KeyboardLock::Locked);

        assert_eq!(
            sent(host, driver).await,
            format!("{}\x100RVN\r\x100SKO1\r", INIT)
        );
    }

    #[tokio::test]
    async fn channel_setters_truncate() {
        let (host, driver) = operator().await;
        let ch1 = driver.channel(1).unwrap();

        ch1.set_setpoint(50.0).await.unwrap();
        ch1.set_setpoint(120.0).await.unwrap();
        ch1.set_mfc_range(500.0).await.unwrap();
        ch1.set_mfc_range(250_000.0).await.unwrap();
        ch1.set_ramp_time(-3.0).await.unwrap();
        ch1.set_ramp_time(12.34).await.unwrap();

        assert_eq!(
            sent(host, driver).await,
            format!(
                "{}\x101SFD50.0\r\x101SFD100.0\r\x101SFK500\r\x101SFK200000\r\x101SRT0.0\r\x101SRT12.3\r",
                INIT
            )
        );
    }

    #[tokio::test]
    async fn channel_queries() {
        let (mut host, driver) = operator().await;
        let ch4 = driver.channel(4).unwrap();

        host.write_all(b"42.5\r\n50.0\r\n500\r\n10.0\r\n2\r\n").await.unwrap();
        assert_eq!(ch4.actual_flow().await.unwrap(), 42.5);
        assert_eq!(ch4.setpoint().await.unwrap(), 50.0);
        assert_eq!(ch4.mfc_range().await.unwrap(), 500.0);
        assert_eq!(ch4.ramp_time().await.unwrap(), 10.0);
        assert_eq!(ch4.valve_mode().await.unwrap(), ValveMode::Open);

        assert_eq!(
            sent(host, driver).await,
            format!("{}\x104RFX\r\x104RFD\r\x104RFK\r\x104RRT\r\x104RVM\r", INIT)
        );
    }

    #[tokio::test]
    async fn valve_mode_and_flow_unit() {
        let (host, driver) = operator().await;
        let ch2 = driver.channel(2).unwrap();

        ch2.set_valve_mode(ValveMode::Close).await.unwrap();
        ch2.set_flow_unit(FlowUnit::Percent).await.unwrap();
        ch2.set_flow_unit(FlowUnit::Slm).await.unwrap();
        assert_eq!(ch2.flow_unit(), FlowUnit::Slm);
        assert_eq!(driver.channel(3).unwrap().flow_unit(), FlowUnit::Sccm);

        assert_eq!(
            sent(host, driver).await,
            format!("{}\x102SVM1\r\x102SFU0\r\x102SFU1\r", INIT)
        );
    }

    #[tokio::test]
    async fn settable_by_name() {
        let (mut host, driver) = operator().await;

        driver.set_value("ch1.setpoint", json!(25)).await.unwrap();
        driver.set_value("ch2.valve_mode", json!("flow")).await.unwrap();
        driver.set_value("ch3.flow_unit", json!("%")).await.unwrap();
        driver.set_value("keyboard", json!("Locked")).await.unwrap();
        assert!(driver.set_value("ch5.setpoint", json!(25)).await.is_err());
        assert!(driver.set_value("ch1.actual_flow", json!(25)).await.is_err());
        assert!(driver.set_value("ch1.valve_mode", json!("purge")).await.is_err());

        assert_eq!(driver.get_value("keyboard").await.unwrap(), json!("locked"));
        assert_eq!(driver.get_value("ch3.flow_unit").await.unwrap(), json!("%"));

        host.write_all(b"12.5\r\n").await.unwrap();
        assert_eq!(driver.get_value("ch1.actual_flow").await.unwrap(), json!(12.5));

        assert_eq!(
            sent(host, driver).await,
            format!(
                "{}\x101SFD25.0\r\x102SVM0\r\x103SFU0\r\x100SKO1\r\x101RFX\r",
                INIT
            )
        );
    }
}
