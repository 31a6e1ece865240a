//! Kuhne Electronic KU SG 2.45 250 A Microwave Generator Driver
//!
//! 2.45 GHz ISM-band solid-state generator, up to 250 W.
//!
//! Protocol Overview:
//! - Format: ASCII command/response over RS-232 (USB virtual COM)
//! - Baud: 115200, 8N1, no flow control
//! - Command and response terminator: CR (\r)
//! - Setters produce no response
//!
//! | Quantity | Query | Set | Domain |
//! |----------|-------|-----|--------|
//! | external control | `r?` | `R` / `r` | bool |
//! | bias | `x?` | `X` / `x` | bool |
//! | RF output | `o?` | `O` / `o` | bool |
//! | pulse mode | `p?` | `P` / `p` | bool |
//! | fine steps | `fm?` | `fm0` / `fm1` | bool |
//! | frequency (MHz) | `f?` | `f%04d` | 2400..=2500 |
//! | frequency (kHz) | `f?` | `f%07d` | 2400000..=2500000, step 10 |
//! | power setpoint (W) | `A?` | `A%03d` | 0..=power_limit |
//! | pulse width / off time (ms) | `C?` / `c?` | `C%04d` / `c%04d` | 10..=1000, step 5 |
//! | phase (deg) | `H?` | `H%03d` | 0..=358.6, 8 bit |
//! | reflection limit (W) | `B?` | `B%d` | 0, 100, 150, 180, 200, 230 |
//!
//! Bias must be on before RF is enabled; use [`Kusg245Driver::turn_on`] and
//! [`Kusg245Driver::shutdown`] for the safe order.
//!
//! # Usage
//!
//! ```rust,ignore
//! use daq_driver_kuhne::Kusg245Factory;
//!
//! registry.register_factory(Kusg245Factory);
//!
//! let config = toml::toml! {
//!     port = "/dev/ttyUSB1"
//!     power_limit = 100
//! };
//! let components = factory.build(config.into()).await?;
//! ```

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use daq_core::adapter::{Adapter, ConnectionConfig};
use daq_core::capabilities::{Commandable, DeviceCategory, EmissionControl, Readable, Settable};
use daq_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use daq_core::error::DaqError;
use daq_core::property::{self, CommandInfo, PropertyInfo};
use daq_core::validators::{round_to_step, truncated_discrete_set, truncated_range, ValueMap};
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Rated output power.
pub const MAX_POWER_W: u16 = 250;

const FREQ_COARSE_MHZ: (f64, f64) = (2400.0, 2500.0);
const FREQ_FINE_KHZ: (f64, f64) = (2_400_000.0, 2_500_000.0);
const PULSE_MS: (f64, f64) = (10.0, 1000.0);
const PHASE_MAX_DEG: f64 = 358.6;

static FINE_STEPS: ValueMap<bool, u8> = ValueMap::new(&[(false, 0), (true, 1)]);

/// Reflection limit in watts to wire code; 0 disables the limit.
static REFLECTION_LIMITS: ValueMap<u16, u8> =
    ValueMap::new(&[(0, 0), (100, 1), (150, 2), (180, 3), (200, 4), (230, 5)]);

/// Smallest supported reflection limit that is not below `watts`, or the
/// highest limit when `watts` exceeds all of them.
pub fn reflection_limit_at_least(watts: u16) -> Result<u16, DaqError> {
    let limits: Vec<u16> = REFLECTION_LIMITS.keys().collect();
    truncated_discrete_set(watts, &limits)
}

/// Encode a phase in degrees as the 8 bit wire code.
fn phase_to_code(degrees: f64) -> u8 {
    // 358.6 deg encodes to 255
    round_to_step(degrees / 360.0 * 256.0, 1.0) as u8
}

fn phase_from_code(code: f64) -> f64 {
    code / 256.0 * 360.0
}

// =============================================================================
// Property and command tables
// =============================================================================

static KUSG245_PROPERTIES: &[PropertyInfo] = &[
    PropertyInfo::measurement("version", "v", None, "Firmware version"),
    PropertyInfo::measurement("voltage_5v", "5", Some("V"), "Internal 5 V supply"),
    PropertyInfo::measurement("voltage_32v", "8", Some("V"), "32 V supply"),
    PropertyInfo::measurement("power_forward", "6", Some("W"), "Forward power"),
    PropertyInfo::measurement("power_reverse", "7", Some("W"), "Reflected power"),
    PropertyInfo::measurement(
        "temperature",
        "T",
        Some("degC"),
        "Temperature near the final transistor",
    ),
    PropertyInfo::control(
        "external_enabled",
        "r?",
        "R|r",
        None,
        "Enable via the 8-pin connector instead of the serial interface",
    ),
    PropertyInfo::control("bias_enabled", "x?", "X|x", None, "Transistor biasing"),
    PropertyInfo::control("rf_enabled", "o?", "O|o", None, "RF output, requires bias"),
    PropertyInfo::control("pulse_mode_enabled", "p?", "P|p", None, "Pulse mode"),
    PropertyInfo::control(
        "freq_steps_fine_enabled",
        "fm?",
        "fm{}",
        None,
        "10 kHz frequency steps",
    ),
    PropertyInfo::control(
        "frequency_coarse",
        "f?",
        "f{:04}",
        Some("MHz"),
        "Frequency, 1 MHz steps, fine steps disabled",
    ),
    PropertyInfo::control(
        "frequency_fine",
        "f?",
        "f{:07}",
        Some("kHz"),
        "Frequency, 10 kHz steps, fine steps enabled",
    ),
    PropertyInfo::control("power_setpoint", "A?", "A{:03}", Some("W"), "Output power setpoint"),
    PropertyInfo::control("pulse_width", "C?", "C{:04}", Some("ms"), "Pulse on time"),
    PropertyInfo::control("off_time", "c?", "c{:04}", Some("ms"), "Pulse off time"),
    PropertyInfo::control("phase_shift", "H?", "H{:03}", Some("deg"), "Phase shift"),
    PropertyInfo::control(
        "reflection_limit",
        "B?",
        "B{}",
        Some("W"),
        "Reflected power limit: 0 (off), 100, 150, 180, 200 or 230",
    ),
];

static KUSG245_COMMANDS: &[CommandInfo] = &[
    CommandInfo {
        name: "tune",
        args: &["power"],
        description: "Find and set the frequency with lowest reflection at a power",
    },
    CommandInfo {
        name: "clear_vswr_error",
        args: &[],
        description: "Clear the reflection alarm",
    },
    CommandInfo {
        name: "store_settings",
        args: &[],
        description: "Save the current settings to EEPROM",
    },
    CommandInfo {
        name: "shutdown",
        args: &[],
        description: "RF off, then bias off",
    },
    CommandInfo {
        name: "turn_on",
        args: &[],
        description: "Bias on, wait, then RF on",
    },
];

// =============================================================================
// Kusg245Factory - DriverFactory implementation
// =============================================================================

/// Configuration for the KU SG 2.45 250 A driver
#[derive(Debug, Clone, Deserialize)]
pub struct Kusg245Config {
    /// Serial port or TCP gateway
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    /// Upper bound for power setpoint and tune power, in W (default: 250)
    #[serde(default = "default_power_limit")]
    pub power_limit: u16,
    /// Wait between bias on and RF on in `turn_on` (default: 500 ms)
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
}

fn default_power_limit() -> u16 {
    MAX_POWER_W
}

fn default_startup_delay_ms() -> u64 {
    500
}

const DEFAULT_BAUD_RATE: u32 = 115_200;

fn validate_power_limit(power_limit: u16) -> Result<u16, DaqError> {
    if power_limit == 0 || power_limit > MAX_POWER_W {
        return Err(DaqError::Configuration(format!(
            "power_limit must be in 1..={} W, got {}",
            MAX_POWER_W, power_limit
        )));
    }
    Ok(power_limit)
}

/// Factory for creating KU SG 2.45 250 A driver instances.
pub struct Kusg245Factory;

static KUSG245_CAPABILITIES: &[Capability] = &[
    Capability::Readable,
    Capability::EmissionControl,
    Capability::Settable,
    Capability::Commandable,
];

impl DriverFactory for Kusg245Factory {
    fn driver_type(&self) -> &'static str {
        "kusg245_250a"
    }

    fn name(&self) -> &'static str {
        "Kuhne Electronic KU SG 2.45 250 A Microwave Generator"
    }

    fn capabilities(&self) -> &'static [Capability] {
        KUSG245_CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: Kusg245Config = config.clone().try_into()?;
        cfg.connection.validate()?;
        validate_power_limit(cfg.power_limit)?;
        Ok(())
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: Kusg245Config = config.try_into().context("Invalid KU SG 2.45 config")?;
            let driver = Arc::new(Kusg245Driver::new_async(&cfg).await?);

            Ok(DeviceComponents::new()
                .with_category(DeviceCategory::Source)
                .with_metadata(DeviceMetadata {
                    measurement_units: Some("W".to_string()),
                    ..Default::default()
                })
                .with_readable(driver.clone())
                .with_emission_control(driver.clone())
                .with_settable(driver.clone())
                .with_commandable(driver))
        })
    }
}

// =============================================================================
// Kusg245Driver
// =============================================================================

/// Driver for the KU SG 2.45 250 A microwave generator.
pub struct Kusg245Driver {
    adapter: Adapter,
    power_limit: u16,
    startup_delay: Duration,
}

impl Kusg245Driver {
    /// Open the configured connection.
    pub async fn new_async(config: &Kusg245Config) -> Result<Self> {
        let power_limit = validate_power_limit(config.power_limit)?;
        let adapter = Adapter::open("KU SG 2.45 250 A", &config.connection, DEFAULT_BAUD_RATE)
            .await?
            .with_read_termination(b'\r')
            .with_write_termination("\r");
        let driver = Self::with_adapter(adapter, power_limit)?
            .with_startup_delay(Duration::from_millis(config.startup_delay_ms));
        tracing::info!(
            "KU SG 2.45 250 A on {} (power limit {} W)",
            driver.adapter.name(),
            driver.power_limit
        );
        Ok(driver)
    }

    /// Wrap an existing adapter. Fails unless `0 < power_limit <= 250`.
    pub fn with_adapter(adapter: Adapter, power_limit: u16) -> Result<Self> {
        Ok(Self {
            adapter,
            power_limit: validate_power_limit(power_limit)?,
            startup_delay: Duration::from_millis(default_startup_delay_ms()),
        })
    }

    /// Override the wait between bias on and RF on.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Power setpoint limit in W.
    pub fn power_limit(&self) -> u16 {
        self.power_limit
    }

    async fn send(&self, command: &str) -> Result<()> {
        self.adapter
            .write(command)
            .await
            .with_context(|| format!("KU SG 2.45 write {:?} failed", command))
    }

    async fn query_f64(&self, command: &str) -> Result<f64> {
        self.adapter
            .query_value::<f64>(command)
            .await
            .with_context(|| format!("KU SG 2.45 query {:?} failed", command))
    }

    async fn query_flag(&self, command: &str) -> Result<bool> {
        Ok(self.query_f64(command).await? != 0.0)
    }

    /// Query a small integer code; `1` and `1.0` both read as 1.
    async fn query_code(&self, command: &str) -> Result<u8> {
        let value = self.query_f64(command).await?;
        if value.fract() != 0.0 || !(0.0..=f64::from(u8::MAX)).contains(&value) {
            bail!("KU SG 2.45 query {:?}: {} is not a valid code", command, value);
        }
        Ok(value as u8)
    }

    // -------------------------------------------------------------------------
    // Readbacks
    // -------------------------------------------------------------------------

    /// Firmware version string.
    pub async fn version(&self) -> Result<String> {
        self.adapter.ask("v").await.context("KU SG 2.45 version query failed")
    }

    /// Internal 5 V supply in V.
    pub async fn voltage_5v(&self) -> Result<f64> {
        Ok(self.query_f64("5").await? * 103.0 / 4700.0)
    }

    /// 32 V supply in V.
    pub async fn voltage_32v(&self) -> Result<f64> {
        Ok(self.query_f64("8").await? * 1282.0 / 8200.0)
    }

    /// Forward power in W.
    pub async fn power_forward(&self) -> Result<f64> {
        self.query_f64("6").await
    }

    /// Reflected power in W.
    pub async fn power_reverse(&self) -> Result<f64> {
        self.query_f64("7").await
    }

    /// Temperature near the final transistor in degrees C.
    pub async fn temperature(&self) -> Result<f64> {
        self.query_f64("T").await
    }

    // -------------------------------------------------------------------------
    // Boolean controls
    // -------------------------------------------------------------------------

    /// True when enabling is done via the 8-pin connector.
    pub async fn external_enabled(&self) -> Result<bool> {
        self.query_flag("r?").await
    }

    /// Select external (8-pin connector) or serial enabling.
    pub async fn set_external_enabled(&self, enabled: bool) -> Result<()> {
        self.send(if enabled { "R" } else { "r" }).await
    }

    /// Transistor bias state.
    pub async fn bias_enabled(&self) -> Result<bool> {
        self.query_flag("x?").await
    }

    /// Switch transistor bias. Bias must be on before RF is enabled.
    pub async fn set_bias_enabled(&self, enabled: bool) -> Result<()> {
        self.send(if enabled { "X" } else { "x" }).await
    }

    /// RF output state.
    pub async fn rf_enabled(&self) -> Result<bool> {
        self.query_flag("o?").await
    }

    /// Switch RF output.
    pub async fn set_rf_enabled(&self, enabled: bool) -> Result<()> {
        self.send(if enabled { "O" } else { "o" }).await
    }

    /// Pulse mode state.
    pub async fn pulse_mode_enabled(&self) -> Result<bool> {
        self.query_flag("p?").await
    }

    /// Switch pulse mode.
    pub async fn set_pulse_mode_enabled(&self, enabled: bool) -> Result<()> {
        self.send(if enabled { "P" } else { "p" }).await
    }

    /// True when the frequency is set in 10 kHz steps.
    pub async fn freq_steps_fine_enabled(&self) -> Result<bool> {
        let code = self.query_code("fm?").await?;
        Ok(FINE_STEPS.from_wire(code)?)
    }

    /// Select 10 kHz (`true`) or 1 MHz (`false`) frequency steps.
    pub async fn set_freq_steps_fine_enabled(&self, enabled: bool) -> Result<()> {
        let code = FINE_STEPS.to_wire(enabled)?;
        self.send(&format!("fm{}", code)).await
    }

    // -------------------------------------------------------------------------
    // Numeric controls
    // -------------------------------------------------------------------------

    /// Frequency in MHz (coarse mode).
    pub async fn frequency_coarse(&self) -> Result<f64> {
        self.query_f64("f?").await
    }

    /// Set the frequency in MHz, truncated to 2400..=2500. Fine steps must be off.
    pub async fn set_frequency_coarse(&self, mhz: f64) -> Result<()> {
        let mhz = truncated_range(mhz, FREQ_COARSE_MHZ.0, FREQ_COARSE_MHZ.1)?;
        self.send(&format!("f{:04}", mhz.trunc() as u32)).await
    }

    /// Frequency in kHz (fine mode).
    pub async fn frequency_fine(&self) -> Result<f64> {
        self.query_f64("f?").await
    }

    /// Set the frequency in kHz, truncated to 2400000..=2500000 and rounded to
    /// tens. Fine steps must be on.
    pub async fn set_frequency_fine(&self, khz: f64) -> Result<()> {
        let khz = truncated_range(khz, FREQ_FINE_KHZ.0, FREQ_FINE_KHZ.1)?;
        let khz = round_to_step(khz, 10.0);
        self.send(&format!("f{:07}", khz as u32)).await
    }

    /// Output power setpoint in W.
    pub async fn power_setpoint(&self) -> Result<f64> {
        self.query_f64("A?").await
    }

    /// Set the output power in W, truncated to `0..=power_limit`.
    pub async fn set_power_setpoint(&self, watts: f64) -> Result<()> {
        let watts = truncated_range(watts, 0.0, f64::from(self.power_limit))?;
        self.send(&format!("A{:03}", watts.trunc() as u16)).await
    }

    /// Pulse width in ms.
    pub async fn pulse_width(&self) -> Result<f64> {
        self.query_f64("C?").await
    }

    /// Set the pulse width in ms, truncated to 10..=1000 and rounded to 5 ms.
    pub async fn set_pulse_width(&self, ms: f64) -> Result<()> {
        let ms = pulse_ms(ms)?;
        self.send(&format!("C{:04}", ms)).await
    }

    /// Pulse off time in ms.
    pub async fn off_time(&self) -> Result<f64> {
        self.query_f64("c?").await
    }

    /// Set the pulse off time in ms, truncated to 10..=1000 and rounded to 5 ms.
    pub async fn set_off_time(&self, ms: f64) -> Result<()> {
        let ms = pulse_ms(ms)?;
        self.send(&format!("c{:04}", ms)).await
    }

    /// Phase shift in degrees.
    pub async fn phase_shift(&self) -> Result<f64> {
        Ok(phase_from_code(self.query_f64("H?").await?))
    }

    /// Set the phase shift in degrees, truncated to 0..=358.6, 8 bit resolution.
    pub async fn set_phase_shift(&self, degrees: f64) -> Result<()> {
        let degrees = truncated_range(degrees, 0.0, PHASE_MAX_DEG)?;
        self.send(&format!("H{:03}", phase_to_code(degrees))).await
    }

    /// Reflection limit in W (0 = no limit).
    pub async fn reflection_limit(&self) -> Result<u16> {
        let code = self.query_code("B?").await?;
        Ok(REFLECTION_LIMITS.from_wire(code)?)
    }

    /// Set the reflection limit: 0 (no limit), 100, 150, 180, 200 or 230 W.
    ///
    /// When the limit is reached the forward power is reduced and power
    /// control locks until [`Kusg245Driver::clear_vswr_error`].
    pub async fn set_reflection_limit(&self, watts: u16) -> Result<()> {
        let code = REFLECTION_LIMITS.to_wire(watts)?;
        self.send(&format!("B{}", code)).await
    }

    // -------------------------------------------------------------------------
    // Methods
    // -------------------------------------------------------------------------

    /// Find and set the frequency with the lowest reflection at `watts`,
    /// truncated to `0..=power_limit`.
    pub async fn tune(&self, watts: f64) -> Result<()> {
        let watts = truncated_range(watts, 0.0, f64::from(self.power_limit))?;
        self.send(&format!("b{:03}", watts.trunc() as u16)).await
    }

    /// Clear the reflection (VSWR) alarm.
    pub async fn clear_vswr_error(&self) -> Result<()> {
        self.send("z").await
    }

    /// Save frequency mode, frequency, power setpoint, enable source,
    /// reflection limit and pulse times to EEPROM.
    pub async fn store_settings(&self) -> Result<()> {
        self.send("SE").await
    }

    /// RF off, then bias off.
    pub async fn shutdown(&self) -> Result<()> {
        self.set_rf_enabled(false).await?;
        self.set_bias_enabled(false).await
    }

    /// Bias on, wait the startup delay, then RF on.
    pub async fn turn_on(&self) -> Result<()> {
        self.set_bias_enabled(true).await?;
        log::debug!("KU SG 2.45 bias on, waiting {:?} before RF", self.startup_delay);
        tokio::time::sleep(self.startup_delay).await;
        self.set_rf_enabled(true).await
    }

    async fn get_by_name(&self, name: &str) -> Result<Value> {
        property::find_readable(KUSG245_PROPERTIES, name)?;
        let value = match name {
            "version" => json!(self.version().await?),
            "voltage_5v" => json!(self.voltage_5v().await?),
            "voltage_32v" => json!(self.voltage_32v().await?),
            "power_forward" => json!(self.power_forward().await?),
            "power_reverse" => json!(self.power_reverse().await?),
            "temperature" => json!(self.temperature().await?),
            "external_enabled" => json!(self.external_enabled().await?),
            "bias_enabled" => json!(self.bias_enabled().await?),
            "rf_enabled" => json!(self.rf_enabled().await?),
            "pulse_mode_enabled" => json!(self.pulse_mode_enabled().await?),
            "freq_steps_fine_enabled" => json!(self.freq_steps_fine_enabled().await?),
            "frequency_coarse" => json!(self.frequency_coarse().await?),
            "frequency_fine" => json!(self.frequency_fine().await?),
            "power_setpoint" => json!(self.power_setpoint().await?),
            "pulse_width" => json!(self.pulse_width().await?),
            "off_time" => json!(self.off_time().await?),
            "phase_shift" => json!(self.phase_shift().await?),
            "reflection_limit" => json!(self.reflection_limit().await?),
            _ => return Err(DaqError::UnknownProperty(name.to_string()).into()),
        };
        Ok(value)
    }

    async fn set_by_name(&self, name: &str, value: &Value) -> Result<()> {
        property::find_writable(KUSG245_PROPERTIES, name)?;
        match name {
            "external_enabled" => {
                self.set_external_enabled(property::expect_bool(name, value)?)
                    .await
            }
            "bias_enabled" => self.set_bias_enabled(property::expect_bool(name, value)?).await,
            "rf_enabled" => self.set_rf_enabled(property::expect_bool(name, value)?).await,
            "pulse_mode_enabled" => {
                self.set_pulse_mode_enabled(property::expect_bool(name, value)?)
                    .await
            }
            "freq_steps_fine_enabled" => {
                self.set_freq_steps_fine_enabled(property::expect_bool(name, value)?)
                    .await
            }
            "frequency_coarse" => {
                self.set_frequency_coarse(property::expect_f64(name, value)?)
                    .await
            }
            "frequency_fine" => self.set_frequency_fine(property::expect_f64(name, value)?).await,
            "power_setpoint" => self.set_power_setpoint(property::expect_f64(name, value)?).await,
            "pulse_width" => self.set_pulse_width(property::expect_f64(name, value)?).await,
            "off_time" => self.set_off_time(property::expect_f64(name, value)?).await,
            "phase_shift" => self.set_phase_shift(property::expect_f64(name, value)?).await,
            "reflection_limit" => {
                let watts = property::expect_u64(name, value)?;
                let watts = u16::try_from(watts)
                    .map_err(|_| anyhow!("reflection limit {} W out of range", watts))?;
                self.set_reflection_limit(watts).await
            }
            _ => Err(DaqError::UnknownProperty(name.to_string()).into()),
        }
    }
}

/// Truncate to 10..=1000 ms, then round to a multiple of 5 ms.
fn pulse_ms(ms: f64) -> Result<u16, DaqError> {
    let ms = truncated_range(ms, PULSE_MS.0, PULSE_MS.1)?;
    Ok(round_to_step(ms, 5.0) as u16)
}

#[async_trait]
impl Readable for Kusg245Driver {
    #[instrument(skip(self), err)]
    async fn read(&self) -> Result<f64> {
        self.power_forward().await
    }
}

#[async_trait]
impl EmissionControl for Kusg245Driver {
    #[instrument(skip(self), err)]
    async fn enable_emission(&self) -> Result<()> {
        self.turn_on().await
    }

    #[instrument(skip(self), err)]
    async fn disable_emission(&self) -> Result<()> {
        self.shutdown().await
    }

    #[instrument(skip(self), err)]
    async fn is_emission_enabled(&self) -> Result<bool> {
        self.rf_enabled().await
    }
}

#[async_trait]
impl Settable for Kusg245Driver {
    #[instrument(skip(self, value), err)]
    async fn set_value(&self, name: &str, value: Value) -> Result<()> {
        self.set_by_name(name, &value).await
    }

    #[instrument(skip(self), err)]
    async fn get_value(&self, name: &str) -> Result<Value> {
        self.get_by_name(name).await
    }

    fn properties(&self) -> &'static [PropertyInfo] {
        KUSG245_PROPERTIES
    }
}

#[async_trait]
impl Commandable for Kusg245Driver {
    #[instrument(skip(self, args), err)]
    async fn execute_command(&self, command: &str, args: Value) -> Result<Value> {
        property::find_command(KUSG245_COMMANDS, command)?;
        match command {
            "tune" => {
                let watts = property::expect_f64("power", property::arg(&args, "power")?)?;
                self.tune(watts).await?
            }
            "clear_vswr_error" => self.clear_vswr_error().await?,
            "store_settings" => self.store_settings().await?,
            "shutdown" => self.shutdown().await?,
            "turn_on" => self.turn_on().await?,
            _ => return Err(DaqError::UnknownCommand(command.to_string()).into()),
        }
        Ok(Value::Null)
    }

    fn commands(&self) -> &'static [CommandInfo] {
        KUSG245_COMMANDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn generator(power_limit: u16) -> (tokio::io::DuplexStream, Kusg245Driver) {
        let (host, device) = tokio::io::duplex(1024);
        let adapter = Adapter::from_stream("test generator", device)
            .with_read_termination(b'\r')
            .with_write_termination("\r")
            .with_timeout(Duration::from_millis(500));
        let driver = Kusg245Driver::with_adapter(adapter, power_limit).unwrap();
        (host, driver)
    }

    async fn sent(mut host: tokio::io::DuplexStream, driver: Kusg245Driver) -> String {
        drop(driver);
        let mut buf = Vec::new();
        host.read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_factory_driver_type() {
        let factory = Kusg245Factory;
        assert_eq!(factory.driver_type(), "kusg245_250a");
        let caps = factory.capabilities();
        assert!(caps.contains(&Capability::EmissionControl));
        assert!(caps.contains(&Capability::Readable));
    }

    #[test]
    fn test_factory_validate_config() {
        let factory = Kusg245Factory;

        let valid = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB1"
            power_limit = 100
        });
        assert!(factory.validate(&valid).is_ok());

        let default_limit = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB1"
        });
        assert!(factory.validate(&default_limit).is_ok());

        let zero = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB1"
            power_limit = 0
        });
        assert!(factory.validate(&zero).is_err());

        let too_high = toml::Value::Table(toml::toml! {
            port = "/dev/ttyUSB1"
            power_limit = 300
        });
        assert!(factory.validate(&too_high).is_err());
    }

    #[test]
    fn power_limit_is_checked_at_construction() {
        let (_host, device) = tokio::io::duplex(64);
        let adapter = Adapter::from_stream("g", device);
        assert!(Kusg245Driver::with_adapter(adapter.clone(), 0).is_err());
        assert!(Kusg245Driver::with_adapter(adapter.clone(), 251).is_err());
        assert!(Kusg245Driver::with_adapter(adapter, 250).is_ok());
    }

    #[tokio::test]
    async fn readbacks_are_scaled() {
        let (mut host, driver) = generator(250);

        host.write_all(b"4700\r8200\r120\r7\r41.5\rV1.07\r").await.unwrap();
        assert!((driver.voltage_5v().await.unwrap() - 103.0).abs() < 1e-9);
        assert!((driver.voltage_32v().await.unwrap() - 1282.0).abs() < 1e-9);
        assert_eq!(driver.power_forward().await.unwrap(), 120.0);
        assert_eq!(driver.power_reverse().await.unwrap(), 7.0);
        assert_eq!(driver.temperature().await.unwrap(), 41.5);
        assert_eq!(driver.version().await.unwrap(), "V1.07");

        assert_eq!(sent(host, driver).await, "5\r8\r6\r7\rT\rv\r");
    }

    #[tokio::test]
    async fn boolean_controls() {
        let (mut host, driver) = generator(250);

        host.write_all(b"1\r0\r2\r").await.unwrap();
        assert!(driver.bias_enabled().await.unwrap());
        assert!(!driver.rf_enabled().await.unwrap());
        assert!(driver.pulse_mode_enabled().await.unwrap());

        driver.set_external_enabled(false).await.unwrap();
        driver.set_bias_enabled(true).await.unwrap();
        driver.set_pulse_mode_enabled(true).await.unwrap();
        driver.set_rf_enabled(false).await.unwrap();

        assert_eq!(sent(host, driver).await, "x?\ro?\rp?\rr\rX\rP\ro\r");
    }

    #[tokio::test]
    async fn fine_steps_readback_must_be_binary() {
        let (mut host, driver) = generator(250);

        host.write_all(b"1\r3\r").await.unwrap();
        assert!(driver.freq_steps_fine_enabled().await.unwrap());
        assert!(driver.freq_steps_fine_enabled().await.is_err());

        driver.set_freq_steps_fine_enabled(false).await.unwrap();
        assert_eq!(sent(host, driver).await, "fm?\rfm?\rfm0\r");
    }

    #[tokio::test]
    async fn coded_readbacks_accept_decimal_replies() {
        let (mut host, driver) = generator(250);

        host.write_all(b"1.0\r2.0\r0.5\r2.5\r").await.unwrap();
        assert!(driver.freq_steps_fine_enabled().await.unwrap());
        assert_eq!(driver.reflection_limit().await.unwrap(), 150);
        assert!(driver.freq_steps_fine_enabled().await.is_err());
        assert!(driver.reflection_limit().await.is_err());

        assert_eq!(sent(host, driver).await, "fm?\rB?\rfm?\rB?\r");
    }

    #[tokio::test]
    async fn frequency_is_truncated_and_rounded() {
        let (host, driver) = generator(250);

        driver.set_frequency_coarse(2450.0).await.unwrap();
        driver.set_frequency_coarse(2300.0).await.unwrap();
        driver.set_frequency_coarse(2600.0).await.unwrap();
        driver.set_frequency_fine(2_450_004.0).await.unwrap();
        driver.set_frequency_fine(2_450_005.0).await.unwrap();
        driver.set_frequency_fine(2_450_015.0).await.unwrap();
        driver.set_frequency_fine(2_600_000.0).await.unwrap();

        assert_eq!(
            sent(host, driver).await,
            "f2450\rf2400\rf2500\rf2450000\rf2450000\rf2450020\rf2500000\r"
        );
    }

    #[tokio::test]
    async fn power_setpoint_clamps_to_limit() {
        let (host, driver) = generator(100);

        driver.set_power_setpoint(50.0).await.unwrap();
        driver.set_power_setpoint(150.0).await.unwrap();
        driver.set_power_setpoint(-5.0).await.unwrap();
        driver.tune(300.0).await.unwrap();
        driver.tune(7.0).await.unwrap();

        assert_eq!(sent(host, driver).await, "A050\rA100\rA000\rb100\rb007\r");
    }

    #[tokio::test]
    async fn pulse_times_round_to_five_ms() {
        let (host, driver) = generator(250);

        driver.set_pulse_width(123.0).await.unwrap();
        driver.set_pulse_width(122.5).await.unwrap();
        driver.set_pulse_width(127.5).await.unwrap();
        driver.set_pulse_width(1.0).await.unwrap();
        driver.set_off_time(2000.0).await.unwrap();
        driver.set_off_time(42.0).await.unwrap();

        assert_eq!(
            sent(host, driver).await,
            "C0125\rC0120\rC0130\rC0010\rc1000\rc0040\r"
        );
    }

    #[tokio::test]
    async fn phase_shift_round_trips_within_one_step() {
        let step = 360.0 / 256.0;
        for degrees in [0.0, 1.0, 45.3, 90.0, 180.7, 270.2, 358.6] {
            let (mut host, driver) = generator(250);
            driver.set_phase_shift(degrees).await.unwrap();

            let mut frame = [0u8; 5];
            host.read_exact(&mut frame).await.unwrap();
            assert_eq!(frame[0], b'H');
            let code = std::str::from_utf8(&frame[1..4]).unwrap();

            host.write_all(format!("{}\r", code).as_bytes()).await.unwrap();
            let read_back = driver.phase_shift().await.unwrap();
            assert!(
                (read_back - degrees).abs() <= step,
                "{} -> {} -> {}",
                degrees,
                code,
                read_back
            );
        }
    }

    #[tokio::test]
    async fn phase_shift_is_truncated() {
        let (host, driver) = generator(250);
        driver.set_phase_shift(400.0).await.unwrap();
        driver.set_phase_shift(-1.0).await.unwrap();
        assert_eq!(sent(host, driver).await, "H255\rH000\r");
    }

    #[tokio::test]
    async fn reflection_limit_is_strict() {
        let (mut host, driver) = generator(250);

        for (watts, code) in [(0u16, 0u8), (100, 1), (150, 2), (180, 3), (200, 4), (230, 5)] {
            driver.set_reflection_limit(watts).await.unwrap();
            host.write_all(format!("{}\r", code).as_bytes()).await.unwrap();
            assert_eq!(driver.reflection_limit().await.unwrap(), watts);
        }
        assert!(driver.set_reflection_limit(120).await.is_err());
        assert!(driver.set_reflection_limit(250).await.is_err());

        assert_eq!(
            sent(host, driver).await,
            "B0\rB?\rB1\rB?\rB2\rB?\rB3\rB?\rB4\rB?\rB5\rB?\r"
        );
    }

    #[test]
    fn reflection_limit_at_least_picks_next_allowed() {
        assert_eq!(reflection_limit_at_least(0).unwrap(), 0);
        assert_eq!(reflection_limit_at_least(120).unwrap(), 150);
        assert_eq!(reflection_limit_at_least(230).unwrap(), 230);
        assert_eq!(reflection_limit_at_least(240).unwrap(), 230);
        assert!(REFLECTION_LIMITS.is_bijective());
    }

    #[tokio::test]
    async fn methods_write_expected_commands() {
        let (host, driver) = generator(250);

        driver.clear_vswr_error().await.unwrap();
        driver.store_settings().await.unwrap();
        driver.shutdown().await.unwrap();

        assert_eq!(sent(host, driver).await, "z\rSE\ro\rx\r");
    }

    #[tokio::test(start_paused = true)]
    async fn turn_on_biases_before_rf_with_delay() {
        let (mut host, driver) = generator(250);
        let driver = Arc::new(driver);

        let started = tokio::time::Instant::now();
        let task = tokio::spawn({
            let driver = driver.clone();
            async move { driver.turn_on().await }
        });

        let mut frame = [0u8; 2];
        host.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame, b"X\r");

        host.read_exact(&mut frame).await.unwrap();
        assert_eq!(&frame, b"O\r");
        assert!(started.elapsed() >= Duration::from_millis(500));

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn emission_control_uses_safe_sequences() {
        let (mut host, driver) = generator(250);
        let driver = driver.with_startup_delay(Duration::ZERO);

        driver.enable_emission().await.unwrap();
        driver.disable_emission().await.unwrap();
        host.write_all(b"0\r").await.unwrap();
        assert!(!driver.is_emission_enabled().await.unwrap());

        assert_eq!(sent(host, driver).await, "X\rO\ro\rx\ro?\r");
    }

    #[tokio::test]
    async fn settable_by_name() {
        let (mut host, driver) = generator(250);

        driver.set_value("power_setpoint", json!(80)).await.unwrap();
        driver.set_value("rf_enabled", json!(false)).await.unwrap();
        driver.set_value("reflection_limit", json!(200)).await.unwrap();
        assert!(driver.set_value("temperature", json!(20)).await.is_err());
        assert!(driver.set_value("bias_enabled", json!("yes")).await.is_err());

        host.write_all(b"36.6\r").await.unwrap();
        assert_eq!(driver.get_value("temperature").await.unwrap(), json!(36.6));
        assert!(driver.get_value("wattage").await.is_err());

        assert_eq!(sent(host, driver).await, "A080\ro\rB4\rT\r");
    }

    #[tokio::test]
    async fn commands_by_name() {
        let (host, driver) = generator(200);

        driver
            .execute_command("tune", json!({"power": 210}))
            .await
            .unwrap();
        driver
            .execute_command("clear_vswr_error", Value::Null)
            .await
            .unwrap();
        assert!(driver.execute_command("tune", json!({})).await.is_err());
        assert!(driver.execute_command("reboot", Value::Null).await.is_err());

        assert_eq!(sent(host, driver).await, "b200\rz\r");
    }
}
