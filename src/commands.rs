//! CLI command implementations.
//!
//! Each function resolves a device by id, picks the capability it needs and
//! returns a JSON value. Missing devices and missing capabilities are
//! reported with the device id so the user can fix the config.

use anyhow::{anyhow, Context, Result};
use daq_hardware::DeviceRegistry;
use serde_json::{json, Value};
use std::sync::Arc;

fn require<T: ?Sized>(
    registry: &DeviceRegistry,
    id: &str,
    capability: Option<Arc<T>>,
    what: &str,
) -> Result<Arc<T>> {
    if !registry.contains(id) {
        let known: Vec<String> = registry.list_devices().into_iter().map(|d| d.id).collect();
        return Err(anyhow!(
            "Unknown device '{}' (configured: {})",
            id,
            known.join(", ")
        ));
    }
    capability.ok_or_else(|| anyhow!("Device '{}' does not support {}", id, what))
}

/// Parse a command-line value as JSON, falling back to a plain string.
///
/// `180`, `true` and `{"channel": 3}` are JSON; `sccm` becomes `"sccm"`.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// All configured devices.
pub fn list_devices(registry: &DeviceRegistry) -> Result<Value> {
    serde_json::to_value(registry.list_devices()).context("Failed to serialize device list")
}

/// All driver types compiled into this build.
pub fn list_drivers(registry: &DeviceRegistry) -> Result<Value> {
    serde_json::to_value(registry.list_factories()).context("Failed to serialize driver list")
}

/// Serial ports visible to the operating system.
pub fn list_ports() -> Result<Value> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    Ok(Value::Array(
        ports
            .into_iter()
            .map(|p| {
                let kind = match p.port_type {
                    serialport::SerialPortType::UsbPort(info) => json!({
                        "usb": {
                            "vid": format!("{:04x}", info.vid),
                            "pid": format!("{:04x}", info.pid),
                            "manufacturer": info.manufacturer,
                            "product": info.product,
                        }
                    }),
                    serialport::SerialPortType::PciPort => json!("pci"),
                    serialport::SerialPortType::BluetoothPort => json!("bluetooth"),
                    serialport::SerialPortType::Unknown => json!("unknown"),
                };
                json!({ "port": p.port_name, "type": kind })
            })
            .collect(),
    ))
}

/// Device info plus its property and command tables.
pub fn describe(registry: &DeviceRegistry, id: &str) -> Result<Value> {
    let info = registry
        .get_device_info(id)
        .ok_or_else(|| anyhow!("Unknown device '{}'", id))?;
    let properties = registry
        .get_settable(id)
        .map(|s| s.properties())
        .unwrap_or_default();
    let commands = registry
        .get_commandable(id)
        .map(|c| c.commands())
        .unwrap_or_default();

    Ok(json!({
        "device": info,
        "properties": properties,
        "commands": commands,
    }))
}

/// Read a named property.
pub async fn get(registry: &DeviceRegistry, id: &str, property: &str) -> Result<Value> {
    let settable = require(registry, id, registry.get_settable(id), "named properties")?;
    settable
        .get_value(property)
        .await
        .with_context(|| format!("{}: get {}", id, property))
}

/// Write a named property.
pub async fn set(registry: &DeviceRegistry, id: &str, property: &str, value: Value) -> Result<()> {
    let settable = require(registry, id, registry.get_settable(id), "named properties")?;
    settable
        .set_value(property, value)
        .await
        .with_context(|| format!("{}: set {}", id, property))
}

/// Run a named command.
pub async fn exec(registry: &DeviceRegistry, id: &str, command: &str, args: Value) -> Result<Value> {
    let commandable = require(registry, id, registry.get_commandable(id), "commands")?;
    commandable
        .execute_command(command, args)
        .await
        .with_context(|| format!("{}: exec {}", id, command))
}

/// Read the device's primary measurement.
pub async fn read(registry: &DeviceRegistry, id: &str) -> Result<Value> {
    let readable = require(registry, id, registry.get_readable(id), "reading")?;
    let value = readable.read().await.with_context(|| format!("{}: read", id))?;
    let units = registry
        .get_device_info(id)
        .and_then(|info| info.metadata.measurement_units);
    Ok(json!({ "value": value, "units": units }))
}

/// Switch emission on or off, then report the state if the device can.
pub async fn emission(registry: &DeviceRegistry, id: &str, on: bool) -> Result<Value> {
    let control = require(registry, id, registry.get_emission_control(id), "emission control")?;
    let result = if on {
        control.enable_emission().await
    } else {
        control.disable_emission().await
    };
    result.with_context(|| format!("{}: emission {}", id, if on { "on" } else { "off" }))?;

    Ok(match control.is_emission_enabled().await {
        Ok(enabled) => json!({ "emission": enabled }),
        Err(_) => json!({ "emission": on }),
    })
}

/// Open every other channel and close `channel`.
pub async fn select_channel(registry: &DeviceRegistry, id: &str, channel: u32) -> Result<()> {
    let switch = require(registry, id, registry.get_channel_switch(id), "channel switching")?;
    switch
        .exclusive_close(channel)
        .await
        .with_context(|| format!("{}: select channel {}", id, channel))
}
