//! Static property and command tables.
//!
//! Each driver publishes a `&'static [PropertyInfo]` listing every named
//! property with its wire templates, and a `&'static [CommandInfo]` for named
//! methods. The tables drive name-based dispatch in the `Settable` /
//! `Commandable` impls and the CLI's introspection output. The templates are
//! documentation; the typed accessor methods do the actual formatting.
//!
//! The `expect_*` helpers coerce JSON values for name-based setters.

use crate::error::{DaqError, DaqResult};
use serde::Serialize;
use serde_json::Value;

/// One named property of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PropertyInfo {
    /// Property name used by `get_value` / `set_value`
    pub name: &'static str,
    /// Query command, if the device can report the value
    pub query: Option<&'static str>,
    /// Set command template, if the value can be written
    pub set_template: Option<&'static str>,
    /// Physical unit
    pub unit: Option<&'static str>,
    /// Short description
    pub description: &'static str,
    /// Readback comes from the driver's cache, not a device query
    pub cached: bool,
}

impl PropertyInfo {
    /// Readable (has a query) property.
    pub const fn measurement(
        name: &'static str,
        query: &'static str,
        unit: Option<&'static str>,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            query: Some(query),
            set_template: None,
            unit,
            description,
            cached: false,
        }
    }

    /// Write-only property.
    pub const fn setting(
        name: &'static str,
        set_template: &'static str,
        unit: Option<&'static str>,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            query: None,
            set_template: Some(set_template),
            unit,
            description,
            cached: false,
        }
    }

    /// Readable and writable property.
    pub const fn control(
        name: &'static str,
        query: &'static str,
        set_template: &'static str,
        unit: Option<&'static str>,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            query: Some(query),
            set_template: Some(set_template),
            unit,
            description,
            cached: false,
        }
    }

    /// Write-only on the wire, read back from the last value written.
    pub const fn cached(
        name: &'static str,
        set_template: &'static str,
        unit: Option<&'static str>,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            query: None,
            set_template: Some(set_template),
            unit,
            description,
            cached: true,
        }
    }

    /// True when the device (or the driver's cache) can report this property.
    pub fn is_readable(&self) -> bool {
        self.query.is_some() || self.cached
    }

    /// True when this property can be written.
    pub fn is_writable(&self) -> bool {
        self.set_template.is_some()
    }
}

/// One named command (method) of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    /// Command name used by `execute_command`
    pub name: &'static str,
    /// Argument names expected in the JSON args object
    pub args: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Look up a property by name.
pub fn find(table: &'static [PropertyInfo], name: &str) -> DaqResult<&'static PropertyInfo> {
    table
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| DaqError::UnknownProperty(name.to_string()))
}

/// Look up a property and require that it is readable.
pub fn find_readable(table: &'static [PropertyInfo], name: &str) -> DaqResult<&'static PropertyInfo> {
    let info = find(table, name)?;
    if info.is_readable() {
        Ok(info)
    } else {
        Err(DaqError::ParameterWriteOnly(name.to_string()))
    }
}

/// Look up a property and require that it is writable.
pub fn find_writable(table: &'static [PropertyInfo], name: &str) -> DaqResult<&'static PropertyInfo> {
    let info = find(table, name)?;
    if info.is_writable() {
        Ok(info)
    } else {
        Err(DaqError::ParameterReadOnly(name.to_string()))
    }
}

/// Look up a command by name.
pub fn find_command(table: &'static [CommandInfo], name: &str) -> DaqResult<&'static CommandInfo> {
    table
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| DaqError::UnknownCommand(name.to_string()))
}

// =============================================================================
// JSON coercion
// =============================================================================

fn invalid(name: &str, expected: &str, value: &Value) -> DaqError {
    DaqError::InvalidArgument {
        name: name.to_string(),
        reason: format!("expected {}, got {}", expected, value),
    }
}

/// Any JSON number as `f64`.
pub fn expect_f64(name: &str, value: &Value) -> DaqResult<f64> {
    value.as_f64().ok_or_else(|| invalid(name, "a number", value))
}

/// Non-negative JSON integer.
pub fn expect_u64(name: &str, value: &Value) -> DaqResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| invalid(name, "a non-negative integer", value))
}

/// JSON boolean; `0` and `1` are accepted as well.
pub fn expect_bool(name: &str, value: &Value) -> DaqResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
        _ => Err(invalid(name, "a boolean", value)),
    }
}

/// Field `field` of a JSON args object.
pub fn arg<'a>(args: &'a Value, field: &str) -> DaqResult<&'a Value> {
    args.get(field).ok_or_else(|| DaqError::InvalidArgument {
        name: field.to_string(),
        reason: "missing argument".to_string(),
    })
}
