//! Custom error types for the instrument framework.
//!
//! This module defines [`DaqError`], the typed error returned by the framework
//! pieces that drivers build on (transport, validators, value maps, property
//! tables). Driver and application code wraps it in `anyhow::Error` with
//! additional context, so `?` works in both directions.
//!
//! ## Error Categories
//!
//! - **Validation**: `InvalidValue`, `InvalidArgument`, `UnknownProperty`,
//!   `UnknownCommand`, `ParameterReadOnly`, `ParameterWriteOnly`. Raised before
//!   anything is written to the wire.
//! - **Transport**: `Io`, `Timeout`, `SerialUnexpectedEof`. Propagated unmodified;
//!   nothing in the framework retries.
//! - **Device**: `Instrument` (unparseable or unexpected response).
//! - **Configuration**: `Configuration`, raised while validating factory configs
//!   or constructor arguments.

use thiserror::Error;

/// Convenience alias for results using the framework error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the instrument framework.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration validation failed.
    ///
    /// Raised when a config value parses but is semantically wrong (e.g. a
    /// power limit above the generator's 250 W rating).
    ///
    /// # Example
    ///
    /// ```rust
    /// use daq_core::error::DaqError;
    ///
    /// fn check_limit(watts: u16) -> Result<(), DaqError> {
    ///     if watts == 0 || watts > 250 {
    ///         return Err(DaqError::Configuration(format!(
    ///             "power_limit must be in 1..=250 W, got {}",
    ///             watts
    ///         )));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed (serial or TCP).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No response within the adapter timeout.
    #[error("Timeout after {timeout_ms} ms waiting for response from {device} to {command:?}")]
    Timeout {
        /// Device name used by the adapter
        device: String,
        /// Command that was sent
        command: String,
        /// Timeout that expired
        timeout_ms: u64,
    },

    /// Connection closed mid-message.
    #[error("Unexpected EOF from {0}")]
    SerialUnexpectedEof(String),

    /// Device sent a response that could not be interpreted.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Value rejected by a strict validator or value map.
    #[error("Value {value} is not allowed (valid: {allowed})")]
    InvalidValue {
        /// Rejected value, formatted
        value: String,
        /// Allowed domain, formatted
        allowed: String,
    },

    /// Argument of the wrong JSON type or shape.
    #[error("Invalid argument for '{name}': {reason}")]
    InvalidArgument {
        /// Property or command argument name
        name: String,
        /// What was wrong
        reason: String,
    },

    /// Name does not match any property of the device.
    #[error("Unknown property '{0}'")]
    UnknownProperty(String),

    /// Name does not match any command of the device.
    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    /// Attempted to set a measurement.
    #[error("Property '{0}' is read-only")]
    ParameterReadOnly(String),

    /// Attempted to read a setting the device cannot report.
    #[error("Property '{0}' is write-only")]
    ParameterWriteOnly(String),
}

impl DaqError {
    /// Build an `InvalidValue` from anything debug-printable.
    pub fn invalid_value(value: impl std::fmt::Debug, allowed: impl std::fmt::Debug) -> Self {
        Self::InvalidValue {
            value: format!("{:?}", value),
            allowed: format!("{:?}", allowed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Instrument("garbled reply".to_string());
        assert_eq!(err.to_string(), "Instrument error: garbled reply");
    }

    #[test]
    fn test_invalid_value_display() {
        let err = DaqError::invalid_value(3u8, [0u8, 1, 2, 4]);
        assert_eq!(err.to_string(), "Value 3 is not allowed (valid: [0, 1, 2, 4])");
    }

    #[test]
    fn test_timeout_display() {
        let err = DaqError::Timeout {
            device: "scanner".into(),
            command: "A?".into(),
            timeout_ms: 500,
        };
        assert!(err.to_string().contains("500 ms"));
        assert!(err.to_string().contains("\"A?\""));
    }
}
