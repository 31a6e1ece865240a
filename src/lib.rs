//! bench-daq: command-line control for serial bench instruments.
//!
//! The binary is a thin clap front end over [`commands`]; every command
//! takes a [`DeviceRegistry`] built from a hardware config file and returns a
//! JSON value for printing.
//!
//! Supported instruments (via `daq-hardware` features):
//! - Keithley 705 scanner (`keithley705`)
//! - Kuhne KU SG 2.45 250 A microwave generator (`kusg245_250a`)
//! - Proterial ROD-4 MFC operator (`rod4`)

pub mod commands;
pub mod logging;

pub use daq_hardware::{DeviceRegistry, HardwareConfig};
