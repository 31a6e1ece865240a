//! `daq-core`
//!
//! Shared instrument framework for bench-daq drivers.
//!
//! Driver crates describe *what* a device understands (command strings, value
//! domains, wire codes). Everything else lives here:
//!
//! - [`adapter`]: terminated request/response transport over serial or TCP
//! - [`validators`]: strict and truncating value checks, [`validators::ValueMap`]
//! - [`property`]: property/command tables and JSON value coercion
//! - [`capabilities`]: async capability traits drivers implement
//! - [`driver`]: the [`driver::DriverFactory`] plug-in contract
//! - [`error`]: [`error::DaqError`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use daq_core::adapter::Adapter;
//! use daq_core::validators::truncated_range;
//!
//! let adapter = Adapter::from_stream("generator", stream)
//!     .with_read_termination(b'\r')
//!     .with_write_termination("\r");
//!
//! let watts = truncated_range(300u16, 0, 250)?;
//! adapter.write(&format!("A{:03}", watts)).await?;
//! ```

pub mod adapter;
pub mod capabilities;
pub mod driver;
pub mod error;
pub mod property;
pub mod serial;
pub mod validators;

// Re-export commonly used types
pub use anyhow::{anyhow, Result};
pub use error::DaqError;
