//! Keithley hardware drivers for bench-daq.
//!
//! This crate provides drivers for Keithley instruments, including:
//! - Model 705 Scanner (up to 200 relay channels, 20 per card)
//!
//! # Usage
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! daq-driver-keithley = { path = "../daq-driver-keithley" }
//! ```
//!
//! Register the factory with your device registry:
//!
//! ```rust,ignore
//! use daq_driver_keithley::Keithley705Factory;
//!
//! registry.register_factory(Keithley705Factory);
//! ```

mod keithley705;

pub use keithley705::{
    DateFormat, DisplayMode, Keithley705Config, Keithley705Driver, Keithley705Factory,
    CHANNELS_PER_CARD, MAX_CHANNELS,
};
