//! Proterial hardware drivers for bench-daq.
//!
//! This crate provides drivers for Proterial (formerly Hitachi Metals)
//! instruments, including:
//! - ROD-4(A) operator for up to four mass flow controllers (RS-232)
//!
//! # Usage
//!
//! Register the factory with your device registry:
//!
//! ```rust,ignore
//! use daq_driver_proterial::Rod4Factory;
//!
//! registry.register_factory(Rod4Factory);
//! ```

mod rod4;

pub use rod4::{
    FlowUnit, KeyboardLock, Rod4Channel, Rod4Config, Rod4Driver, Rod4Factory, ValveMode,
    CHANNEL_COUNT,
};
