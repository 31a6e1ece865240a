//! Kuhne Electronic hardware drivers for bench-daq.
//!
//! This crate provides drivers for Kuhne Electronic instruments, including:
//! - KU SG 2.45 250 A, 2.45 GHz ISM-band microwave generator (RS-232)
//!
//! # Usage
//!
//! Register the factory with your device registry:
//!
//! ```rust,ignore
//! use daq_driver_kuhne::Kusg245Factory;
//!
//! registry.register_factory(Kusg245Factory);
//! ```

mod kusg245;

pub use kusg245::{
    reflection_limit_at_least, Kusg245Config, Kusg245Driver, Kusg245Factory, MAX_POWER_W,
};
