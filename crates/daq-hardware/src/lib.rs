//! Hardware registry for bench-daq.
//!
//! - [`registry`]: [`DeviceRegistry`] mapping driver types to factories and
//!   device ids to capability objects
//! - [`config`]: TOML hardware config loading (figment, `BENCH_DAQ_` env
//!   overrides)
//!
//! Driver crates are compiled in through cargo features (`keithley`,
//! `kuhne`, `proterial`, or `all_hardware`).

pub mod config;
pub mod registry;

pub use config::{
    create_registry_from_config, create_registry_from_file, register_devices, HardwareConfig,
    HardwareSettings,
};
pub use registry::{DeviceConfig, DeviceId, DeviceInfo, DeviceRegistry, FactoryInfo};
