//! CLI Entry Point for bench-daq
//!
//! # Usage
//!
//! ```bash
//! bench-daq --config hw.toml list
//! bench-daq --config hw.toml get magnetron power_forward
//! bench-daq --config hw.toml set magnetron power_setpoint 120
//! bench-daq --config hw.toml exec scanner exclusive_close '{"channel": 3}'
//! bench-daq drivers
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{anyhow, Result};
use bench_daq::commands;
use bench_daq::{DeviceRegistry, HardwareConfig};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bench-daq", version)]
#[command(about = "Control serial bench instruments from a hardware config", long_about = None)]
struct Cli {
    /// Hardware configuration file (TOML format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured devices
    List,

    /// List driver types compiled into this build
    Drivers,

    /// List serial ports visible to the system
    Ports,

    /// Show a device's properties and commands
    Info {
        /// Device ID
        device: String,
    },

    /// Read a named property
    Get {
        /// Device ID
        device: String,
        /// Property name (e.g. power_forward, ch1.setpoint)
        property: String,
    },

    /// Write a named property
    Set {
        /// Device ID
        device: String,
        /// Property name
        property: String,
        /// New value (JSON, or a bare string)
        value: String,
    },

    /// Run a named command
    Exec {
        /// Device ID
        device: String,
        /// Command name (e.g. tune, exclusive_close)
        command: String,
        /// Arguments as a JSON object
        args: Option<String>,
    },

    /// Read the device's primary measurement
    Read {
        /// Device ID
        device: String,
    },

    /// Switch a source on or off
    Emission {
        /// Device ID
        device: String,
        /// Desired state
        state: OnOff,
    },

    /// Close one scanner channel, opening all others
    Select {
        /// Device ID
        device: String,
        /// Channel number (1-based)
        channel: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OnOff {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    bench_daq::logging::init(cli.verbose)?;

    let registry = match cli.command {
        Commands::Drivers | Commands::Ports => DeviceRegistry::with_builtin_factories(),
        _ => load_registry(cli.config).await?,
    };
    let output = run(&registry, cli.command).await?;

    if !output.is_null() {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

async fn load_registry(config: Option<PathBuf>) -> Result<DeviceRegistry> {
    let path = config.ok_or_else(|| anyhow!("--config <FILE> is required for this command"))?;
    let config = HardwareConfig::from_file(&path)?;
    let registry = daq_hardware::create_registry_from_config(&config).await?;
    tracing::debug!(
        "{} of {} configured device(s) ready",
        registry.len(),
        config.devices.len()
    );
    Ok(registry)
}

async fn run(registry: &DeviceRegistry, command: Commands) -> Result<Value> {
    match command {
        Commands::List => commands::list_devices(registry),
        Commands::Drivers => commands::list_drivers(registry),
        Commands::Ports => commands::list_ports(),
        Commands::Info { device } => commands::describe(registry, &device),
        Commands::Get { device, property } => commands::get(registry, &device, &property).await,
        Commands::Set {
            device,
            property,
            value,
        } => {
            commands::set(registry, &device, &property, commands::parse_value(&value)).await?;
            Ok(Value::Null)
        }
        Commands::Exec {
            device,
            command,
            args,
        } => {
            let args = args
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(|e| anyhow!("Command arguments must be a JSON object: {}", e))?
                .unwrap_or_else(|| Value::Object(Default::default()));
            commands::exec(registry, &device, &command, args).await
        }
        Commands::Read { device } => commands::read(registry, &device).await,
        Commands::Emission { device, state } => {
            commands::emission(registry, &device, matches!(state, OnOff::On)).await
        }
        Commands::Select { device, channel } => {
            commands::select_channel(registry, &device, channel).await?;
            Ok(Value::Null)
        }
    }
}
