//! Serial Port Abstractions for Driver Crates
//!
//! Shared types and helpers for async byte-stream connections, so driver
//! crates do not each redefine them.
//!
//! # Types
//!
//! - [`SerialPortIO`]: Trait alias combining AsyncRead + AsyncWrite
//! - [`DynSerial`]: Type-erased boxed connection
//! - [`SharedPort`]: Thread-safe shared connection with buffered reading
//!
//! # Utilities
//!
//! - [`open_serial_async`]: Open a serial port with spawn_blocking (feature `serial`)
//! - [`connect_tcp`]: Connect to a LAN-to-serial or LAN-to-GPIB gateway
//! - [`drain_serial_buffer`]: Drain stale data from a connection
//!
//! # Example
//!
//! ```rust,ignore
//! use daq_core::serial::{open_serial_async, wrap_shared};
//!
//! let port = open_serial_async("/dev/ttyUSB0", 115200, "KU SG 2.45").await?;
//! let shared = wrap_shared(Box::new(port));
//! ```

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Trait alias for async serial port I/O.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can be used
/// as a serial port. This includes:
/// - `tokio_serial::SerialStream` (real hardware)
/// - `tokio::net::TcpStream` (serial/GPIB-over-LAN gateways)
/// - `tokio::io::DuplexStream` (testing)
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

// =============================================================================
// Type Aliases
// =============================================================================

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Thread-safe shared serial port with buffered reading.
///
/// The `BufReader` enables `read_until()` on the instrument's read terminator.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

/// Create a SharedPort from a type-erased serial port.
pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

// =============================================================================
// Opening Connections
// =============================================================================

/// Open a serial port asynchronously using spawn_blocking.
///
/// Standard settings are applied: 8N1, no flow control.
///
/// # Errors
///
/// Returns an error if the port cannot be opened or spawn_blocking fails.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> anyhow::Result<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();
    let device_name_owned = device_name.to_string();

    spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!(
                "Failed to open {} serial port: {}",
                device_name_owned, port_path_owned
            ))
    })
    .await
    .context("spawn_blocking for serial port opening failed")?
}

/// Connect to a TCP gateway (`host:port`) with a connect timeout.
pub async fn connect_tcp(
    address: &str,
    connect_timeout: Duration,
    device_name: &str,
) -> anyhow::Result<tokio::net::TcpStream> {
    let stream = tokio::time::timeout(connect_timeout, tokio::net::TcpStream::connect(address))
        .await
        .with_context(|| format!("Connection timeout to {} at {}", device_name, address))?
        .with_context(|| format!("Failed to connect to {} at {}", device_name, address))?;

    // Commands are a few bytes each; do not let Nagle hold them back
    stream.set_nodelay(true)?;

    tracing::info!("Connected to {} at {}", device_name, address);
    Ok(stream)
}

// =============================================================================
// Serial Port Utilities
// =============================================================================

/// Drain stale data from a serial port buffer.
///
/// Reads and discards data until nothing arrives within `timeout_ms`.
/// Returns the total number of bytes discarded.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, timeout_ms: u64) -> usize {
    let mut discard = [0u8; 256];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    let mut total_discarded = 0usize;

    loop {
        if tokio::time::Instant::now() >= deadline {
            break;
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break, // EOF or no more data
            Ok(Ok(n)) => {
                total_discarded += n;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Ok(Err(_)) => break, // Real I/O error, abort drain
            Err(_) => break,     // Timeout, no more immediate data
        }
    }

    total_discarded
}
