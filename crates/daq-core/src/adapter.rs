//! Terminated request/response transport.
//!
//! [`Adapter`] wraps one [`SharedPort`] and knows the instrument's line
//! terminators and read timeout. Drivers never touch the port directly; they
//! call [`Adapter::write`], [`Adapter::ask`] or [`Adapter::query_value`] with
//! the bare command text.
//!
//! The port mutex is held for the whole of an `ask`, so a query's response
//! cannot be picked up by a concurrent caller.
//!
//! ## Example
//!
//! ```rust,ignore
//! let adapter = Adapter::from_stream("magnetron", stream)
//!     .with_read_termination(b'\r')
//!     .with_write_termination("\r");
//!
//! adapter.write("A100").await?;
//! let watts: f64 = adapter.query_value("6").await?;
//! ```

use crate::error::{DaqError, DaqResult};
use crate::serial::{connect_tcp, drain_serial_buffer, wrap_shared, DynSerial, SerialPortIO, SharedPort};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Default read timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Connect timeout for TCP gateways.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `clear_input` keeps discarding arriving bytes.
const CLEAR_WINDOW_MS: u64 = 20;

// =============================================================================
// Connection config
// =============================================================================

/// Where an instrument is attached.
///
/// Embedded with `#[serde(flatten)]` in every driver config, so the TOML reads
/// `port = "/dev/ttyUSB0"` or `address = "192.168.1.50:5025"` directly under
/// `[devices.driver]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port path
    #[serde(default)]
    pub port: Option<String>,
    /// TCP gateway address (`host:port`)
    #[serde(default)]
    pub address: Option<String>,
    /// Serial baud rate; the driver's default when absent
    #[serde(default)]
    pub baud_rate: Option<u32>,
    /// Read timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Resolved endpoint of a [`ConnectionConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Serial port with baud rate
    Serial {
        /// Port path
        port: String,
        /// Baud rate
        baud_rate: u32,
    },
    /// TCP socket (LAN-to-serial or LAN-to-GPIB gateway)
    Tcp {
        /// `host:port`
        address: String,
    },
}

impl ConnectionConfig {
    /// Serial connection on `port`.
    pub fn serial(port: impl Into<String>) -> Self {
        Self {
            port: Some(port.into()),
            ..Self::default()
        }
    }

    /// TCP connection to `address`.
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    /// Check that exactly one of `port` / `address` is set.
    pub fn validate(&self) -> DaqResult<()> {
        match (&self.port, &self.address) {
            (Some(_), Some(_)) => Err(DaqError::Configuration(
                "set either 'port' or 'address', not both".into(),
            )),
            (None, None) => Err(DaqError::Configuration(
                "missing connection: set 'port' (serial) or 'address' (host:port)".into(),
            )),
            (_, Some(address)) if !address.contains(':') => Err(DaqError::Configuration(format!(
                "address '{}' must be host:port",
                address
            ))),
            (Some(port), _) if port.is_empty() => {
                Err(DaqError::Configuration("'port' must not be empty".into()))
            }
            _ => Ok(()),
        }
    }

    /// Resolve to an [`Endpoint`], using `default_baud` when no baud rate is set.
    pub fn endpoint(&self, default_baud: u32) -> DaqResult<Endpoint> {
        self.validate()?;
        if let Some(address) = &self.address {
            return Ok(Endpoint::Tcp {
                address: address.clone(),
            });
        }
        let port = self.port.clone().unwrap_or_default();
        Ok(Endpoint::Serial {
            port,
            baud_rate: self.baud_rate.unwrap_or(default_baud),
        })
    }

    /// Read timeout, or [`DEFAULT_TIMEOUT`].
    pub fn timeout(&self) -> Duration {
        self.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Terminated ASCII transport over a shared port.
///
/// Cloning is cheap and clones share the port.
#[derive(Clone)]
pub struct Adapter {
    name: String,
    port: SharedPort,
    read_termination: u8,
    write_termination: String,
    timeout: Duration,
    /// Set after a read timeout; a late reply may still arrive
    stale: Arc<AtomicBool>,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("name", &self.name)
            .field("read_termination", &(self.read_termination as char))
            .field("write_termination", &self.write_termination)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Adapter {
    /// Wrap any async byte stream. Terminators default to `\n`.
    pub fn from_stream<S: SerialPortIO + 'static>(name: impl Into<String>, stream: S) -> Self {
        Self::from_shared(name, wrap_shared(Box::new(stream)))
    }

    /// Wrap an already shared port.
    pub fn from_shared(name: impl Into<String>, port: SharedPort) -> Self {
        Self {
            name: name.into(),
            port,
            read_termination: b'\n',
            write_termination: "\n".to_string(),
            timeout: DEFAULT_TIMEOUT,
            stale: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the connection described by `config` and discard stale input.
    pub async fn open(
        name: impl Into<String>,
        config: &ConnectionConfig,
        default_baud: u32,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        let port: DynSerial = match config.endpoint(default_baud)? {
            Endpoint::Tcp { address } => {
                Box::new(connect_tcp(&address, CONNECT_TIMEOUT, &name).await?)
            }
            Endpoint::Serial { port, baud_rate } => open_serial(&port, baud_rate, &name).await?,
        };

        let adapter = Self::from_shared(name, wrap_shared(port)).with_timeout(config.timeout());
        adapter.clear_input().await;
        Ok(adapter)
    }

    /// Set the byte that ends every response.
    pub fn with_read_termination(mut self, termination: u8) -> Self {
        self.read_termination = termination;
        self
    }

    /// Set the text appended to every command.
    pub fn with_write_termination(mut self, termination: &str) -> Self {
        self.write_termination = termination.to_string();
        self
    }

    /// Set the read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Device name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one command.
    pub async fn write(&self, command: &str) -> DaqResult<()> {
        let mut port = self.port.lock().await;
        self.write_locked(&mut port, command).await
    }

    /// Read one response.
    pub async fn read(&self) -> DaqResult<String> {
        let mut port = self.port.lock().await;
        self.read_locked(&mut port, "").await
    }

    /// Send a command and read its response without releasing the port.
    ///
    /// After an earlier timeout, input is discarded before the command is
    /// sent so a late reply is not taken as this command's response.
    pub async fn ask(&self, command: &str) -> DaqResult<String> {
        let mut port = self.port.lock().await;
        if self.stale.swap(false, Ordering::AcqRel) {
            self.discard_locked(&mut port).await;
        }
        self.write_locked(&mut port, command).await?;
        self.read_locked(&mut port, command).await
    }

    /// `ask` and parse the response.
    pub async fn query_value<T>(&self, command: &str) -> DaqResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let response = self.ask(command).await?;
        response.parse::<T>().map_err(|e| {
            DaqError::Instrument(format!(
                "{}: cannot parse response {:?} to {:?}: {}",
                self.name, response, command, e
            ))
        })
    }

    /// Discard anything already buffered or arriving within 20 ms.
    pub async fn clear_input(&self) {
        let mut port = self.port.lock().await;
        self.stale.store(false, Ordering::Release);
        self.discard_locked(&mut port).await;
    }

    async fn discard_locked(&self, port: &mut BufReader<DynSerial>) {
        let buffered = port.buffer().len();
        port.consume(buffered);
        let drained = drain_serial_buffer(port.get_mut(), CLEAR_WINDOW_MS).await + buffered;
        if drained > 0 {
            log::debug!("{}: discarded {} stale bytes", self.name, drained);
        }
    }

    async fn write_locked(&self, port: &mut BufReader<DynSerial>, command: &str) -> DaqResult<()> {
        tracing::trace!(device = %self.name, command = %command.escape_debug(), "write");
        let mut frame = Vec::with_capacity(command.len() + self.write_termination.len());
        frame.extend_from_slice(command.as_bytes());
        frame.extend_from_slice(self.write_termination.as_bytes());

        let inner = port.get_mut();
        inner.write_all(&frame).await?;
        inner.flush().await?;
        Ok(())
    }

    async fn read_locked(&self, port: &mut BufReader<DynSerial>, command: &str) -> DaqResult<String> {
        let mut buf = Vec::new();
        let read = match tokio::time::timeout(
            self.timeout,
            port.read_until(self.read_termination, &mut buf),
        )
        .await
        {
            Ok(read) => read?,
            Err(_) => {
                self.discard_locked(port).await;
                self.stale.store(true, Ordering::Release);
                return Err(DaqError::Timeout {
                    device: self.name.clone(),
                    command: command.to_string(),
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };

        if read == 0 || buf.last() != Some(&self.read_termination) {
            return Err(DaqError::SerialUnexpectedEof(self.name.clone()));
        }
        buf.pop();

        let response = String::from_utf8_lossy(&buf).trim().to_string();
        tracing::trace!(device = %self.name, response = %response.escape_debug(), "read");
        Ok(response)
    }
}

#[cfg(feature = "serial")]
async fn open_serial(port: &str, baud_rate: u32, name: &str) -> anyhow::Result<DynSerial> {
    let stream = crate::serial::open_serial_async(port, baud_rate, name).await?;
    Ok(Box::new(stream))
}

#[cfg(not(feature = "serial"))]
async fn open_serial(port: &str, _baud_rate: u32, name: &str) -> anyhow::Result<DynSerial> {
    Err(DaqError::Configuration(format!(
        "{}: serial support not compiled in, cannot open {}",
        name, port
    )))
    .context("daq-core built without the 'serial' feature")
}
