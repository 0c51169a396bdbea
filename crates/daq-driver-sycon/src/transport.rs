//! Serial transport for the STM-100 (RS-232, 8N1, no flow control).
//!
//! Wraps the blocking `serialport` crate. Every read and write is bounded by
//! the configured per-call timeout; an expired read surfaces as
//! [`std::io::ErrorKind::TimedOut`], which the session reports as a
//! recoverable timeout.
//!
//! Ports can be named either by device path (`/dev/ttyUSB0`, `COM3`) or by the
//! VISA serial resource form used by existing lab configurations
//! (`ASRL/dev/ttyUSB0::INSTR`).

use std::io::{self, Read, Write};
use std::time::Duration;

use daq_core::{DaqError, Result, Transport};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

/// Resolve a port identifier to an OS device path.
///
/// Accepts plain paths unchanged and strips the `ASRL` prefix and `::INSTR`
/// suffix of VISA serial resource names. Numeric VISA board indices
/// (`ASRL3::INSTR`) are rejected because their mapping is platform specific.
pub fn resolve_port(identifier: &str) -> Result<String> {
    let trimmed = identifier.trim();
    if trimmed.is_empty() {
        return Err(DaqError::InvalidArgument("empty port identifier".to_string()));
    }

    let Some(rest) = trimmed.strip_prefix("ASRL") else {
        return Ok(trimmed.to_string());
    };
    let path = rest.strip_suffix("::INSTR").unwrap_or(rest);

    if path.is_empty() {
        return Err(DaqError::InvalidArgument(format!(
            "VISA resource '{}' names no serial device",
            identifier
        )));
    }
    if path.chars().all(|c| c.is_ascii_digit()) {
        return Err(DaqError::InvalidArgument(format!(
            "VISA board index in '{}' is not supported, use the device path (e.g. ASRL/dev/ttyUSB0::INSTR)",
            identifier
        )));
    }
    Ok(path.to_string())
}

/// Blocking serial port owned by one session.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
    timeout: Duration,
}

impl SerialTransport {
    /// Open `identifier` at `baud_rate` with the given per-call timeout.
    ///
    /// # Errors
    /// Returns [`DaqError::Connection`] if the identifier names no usable
    /// device or the port cannot be opened.
    pub fn open(identifier: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let path = resolve_port(identifier).map_err(|e| DaqError::Connection {
            port: identifier.to_string(),
            reason: match e {
                DaqError::InvalidArgument(reason) => reason,
                other => other.to_string(),
            },
        })?;

        let port = serialport::new(&path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| DaqError::Connection {
                port: path.clone(),
                reason: e.to_string(),
            })?;

        info!(port = %path, baud_rate, timeout_ms = timeout.as_millis() as u64, "Serial port opened");

        Ok(Self {
            port,
            path,
            timeout,
        })
    }

    /// Resolved device path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn flush_input(&mut self) -> io::Result<()> {
        debug!(port = %self.path, "Discarding serial input buffer");
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn describe(&self) -> String {
        self.path.clone()
    }

    fn close(&mut self) -> io::Result<()> {
        // The OS handle is released when the port is dropped with the session.
        self.port.flush()?;
        info!(port = %self.path, "Serial port closed");
        Ok(())
    }
}
