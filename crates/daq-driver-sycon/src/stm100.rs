//! Sycon STM-100 rate/thickness monitor session
//!
//! One [`Stm100Driver`] owns one transport and talks to one controller over a
//! strictly half-duplex request/response protocol: every command is sent in a
//! single frame and answered by exactly one reply frame whose first payload
//! byte is a status character.
//!
//! ## Configuration
//!
//! ```toml
//! [stm100]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! timeout_ms = 200
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use daq_driver_sycon::{Stm100Config, Stm100Driver};
//!
//! # fn main() -> daq_core::Result<()> {
//! let mut qcm = Stm100Driver::from_config(&Stm100Config::load()?)?;
//! qcm.set_density(2.7)?;
//! println!("{} Å at {} Å/s", qcm.thickness()?, qcm.rate()?);
//! qcm.close()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use daq_core::limits::DEFAULT_IO_TIMEOUT;
use daq_core::{DaqError, Result, Transport};
use tracing::{debug, error, info, trace, warn};

use crate::attributes::{self, AttributeSpec, AttributeValue};
use crate::config::Stm100Config;
use crate::frame::{self, FrameError, Response};
use crate::transport::SerialTransport;
use crate::values::{
    parse_bool, parse_float, parse_timer, FilmParameters, InstrumentHealth, PowerOnStatus,
    ZeroTarget, FILM_SLOTS,
};

/// Command reading the power-on status byte.
const POWER_ON_STATUS: &str = "a";
/// Command clearing the power-on status bits.
const ACK_POWER_ON_STATUS: &str = "L";

/// Exchange state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Ready for the next command.
    Idle,
    /// A request was written and its reply is being read.
    AwaitingReply,
    /// The transport was closed; every call fails with [`DaqError::SessionClosed`].
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingReply => write!(f, "awaiting reply"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Protocol session with one STM-100 controller.
pub struct Stm100Driver {
    transport: Option<Box<dyn Transport>>,
    description: String,
    state: SessionState,
    last_status: Option<char>,
    films: Option<Vec<FilmParameters>>,
}

impl fmt::Debug for Stm100Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stm100Driver")
            .field("transport", &self.description)
            .field("state", &self.state)
            .field("last_status", &self.last_status)
            .finish()
    }
}

impl Stm100Driver {
    /// Open a serial port with the default baud rate and timeout.
    ///
    /// `identifier` is a device path or a VISA serial resource name. An
    /// identifier that names no usable device fails with
    /// [`DaqError::Connection`], like a port that cannot be opened.
    pub fn open(identifier: &str) -> Result<Self> {
        let transport = SerialTransport::open(identifier, 9600, DEFAULT_IO_TIMEOUT)?;
        Ok(Self::with_transport(transport))
    }

    /// Open the serial port described by `config`.
    pub fn from_config(config: &Stm100Config) -> Result<Self> {
        config.validate()?;
        let transport = SerialTransport::open(&config.port, config.baud_rate, config.timeout())?;
        Ok(Self::with_transport(transport))
    }

    /// Wrap an already open transport.
    pub fn with_transport<T: Transport + 'static>(transport: T) -> Self {
        let description = transport.describe();
        debug!(transport = %description, "STM-100 session created");
        Self {
            transport: Some(Box::new(transport)),
            description,
            state: SessionState::Idle,
            last_status: None,
            films: None,
        }
    }

    /// Description of the underlying transport (port path, "mock", ...).
    pub fn transport_description(&self) -> &str {
        &self.description
    }

    /// Current exchange state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Status character of the most recent successful exchange.
    ///
    /// Failed exchanges and replies without a payload leave it unchanged.
    pub fn last_status(&self) -> Option<char> {
        self.last_status
    }

    /// Controller health derived from [`last_status`](Self::last_status).
    pub fn health(&self) -> InstrumentHealth {
        InstrumentHealth::from_status(self.last_status)
    }

    /// Close the transport.
    ///
    /// # Errors
    /// [`DaqError::SessionClosed`] if already closed; [`DaqError::Transport`]
    /// if the transport reported a failure while closing (the session is
    /// closed regardless).
    pub fn close(&mut self) -> Result<()> {
        let mut transport = self.transport.take().ok_or(DaqError::SessionClosed)?;
        self.state = SessionState::Closed;
        self.films = None;

        transport.close().map_err(|source| DaqError::Transport {
            command: "close".to_string(),
            source,
        })?;
        info!(transport = %self.description, "STM-100 session closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.transport.is_none() {
            return Err(DaqError::SessionClosed);
        }
        Ok(())
    }

    // =========================================================================
    // Raw exchange
    // =========================================================================

    /// Send `command` and return the full decoded reply.
    pub fn exchange(&mut self, command: &str) -> Result<Response> {
        let transport = self.transport.as_mut().ok_or(DaqError::SessionClosed)?;
        let request = frame::encode(command)
            .map_err(|err| frame_failure(command, DEFAULT_IO_TIMEOUT, err))?;

        self.state = SessionState::AwaitingReply;
        let result = transact(&mut **transport, command, &request);
        self.state = SessionState::Idle;

        let response = result?;
        if let Some(status) = response.status() {
            self.last_status = Some(status);
        }
        debug!(
            command,
            status = ?response.status(),
            body = response.body(),
            "STM-100 reply"
        );
        Ok(response)
    }

    /// Send `command` and return the reply body.
    ///
    /// # Errors
    /// - [`DaqError::CommandTooLong`] before any I/O
    /// - [`DaqError::TransportTimeout`] if the reply did not arrive in time
    /// - [`DaqError::Framing`] if the reply did not start with the start byte;
    ///   buffered input has been discarded
    /// - [`DaqError::SessionClosed`] after [`close`](Self::close)
    pub fn query(&mut self, command: &str) -> Result<String> {
        Ok(self.exchange(command)?.into_body())
    }

    fn query_float(&mut self, command: &str) -> Result<f64> {
        let body = self.query(command)?;
        let value = parse_float(&body);
        if value.is_nan() {
            warn!(command, body = %body, "Non-numeric reply, reporting NaN");
        }
        Ok(value)
    }

    // =========================================================================
    // Table-driven access
    // =========================================================================

    fn read_float(&mut self, spec: &AttributeSpec) -> Result<f64> {
        self.query_float(spec.read)
    }

    fn read_bool(&mut self, spec: &AttributeSpec) -> Result<bool> {
        let body = self.query(spec.read)?;
        parse_bool(spec.read, &body)
    }

    fn write_numeric(&mut self, spec: &AttributeSpec, value: f64) -> Result<()> {
        self.ensure_open()?;
        let command = spec.numeric_command(value)?;
        self.query(&command)?;
        Ok(())
    }

    fn write_switch(&mut self, spec: &AttributeSpec, on: bool) -> Result<()> {
        let command = spec.switch_command(on)?;
        self.query(&command)?;
        Ok(())
    }

    /// Read an attribute by name.
    pub fn read_attribute(&mut self, name: &str) -> Result<AttributeValue> {
        self.ensure_open()?;
        let spec = attributes::require(name)?;
        let body = self.query(spec.read)?;
        let value = spec.parse(&body)?;
        if matches!(value, AttributeValue::Float(v) if v.is_nan()) {
            warn!(command = spec.read, body = %body, "Non-numeric reply, reporting NaN");
        }
        Ok(value)
    }

    /// Write an attribute by name.
    ///
    /// # Errors
    /// [`DaqError::InvalidArgument`] for unknown or read-only attributes and
    /// mismatched value kinds; [`DaqError::OutOfRange`] before any I/O.
    pub fn write_attribute(&mut self, name: &str, value: &AttributeValue) -> Result<()> {
        self.ensure_open()?;
        let spec = attributes::require(name)?;
        let command = spec.write_command(value)?;
        self.query(&command)?;
        Ok(())
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    /// Controller model and firmware revision.
    pub fn identify(&mut self) -> Result<String> {
        self.query(attributes::MODEL.read)
    }

    /// Thickness of the current film in Å (`NaN` if unknown).
    pub fn thickness(&mut self) -> Result<f64> {
        self.read_float(&attributes::THICKNESS)
    }

    /// Thickness setpoint in Å.
    pub fn setpoint(&mut self) -> Result<f64> {
        self.read_float(&attributes::SETPOINT)
    }

    /// Set the thickness setpoint. The value is truncated to whole Å.
    ///
    /// # Errors
    /// [`DaqError::OutOfRange`] outside [0, 9999999], before any I/O.
    pub fn set_setpoint(&mut self, angstrom: f64) -> Result<()> {
        self.write_numeric(&attributes::SETPOINT, angstrom)
    }

    /// Whether the setpoint thickness has been reached.
    pub fn setpoint_reached(&mut self) -> Result<bool> {
        self.read_bool(&attributes::SETPOINT_REACHED)
    }

    /// Deposition rate in Å/s.
    pub fn rate(&mut self) -> Result<f64> {
        self.read_float(&attributes::RATE)
    }

    /// Film density in g/cm³.
    pub fn density(&mut self) -> Result<f64> {
        self.read_float(&attributes::DENSITY)
    }

    /// Set the film density (g/cm³, 0.5 to 99.99).
    pub fn set_density(&mut self, density: f64) -> Result<()> {
        self.write_numeric(&attributes::DENSITY, density)
    }

    /// Film Z factor.
    pub fn zfactor(&mut self) -> Result<f64> {
        self.read_float(&attributes::ZFACTOR)
    }

    /// Set the film Z factor.
    pub fn set_zfactor(&mut self, zfactor: f64) -> Result<()> {
        self.write_numeric(&attributes::ZFACTOR, zfactor)
    }

    /// Tooling factor in percent.
    pub fn tooling(&mut self) -> Result<f64> {
        self.read_float(&attributes::TOOLING)
    }

    /// Set the tooling factor (percent, 10 to 399).
    pub fn set_tooling(&mut self, percent: f64) -> Result<()> {
        self.write_numeric(&attributes::TOOLING, percent)
    }

    /// Crystal frequency in Hz.
    pub fn frequency(&mut self) -> Result<f64> {
        self.read_float(&attributes::FREQUENCY)
    }

    /// Remaining crystal lifetime in percent.
    pub fn lifetime(&mut self) -> Result<f64> {
        self.read_float(&attributes::LIFETIME)
    }

    /// Whether the crystal has failed.
    pub fn crystal_fail(&mut self) -> Result<bool> {
        self.read_bool(&attributes::CRYSTAL_FAIL)
    }

    /// Deposition timer. `None` once the timer has run past 99:59.
    pub fn timer(&mut self) -> Result<Option<Duration>> {
        let body = self.query(attributes::TIMER.read)?;
        parse_timer(&body)
    }

    /// Shutter relay state.
    pub fn shutter(&mut self) -> Result<bool> {
        self.read_bool(&attributes::SHUTTER)
    }

    /// Open (`true`) or close the shutter relay.
    pub fn set_shutter(&mut self, open: bool) -> Result<()> {
        self.write_switch(&attributes::SHUTTER, open)
    }

    /// Whether test mode is active.
    pub fn testmode(&mut self) -> Result<bool> {
        self.read_bool(&attributes::TESTMODE)
    }

    /// Switch test mode. In test mode the controller simulates deposition at a
    /// constant rate while the shutter is open.
    pub fn set_testmode(&mut self, on: bool) -> Result<()> {
        self.write_switch(&attributes::TESTMODE, on)
    }

    /// Power-on status bits.
    ///
    /// # Errors
    /// [`DaqError::UnexpectedResponse`] unless the reply body is exactly one byte.
    pub fn power_on_status(&mut self) -> Result<PowerOnStatus> {
        let response = self.exchange(POWER_ON_STATUS)?;
        match response.body_bytes() {
            [byte] => Ok(PowerOnStatus::from_byte(*byte)),
            _ => Err(DaqError::UnexpectedResponse {
                command: POWER_ON_STATUS.to_string(),
                response: response.body().to_string(),
            }),
        }
    }

    /// Clear the power-on status bits.
    pub fn acknowledge_power_on_status(&mut self) -> Result<()> {
        self.query(ACK_POWER_ON_STATUS)?;
        Ok(())
    }

    /// Zero thickness, timer, or both.
    pub fn zero(&mut self, target: ZeroTarget) -> Result<()> {
        self.query(target.command())?;
        Ok(())
    }

    /// Zero by target name (`both`, `thickness` or `timer`).
    ///
    /// # Errors
    /// [`DaqError::InvalidArgument`] for any other name, before any I/O.
    pub fn zero_named(&mut self, target: &str) -> Result<()> {
        self.ensure_open()?;
        let target: ZeroTarget = target.parse()?;
        self.zero(target)
    }

    /// Read the parameters of all nine film slots.
    ///
    /// Issues three queries per slot. The result replaces the cached snapshot
    /// returned by [`cached_films`](Self::cached_films); on failure the cache
    /// is left empty.
    pub fn films(&mut self) -> Result<Vec<FilmParameters>> {
        self.films = None;

        let mut films = Vec::with_capacity(FILM_SLOTS.len());
        for slot in FILM_SLOTS {
            let density = self.query_float(&format!("j{}?", slot))?;
            let zfactor = self.query_float(&format!("k{}?", slot))?;
            let tooling = self.query_float(&format!("o{}?", slot))?;
            films.push(FilmParameters {
                slot,
                density,
                zfactor,
                tooling,
            });
        }

        self.films = Some(films.clone());
        Ok(films)
    }

    /// Film table from the last successful [`films`](Self::films) call.
    pub fn cached_films(&self) -> Option<&[FilmParameters]> {
        self.films.as_deref()
    }
}

impl Drop for Stm100Driver {
    fn drop(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!(transport = %self.description, error = %e, "Failed to close transport on drop");
            }
        }
    }
}

/// Write one request frame and read its reply.
fn transact(transport: &mut dyn Transport, command: &str, request: &[u8]) -> Result<Response> {
    let timeout = transport.timeout();
    trace!(command, frame = ?request, "Request frame");

    transport
        .write_all(request)
        .and_then(|()| transport.flush())
        .map_err(|err| frame_failure(command, timeout, FrameError::from(err)))?;

    match frame::decode(&mut *transport) {
        Ok(response) => Ok(response),
        Err(FrameError::MissingStartByte { found }) => {
            error!(command, found, "Reply missing start byte, discarding input");
            transport
                .flush_input()
                .map_err(|source| DaqError::Transport {
                    command: command.to_string(),
                    source,
                })?;
            Err(DaqError::Framing {
                command: command.to_string(),
                found,
            })
        }
        Err(err) => Err(frame_failure(command, timeout, err)),
    }
}

fn frame_failure(command: &str, timeout: Duration, err: FrameError) -> DaqError {
    match err {
        FrameError::CommandTooLong { len, max } => DaqError::CommandTooLong {
            command: command.to_string(),
            len,
            max,
        },
        FrameError::MissingStartByte { found } => DaqError::Framing {
            command: command.to_string(),
            found,
        },
        FrameError::Timeout => DaqError::TransportTimeout {
            command: command.to_string(),
            timeout,
        },
        FrameError::Io(source) => DaqError::Transport {
            command: command.to_string(),
            source,
        },
    }
}
