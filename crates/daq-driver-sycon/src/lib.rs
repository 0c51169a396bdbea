//! Sycon STM-100 quartz crystal microbalance controller driver.
//!
//! The STM-100 speaks a framed RS-232 protocol:
//!
//! ```text
//! Request:  0x02 | len | command (≤10 bytes)        | checksum
//! Response: 0x02 | len | status (1 byte) + body     | checksum
//! checksum = sum(payload bytes) mod 256
//! ```
//!
//! # Modules
//!
//! - [`frame`]: frame encoding and decoding
//! - [`transport`]: blocking serial port
//! - [`stm100`]: the protocol session with typed accessors
//! - [`attributes`]: table of named attributes, mnemonics and ranges
//! - [`values`]: reply value domains (flags, timer, power-on bits, film slots)
//! - [`config`]: Figment-based connection settings
//! - [`mock`]: scripted and simulated transports
//!
//! # Example
//!
//! ```
//! use daq_driver_sycon::{SimulatedStm100, Stm100Driver};
//!
//! let mut qcm = Stm100Driver::with_transport(SimulatedStm100::new());
//! qcm.set_setpoint(5000.0).unwrap();
//! assert_eq!(qcm.setpoint().unwrap(), 5000.0);
//! ```

pub mod attributes;
pub mod config;
pub mod frame;
pub mod mock;
pub mod stm100;
pub mod transport;
pub mod values;

pub use attributes::{AttributeKind, AttributeSpec, AttributeValue, WriteRule, ATTRIBUTES};
pub use config::{ConfigError, Stm100Config};
pub use frame::{FrameError, Response};
pub use mock::{MockTransport, SimulatedStm100};
pub use stm100::{SessionState, Stm100Driver};
pub use transport::SerialTransport;
pub use values::{FilmParameters, InstrumentHealth, PowerOnStatus, ZeroTarget};
