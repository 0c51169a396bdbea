//! # daq-core
//!
//! Core types shared by the QCM controller driver crates:
//!
//! - **[`DaqError`]** - the error taxonomy every driver operation reports through
//! - **[`Transport`]** - blocking byte-stream abstraction a session owns exclusively
//! - **[`limits`]** - wire-protocol bounds and the default per-call I/O timeout
//!
//! Drivers depend on this crate instead of each other, so a test double for
//! [`Transport`] can stand in for a serial port anywhere a session is built.

pub mod error;
pub mod limits;
pub mod transport;

pub use error::{DaqError, Result};
pub use transport::Transport;
