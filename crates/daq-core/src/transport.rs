//! Blocking byte-stream transport owned by a driver session.
//!
//! A transport is a `Read + Write` channel with a fixed per-call timeout. Reads
//! that run out of time must fail with [`std::io::ErrorKind::TimedOut`] so the
//! session can report a recoverable timeout rather than a hard I/O failure.
//!
//! The serial implementation lives in the driver crate; tests substitute
//! scripted or simulated transports.

use std::io::{Read, Write};
use std::time::Duration;

/// Exclusive, blocking byte channel to one instrument.
pub trait Transport: Read + Write + Send {
    /// Discard any bytes received but not yet read.
    ///
    /// Called after a framing error so stale bytes cannot desynchronize the
    /// following frames.
    fn flush_input(&mut self) -> std::io::Result<()>;

    /// Per-call timeout applied to every read and write.
    fn timeout(&self) -> Duration;

    /// Human-readable identifier (port path, "simulated", ...).
    fn describe(&self) -> String;

    /// Release the underlying channel.
    ///
    /// Called exactly once by the owning session. The default does nothing;
    /// implementations holding OS handles release them on drop as well.
    fn close(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
