//! Error types for QCM controller drivers.
//!
//! `DaqError` is the single error type returned by every driver operation. Built
//! on `thiserror`, it separates failures into three families:
//!
//! - **Local validation** (`OutOfRange`, `InvalidArgument`, `CommandTooLong`):
//!   detected before any byte is written to the transport.
//! - **Exchange failures** (`TransportTimeout`, `Transport`, `Framing`,
//!   `UnexpectedResponse`, `MalformedDuration`): the command was sent, the reply
//!   was missing or unusable. Each carries the command that was attempted.
//! - **Lifecycle** (`Connection`, `SessionClosed`, `Config`): the session could
//!   not be created or is no longer usable.
//!
//! A checksum mismatch on a reply is deliberately *not* an error variant: the
//! frame codec logs it and hands the decoded reply to the caller.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type Result<T> = std::result::Result<T, DaqError>;

/// Errors reported by driver sessions, codecs and transports.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The transport could not be opened.
    #[error("Failed to open '{port}': {reason}")]
    Connection {
        /// Port or resource identifier that was requested.
        port: String,
        /// Underlying failure reported by the OS or serial layer.
        reason: String,
    },

    /// No complete reply frame arrived within the per-call timeout.
    #[error("Timed out after {timeout:?} waiting for reply to '{command}'")]
    TransportTimeout {
        /// Command that was sent.
        command: String,
        /// Per-call timeout that expired.
        timeout: Duration,
    },

    /// The transport failed for a reason other than a timeout.
    #[error("Transport I/O failed during '{command}': {source}")]
    Transport {
        /// Command that was being exchanged.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The reply did not begin with the frame start byte. Input was flushed.
    #[error("Framing error on reply to '{command}': expected start byte 0x02, got {found:#04x}")]
    Framing {
        /// Command that was sent.
        command: String,
        /// Byte received where the start marker was expected.
        found: u8,
    },

    /// A reply body violated the contract of the command (e.g. a boolean query
    /// answered with neither sentinel character).
    #[error("Unexpected response to '{command}': {response:?}")]
    UnexpectedResponse {
        /// Command that was sent.
        command: String,
        /// Reply body as received.
        response: String,
    },

    /// A timer reply was neither `MM:SS` nor the overflow marker.
    #[error("Malformed duration reply: {response:?}")]
    MalformedDuration {
        /// Reply body as received.
        response: String,
    },

    /// A setter value fell outside the attribute's accepted range.
    #[error("{attribute} value {value} out of range [{min}, {max}]")]
    OutOfRange {
        /// Attribute being written.
        attribute: &'static str,
        /// Rejected value.
        value: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },

    /// An argument was not one of the accepted values.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The command does not fit in a single frame.
    #[error("Command {command:?} is {len} bytes, maximum is {max}")]
    CommandTooLong {
        /// Offending command text.
        command: String,
        /// Its length in bytes.
        len: usize,
        /// Maximum allowed payload length.
        max: usize,
    },

    /// The session was closed; no further calls are permitted.
    #[error("Session is closed")]
    SessionClosed,

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DaqError {
    /// Whether this failure was detected locally, before any I/O happened.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::OutOfRange { .. } | Self::InvalidArgument(_) | Self::CommandTooLong { .. }
        )
    }

    /// Whether the session remains usable after this error.
    ///
    /// Timeouts, framing errors and malformed replies leave the session idle and
    /// ready for the next command. Retrying is the caller's decision.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TransportTimeout { .. }
            | Self::Framing { .. }
            | Self::UnexpectedResponse { .. }
            | Self::MalformedDuration { .. } => true,
            other => other.is_validation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Framing {
            command: "S".to_string(),
            found: 0x41,
        };
        assert_eq!(
            err.to_string(),
            "Framing error on reply to 'S': expected start byte 0x02, got 0x41"
        );

        let err = DaqError::OutOfRange {
            attribute: "density",
            value: 0.4,
            min: 0.5,
            max: 99.99,
        };
        assert_eq!(err.to_string(), "density value 0.4 out of range [0.5, 99.99]");
    }

    #[test]
    fn test_error_classification() {
        let timeout = DaqError::TransportTimeout {
            command: "T".into(),
            timeout: Duration::from_millis(200),
        };
        assert!(timeout.is_recoverable());
        assert!(!timeout.is_validation());

        let too_long = DaqError::CommandTooLong {
            command: "ABCDEFGHIJK".into(),
            len: 11,
            max: 10,
        };
        assert!(too_long.is_validation());
        assert!(too_long.is_recoverable());

        assert!(!DaqError::SessionClosed.is_recoverable());
        assert!(!DaqError::Connection {
            port: "/dev/ttyUSB0".into(),
            reason: "No such file or directory".into(),
        }
        .is_recoverable());
    }
}
