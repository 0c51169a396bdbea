//! STX frame codec for the STM-100 serial protocol.
//!
//! ```text
//! Request:  0x02 | len | command bytes (len)        | checksum
//! Reply:    0x02 | len | status + body bytes (len)  | checksum
//! checksum = sum(payload bytes) mod 256, payload ≤ 10 bytes
//! ```
//!
//! The controller has no retransmission mechanism. A reply whose checksum does
//! not match is logged and still returned, since dropping it would turn a
//! possibly-correct reading into a hard failure. [`Response::checksum_ok`]
//! exposes the outcome for callers that want to be stricter.

use std::io::{self, Read};

use daq_core::limits::{frame_len, FRAME_START, MAX_PAYLOAD_LEN};
use thiserror::Error;
use tracing::{trace, warn};

/// Failures of the codec itself, before session context is attached.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Command longer than one frame can carry.
    #[error("command is {len} bytes, maximum is {max}")]
    CommandTooLong {
        /// Command length in bytes.
        len: usize,
        /// Maximum payload length.
        max: usize,
    },

    /// First byte of a reply was not [`FRAME_START`]. The rest of the input is
    /// left unread; the caller must flush it.
    #[error("expected start byte 0x02, got {found:#04x}")]
    MissingStartByte {
        /// Byte that was read instead.
        found: u8,
    },

    /// The reader ran out of time before the frame was complete.
    #[error("timed out reading frame")]
    Timeout,

    /// Any other I/O failure.
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::Io(err),
        }
    }
}

/// Sum of `payload` modulo 256.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

/// Encode `command` into a request frame.
pub fn encode(command: &str) -> Result<Vec<u8>, FrameError> {
    let payload = command.as_bytes();
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::CommandTooLong {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut frame = Vec::with_capacity(frame_len(payload.len()));
    frame.push(FRAME_START);
    // Bounded by MAX_PAYLOAD_LEN above.
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(payload));
    Ok(frame)
}

/// A decoded reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    payload: Vec<u8>,
    body: String,
    received_checksum: u8,
}

impl Response {
    fn new(payload: Vec<u8>, received_checksum: u8) -> Self {
        let body = payload
            .get(1..)
            .map(|rest| String::from_utf8_lossy(rest).into_owned())
            .unwrap_or_default();
        Self {
            payload,
            body,
            received_checksum,
        }
    }

    /// Status character (first payload byte), absent for an empty payload.
    pub fn status(&self) -> Option<char> {
        self.payload.first().map(|&byte| char::from(byte))
    }

    /// Reply text following the status character.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Raw body bytes following the status byte.
    pub fn body_bytes(&self) -> &[u8] {
        self.payload.get(1..).unwrap_or_default()
    }

    /// Complete payload as received (status byte included).
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Checksum byte carried by the frame.
    pub fn received_checksum(&self) -> u8 {
        self.received_checksum
    }

    /// Checksum computed over the received payload.
    pub fn expected_checksum(&self) -> u8 {
        checksum(&self.payload)
    }

    /// Whether the carried checksum matches the payload.
    pub fn checksum_ok(&self) -> bool {
        self.received_checksum == self.expected_checksum()
    }

    /// Consume the response, keeping only the body text.
    pub fn into_body(self) -> String {
        self.body
    }
}

fn read_byte<R: Read + ?Sized>(reader: &mut R) -> Result<u8, FrameError> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

/// Read exactly one reply frame from `reader`.
///
/// On [`FrameError::MissingStartByte`] only the offending byte has been
/// consumed.
pub fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Response, FrameError> {
    let start = read_byte(reader)?;
    if start != FRAME_START {
        return Err(FrameError::MissingStartByte { found: start });
    }

    let len = usize::from(read_byte(reader)?);
    if len > MAX_PAYLOAD_LEN {
        warn!(
            len,
            max = MAX_PAYLOAD_LEN,
            "Reply payload longer than protocol maximum"
        );
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    let received = read_byte(reader)?;

    let response = Response::new(payload, received);
    trace!(
        payload = ?response.payload(),
        checksum = received,
        "Decoded reply frame"
    );

    if !response.checksum_ok() {
        warn!(
            received,
            expected = response.expected_checksum(),
            payload = ?response.payload(),
            "Checksum mismatch in reply frame, returning payload anyway"
        );
    }

    Ok(response)
}
