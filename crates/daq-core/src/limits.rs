//! Shared hard limits of the STX/length/checksum serial protocol.

use std::time::Duration;

/// Frame start marker (ASCII STX).
pub const FRAME_START: u8 = 0x02;

/// Maximum command or reply payload length in bytes.
pub const MAX_PAYLOAD_LEN: usize = 10;

/// Default per-call read/write timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_millis(200);

/// Upper bound accepted for a configured per-call timeout.
pub const MAX_IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Total frame size for a payload of `payload_len` bytes (start, length, checksum).
pub const fn frame_len(payload_len: usize) -> usize {
    payload_len + 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_len() {
        assert_eq!(frame_len(0), 3);
        assert_eq!(frame_len(MAX_PAYLOAD_LEN), 13);
    }
}
