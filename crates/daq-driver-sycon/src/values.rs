//! Value domains of the STM-100 reply vocabulary.
//!
//! Parsing rules differ by kind on purpose:
//!
//! - Floats are lenient. Non-numeric text (the controller sends it during
//!   transient states) becomes `NaN`, which callers treat as "unknown".
//! - Booleans are strict. Anything but `!` or `@` means the exchange is out of
//!   step with the controller and is reported as an error.
//! - Timer replies are `MM:SS`, or start with `>` when the elapsed time no
//!   longer fits (more than 99:59).

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

use daq_core::{DaqError, Result};

/// Wire character for `true` / "on".
pub const TRUE_CHAR: char = '!';
/// Wire character for `false` / "off".
pub const FALSE_CHAR: char = '@';
/// Leading character of a timer reply that overflowed.
pub const TIMER_OVERFLOW: char = '>';

/// Film parameter storage slots, 1-indexed.
pub const FILM_SLOTS: RangeInclusive<u8> = 1..=9;

/// Sentinel suffix for a switch command (`A!`, `K@`, ...).
pub fn switch_char(on: bool) -> char {
    if on {
        TRUE_CHAR
    } else {
        FALSE_CHAR
    }
}

/// Parse a boolean reply to `command`.
///
/// # Errors
/// [`DaqError::UnexpectedResponse`] unless `body` is exactly `!` or `@`.
pub fn parse_bool(command: &str, body: &str) -> Result<bool> {
    let mut chars = body.chars();
    match (chars.next(), chars.next()) {
        (Some(TRUE_CHAR), None) => Ok(true),
        (Some(FALSE_CHAR), None) => Ok(false),
        _ => Err(DaqError::UnexpectedResponse {
            command: command.to_string(),
            response: body.to_string(),
        }),
    }
}

/// Parse a numeric reply, yielding `NaN` for anything that is not a number.
pub fn parse_float(body: &str) -> f64 {
    body.trim().parse::<f64>().unwrap_or(f64::NAN)
}

/// Parse a timer reply.
///
/// Returns `Ok(None)` for the overflow marker.
///
/// # Errors
/// [`DaqError::MalformedDuration`] if the text is neither `MM:SS` nor an
/// overflow reply.
pub fn parse_timer(body: &str) -> Result<Option<Duration>> {
    let text = body.trim();
    if text.starts_with(TIMER_OVERFLOW) {
        return Ok(None);
    }

    let malformed = || DaqError::MalformedDuration {
        response: body.to_string(),
    };

    let (minutes, seconds) = text.split_once(':').ok_or_else(malformed)?;
    let minutes: u64 = minutes.trim().parse().map_err(|_| malformed())?;
    let seconds: u64 = seconds.trim().parse().map_err(|_| malformed())?;

    let total = minutes
        .checked_mul(60)
        .and_then(|m| m.checked_add(seconds))
        .ok_or_else(malformed)?;

    Ok(Some(Duration::from_secs(total)))
}

/// Power-on status bits reported by the `a` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerOnStatus {
    /// A reset occurred (bit 0).
    pub reset: bool,
    /// A brownout occurred (bit 1).
    pub brownout: bool,
    /// Non-volatile memory fault (bit 2).
    pub nvm_fault: bool,
}

impl PowerOnStatus {
    const RESET: u8 = 0b001;
    const BROWNOUT: u8 = 0b010;
    const NVM_FAULT: u8 = 0b100;

    /// Decode the status byte. Bits above bit 2 are ignored.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            reset: byte & Self::RESET != 0,
            brownout: byte & Self::BROWNOUT != 0,
            nvm_fault: byte & Self::NVM_FAULT != 0,
        }
    }

    /// Encode back into the status byte.
    pub fn to_byte(self) -> u8 {
        let mut byte = 0;
        if self.reset {
            byte |= Self::RESET;
        }
        if self.brownout {
            byte |= Self::BROWNOUT;
        }
        if self.nvm_fault {
            byte |= Self::NVM_FAULT;
        }
        byte
    }

    /// Whether any flag is set.
    pub fn any(self) -> bool {
        self.reset || self.brownout || self.nvm_fault
    }
}

impl fmt::Display for PowerOnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reset={} brownout={} nvm_fault={}",
            self.reset, self.brownout, self.nvm_fault
        )
    }
}

/// Material parameters stored in one film slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilmParameters {
    /// Slot number, 1 through 9.
    pub slot: u8,
    /// Density in g/cm³ (`NaN` if the reply was not numeric).
    pub density: f64,
    /// Acoustic impedance ratio (Z factor).
    pub zfactor: f64,
    /// Tooling factor in percent.
    pub tooling: f64,
}

/// What a zero command resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZeroTarget {
    /// Thickness and timer (`B`).
    Both,
    /// Thickness only (`C`).
    Thickness,
    /// Timer only (`D`).
    Timer,
}

impl ZeroTarget {
    /// Command mnemonic for this target.
    pub fn command(self) -> &'static str {
        match self {
            Self::Both => "B",
            Self::Thickness => "C",
            Self::Timer => "D",
        }
    }
}

impl FromStr for ZeroTarget {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(Self::Both),
            "thickness" => Ok(Self::Thickness),
            "timer" => Ok(Self::Timer),
            other => Err(DaqError::InvalidArgument(format!(
                "zero target '{}' must be one of both/thickness/timer",
                other
            ))),
        }
    }
}

impl fmt::Display for ZeroTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Both => write!(f, "both"),
            Self::Thickness => write!(f, "thickness"),
            Self::Timer => write!(f, "timer"),
        }
    }
}

/// Controller health derived from the last status character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentHealth {
    /// Status `A` or `B`: controller operating normally.
    Nominal,
    /// Any other status character.
    Fault,
    /// No status received yet.
    Unknown,
}

impl InstrumentHealth {
    /// Classify a status character.
    pub fn from_status(status: Option<char>) -> Self {
        match status {
            Some('A' | 'B') => Self::Nominal,
            Some(_) => Self::Fault,
            None => Self::Unknown,
        }
    }
}

impl fmt::Display for InstrumentHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nominal => write!(f, "nominal"),
            Self::Fault => write!(f, "fault"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_sentinels() {
        assert!(parse_bool("A?", "!").unwrap());
        assert!(!parse_bool("A?", "@").unwrap());

        for bad in ["X", "", "!@", " !"] {
            match parse_bool("K?", bad) {
                Err(DaqError::UnexpectedResponse { command, response }) => {
                    assert_eq!(command, "K?");
                    assert_eq!(response, bad);
                }
                other => panic!("expected UnexpectedResponse for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_parse_float_is_lenient() {
        assert_eq!(parse_float("1234.5"), 1234.5);
        assert_eq!(parse_float(" 0.125 "), 0.125);
        assert!(parse_float("----").is_nan());
        assert!(parse_float("").is_nan());
    }

    #[test]
    fn test_parse_timer() {
        assert_eq!(parse_timer("01:30").unwrap(), Some(Duration::from_secs(90)));
        assert_eq!(parse_timer("00:00").unwrap(), Some(Duration::ZERO));
        assert_eq!(
            parse_timer("99:59").unwrap(),
            Some(Duration::from_secs(99 * 60 + 59))
        );
        assert_eq!(parse_timer(">99:59").unwrap(), None);
        assert_eq!(parse_timer(">").unwrap(), None);
    }

    #[test]
    fn test_parse_timer_malformed() {
        for bad in [
            "badtext",
            "",
            "1:xx",
            "12:",
            ":30",
            "18446744073709551615:00",
            "999999999999999999:0",
        ] {
            assert!(
                matches!(parse_timer(bad), Err(DaqError::MalformedDuration { .. })),
                "{:?} should be malformed",
                bad
            );
        }
    }

    #[test]
    fn test_power_on_status_bits() {
        let status = PowerOnStatus::from_byte(0b101);
        assert!(status.reset);
        assert!(!status.brownout);
        assert!(status.nvm_fault);
        assert!(status.any());
        assert_eq!(status.to_byte(), 0b101);

        assert!(!PowerOnStatus::from_byte(0).any());
        assert_eq!(PowerOnStatus::from_byte(0xF8), PowerOnStatus::default());
    }

    #[test]
    fn test_zero_target_parsing() {
        assert_eq!("both".parse::<ZeroTarget>().unwrap(), ZeroTarget::Both);
        assert_eq!("Timer".parse::<ZeroTarget>().unwrap().command(), "D");
        assert_eq!(ZeroTarget::Thickness.command(), "C");
        assert!(matches!(
            "rate".parse::<ZeroTarget>(),
            Err(DaqError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_health_from_status() {
        assert_eq!(InstrumentHealth::from_status(Some('A')), InstrumentHealth::Nominal);
        assert_eq!(InstrumentHealth::from_status(Some('B')), InstrumentHealth::Nominal);
        assert_eq!(InstrumentHealth::from_status(Some('E')), InstrumentHealth::Fault);
        assert_eq!(InstrumentHealth::from_status(None), InstrumentHealth::Unknown);
    }
}
