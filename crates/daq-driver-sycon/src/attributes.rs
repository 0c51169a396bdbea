//! Typed accessor table for the STM-100.
//!
//! Each controller attribute is described once, as an [`AttributeSpec`]: the
//! query mnemonic, how the reply is parsed, how a new value is encoded and
//! which range it must fall in. The typed getters and setters on
//! [`Stm100Driver`](crate::Stm100Driver) and the name-based
//! [`read_attribute`](crate::Stm100Driver::read_attribute) /
//! [`write_attribute`](crate::Stm100Driver::write_attribute) dispatch both go
//! through these entries.
//!
//! | name | read | write | unit |
//! |------|------|-------|------|
//! | model | `@` | | |
//! | thickness | `S` | | Å |
//! | setpoint | `G?` | `G=<int>` in [0, 9999999] | Å |
//! | setpoint_reached | `P` | | |
//! | rate | `T` | | Å/s |
//! | density | `E?` | `E=<x.xxx>` in [0.5, 99.99] | g/cm³ |
//! | zfactor | `F?` | `F=<x.xxx>` | |
//! | tooling | `J?` | `J=<x.x>` in [10, 399] | % |
//! | frequency | `U` | | Hz |
//! | lifetime | `V` | | % |
//! | crystal_fail | `M` | | |
//! | timer | `W` | | s |
//! | shutter | `A?` | `A!` / `A@` | |
//! | testmode | `K?` | `K!` / `K@` | |

use std::fmt;
use std::time::Duration;

use daq_core::{DaqError, Result};

use crate::values::{parse_bool, parse_float, parse_timer, switch_char};

/// Reply type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Free text (identification string).
    Text,
    /// Decimal number; unparseable replies read as `NaN`.
    Float,
    /// `!` / `@` flag.
    Bool,
    /// `MM:SS` timer.
    Duration,
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Duration => "duration",
        };
        f.write_str(name)
    }
}

/// Encoding of a numeric setter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericFormat {
    /// Truncated to an integer.
    Integer,
    /// Fixed number of decimal places.
    Decimals(usize),
}

/// How an attribute is written, if at all.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteRule {
    /// No setter.
    ReadOnly,
    /// `<prefix><formatted value>`, optionally range checked (inclusive).
    Numeric {
        /// Command prefix, e.g. `E=`.
        prefix: &'static str,
        /// Value encoding.
        format: NumericFormat,
        /// Inclusive bounds.
        range: Option<(f64, f64)>,
    },
    /// `<prefix>!` to switch on, `<prefix>@` to switch off.
    Switch {
        /// Command prefix, e.g. `A`.
        prefix: &'static str,
    },
}

/// One row of the accessor table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeSpec {
    /// Logical attribute name.
    pub name: &'static str,
    /// Short human-readable description.
    pub description: &'static str,
    /// Physical unit, if any.
    pub unit: Option<&'static str>,
    /// Reply type.
    pub kind: AttributeKind,
    /// Query mnemonic.
    pub read: &'static str,
    /// Setter rule.
    pub write: WriteRule,
}

/// A parsed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Text reply.
    Text(String),
    /// Numeric reply (`NaN` when unknown).
    Float(f64),
    /// Flag reply.
    Bool(bool),
    /// Timer reply; `None` when the timer overflowed.
    Duration(Option<Duration>),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Float(value) => write!(f, "{}", value),
            Self::Bool(flag) => write!(f, "{}", flag),
            Self::Duration(Some(duration)) => write!(f, "{}", duration.as_secs()),
            Self::Duration(None) => f.write_str("unknown"),
        }
    }
}

impl AttributeSpec {
    /// Whether the attribute has a setter.
    pub fn is_writable(&self) -> bool {
        !matches!(self.write, WriteRule::ReadOnly)
    }

    /// Parse a reply body to this attribute's query.
    pub fn parse(&self, body: &str) -> Result<AttributeValue> {
        Ok(match self.kind {
            AttributeKind::Text => AttributeValue::Text(body.to_string()),
            AttributeKind::Float => AttributeValue::Float(parse_float(body)),
            AttributeKind::Bool => AttributeValue::Bool(parse_bool(self.read, body)?),
            AttributeKind::Duration => AttributeValue::Duration(parse_timer(body)?),
        })
    }

    /// Validate `value` and build the setter command.
    ///
    /// # Errors
    /// - [`DaqError::OutOfRange`] if the value is outside the attribute's range
    /// - [`DaqError::InvalidArgument`] if the attribute is not numerically
    ///   writable or the value is not finite
    pub fn numeric_command(&self, value: f64) -> Result<String> {
        let WriteRule::Numeric {
            prefix,
            format,
            range,
        } = self.write
        else {
            return Err(DaqError::InvalidArgument(format!(
                "attribute '{}' has no numeric setter",
                self.name
            )));
        };

        if let Some((min, max)) = range {
            if !(min..=max).contains(&value) {
                return Err(DaqError::OutOfRange {
                    attribute: self.name,
                    value,
                    min,
                    max,
                });
            }
        }
        if !value.is_finite() {
            return Err(DaqError::InvalidArgument(format!(
                "{} value {} is not a finite number",
                self.name, value
            )));
        }

        Ok(match format {
            NumericFormat::Integer => format!("{}{}", prefix, value.trunc() as i64),
            NumericFormat::Decimals(places) => format!("{}{:.*}", prefix, places, value),
        })
    }

    /// Build the switch command for `on`.
    ///
    /// # Errors
    /// [`DaqError::InvalidArgument`] if the attribute is not a switch.
    pub fn switch_command(&self, on: bool) -> Result<String> {
        match self.write {
            WriteRule::Switch { prefix } => Ok(format!("{}{}", prefix, switch_char(on))),
            _ => Err(DaqError::InvalidArgument(format!(
                "attribute '{}' is not a switch",
                self.name
            ))),
        }
    }

    /// Build the setter command for a typed value.
    ///
    /// # Errors
    /// [`DaqError::InvalidArgument`] for read-only attributes or mismatched
    /// value kinds, plus the errors of [`numeric_command`](Self::numeric_command).
    pub fn write_command(&self, value: &AttributeValue) -> Result<String> {
        match (&self.write, value) {
            (WriteRule::Numeric { .. }, AttributeValue::Float(v)) => self.numeric_command(*v),
            (WriteRule::Switch { .. }, AttributeValue::Bool(on)) => self.switch_command(*on),
            (WriteRule::ReadOnly, _) => Err(DaqError::InvalidArgument(format!(
                "attribute '{}' is read-only",
                self.name
            ))),
            (_, other) => Err(DaqError::InvalidArgument(format!(
                "attribute '{}' cannot be set to {:?}",
                self.name, other
            ))),
        }
    }

    /// Parse user-supplied text into a value suitable for [`write_command`](Self::write_command).
    ///
    /// Switches accept `on`/`off`, `true`/`false` and `1`/`0`.
    pub fn parse_input(&self, text: &str) -> Result<AttributeValue> {
        let text = text.trim();
        match self.write {
            WriteRule::Numeric { .. } => text.parse::<f64>().map(AttributeValue::Float).map_err(|_| {
                DaqError::InvalidArgument(format!("'{}' is not a number for {}", text, self.name))
            }),
            WriteRule::Switch { .. } => match text.to_ascii_lowercase().as_str() {
                "on" | "true" | "1" => Ok(AttributeValue::Bool(true)),
                "off" | "false" | "0" => Ok(AttributeValue::Bool(false)),
                _ => Err(DaqError::InvalidArgument(format!(
                    "'{}' is not on/off for {}",
                    text, self.name
                ))),
            },
            WriteRule::ReadOnly => Err(DaqError::InvalidArgument(format!(
                "attribute '{}' is read-only",
                self.name
            ))),
        }
    }
}

// =============================================================================
// Table
// =============================================================================

/// Controller model and firmware revision.
pub const MODEL: AttributeSpec = AttributeSpec {
    name: "model",
    description: "controller model and software revision",
    unit: None,
    kind: AttributeKind::Text,
    read: "@",
    write: WriteRule::ReadOnly,
};

/// Thickness of the current film.
pub const THICKNESS: AttributeSpec = AttributeSpec {
    name: "thickness",
    description: "thickness of the current film",
    unit: Some("Å"),
    kind: AttributeKind::Float,
    read: "S",
    write: WriteRule::ReadOnly,
};

/// Thickness setpoint.
pub const SETPOINT: AttributeSpec = AttributeSpec {
    name: "setpoint",
    description: "thickness setpoint",
    unit: Some("Å"),
    kind: AttributeKind::Float,
    read: "G?",
    write: WriteRule::Numeric {
        prefix: "G=",
        format: NumericFormat::Integer,
        range: Some((0.0, 9_999_999.0)),
    },
};

/// Whether the setpoint thickness has been reached.
pub const SETPOINT_REACHED: AttributeSpec = AttributeSpec {
    name: "setpoint_reached",
    description: "setpoint thickness reached",
    unit: None,
    kind: AttributeKind::Bool,
    read: "P",
    write: WriteRule::ReadOnly,
};

/// Deposition rate.
pub const RATE: AttributeSpec = AttributeSpec {
    name: "rate",
    description: "deposition rate",
    unit: Some("Å/s"),
    kind: AttributeKind::Float,
    read: "T",
    write: WriteRule::ReadOnly,
};

/// Film density.
pub const DENSITY: AttributeSpec = AttributeSpec {
    name: "density",
    description: "film density",
    unit: Some("g/cm³"),
    kind: AttributeKind::Float,
    read: "E?",
    write: WriteRule::Numeric {
        prefix: "E=",
        format: NumericFormat::Decimals(3),
        range: Some((0.5, 99.99)),
    },
};

/// Film Z factor. Bounds are left to the controller.
pub const ZFACTOR: AttributeSpec = AttributeSpec {
    name: "zfactor",
    description: "film Z factor",
    unit: None,
    kind: AttributeKind::Float,
    read: "F?",
    write: WriteRule::Numeric {
        prefix: "F=",
        format: NumericFormat::Decimals(3),
        range: None,
    },
};

/// Tooling factor.
pub const TOOLING: AttributeSpec = AttributeSpec {
    name: "tooling",
    description: "tooling factor",
    unit: Some("%"),
    kind: AttributeKind::Float,
    read: "J?",
    write: WriteRule::Numeric {
        prefix: "J=",
        format: NumericFormat::Decimals(1),
        range: Some((10.0, 399.0)),
    },
};

/// Crystal oscillation frequency.
pub const FREQUENCY: AttributeSpec = AttributeSpec {
    name: "frequency",
    description: "quartz crystal frequency",
    unit: Some("Hz"),
    kind: AttributeKind::Float,
    read: "U",
    write: WriteRule::ReadOnly,
};

/// Remaining crystal lifetime.
pub const LIFETIME: AttributeSpec = AttributeSpec {
    name: "lifetime",
    description: "remaining quartz crystal lifetime",
    unit: Some("%"),
    kind: AttributeKind::Float,
    read: "V",
    write: WriteRule::ReadOnly,
};

/// Crystal failure flag.
pub const CRYSTAL_FAIL: AttributeSpec = AttributeSpec {
    name: "crystal_fail",
    description: "quartz crystal failed",
    unit: None,
    kind: AttributeKind::Bool,
    read: "M",
    write: WriteRule::ReadOnly,
};

/// Deposition timer.
pub const TIMER: AttributeSpec = AttributeSpec {
    name: "timer",
    description: "deposition timer (unknown above 99:59)",
    unit: Some("s"),
    kind: AttributeKind::Duration,
    read: "W",
    write: WriteRule::ReadOnly,
};

/// Shutter relay.
pub const SHUTTER: AttributeSpec = AttributeSpec {
    name: "shutter",
    description: "shutter relay state",
    unit: None,
    kind: AttributeKind::Bool,
    read: "A?",
    write: WriteRule::Switch { prefix: "A" },
};

/// Test mode: the shutter relay simulates deposition at a constant rate.
pub const TESTMODE: AttributeSpec = AttributeSpec {
    name: "testmode",
    description: "test mode (simulated deposition)",
    unit: None,
    kind: AttributeKind::Bool,
    read: "K?",
    write: WriteRule::Switch { prefix: "K" },
};

/// Every attribute, in display order.
pub static ATTRIBUTES: [&AttributeSpec; 14] = [
    &MODEL,
    &THICKNESS,
    &SETPOINT,
    &SETPOINT_REACHED,
    &RATE,
    &DENSITY,
    &ZFACTOR,
    &TOOLING,
    &FREQUENCY,
    &LIFETIME,
    &CRYSTAL_FAIL,
    &TIMER,
    &SHUTTER,
    &TESTMODE,
];

/// Find an attribute by name.
pub fn lookup(name: &str) -> Option<&'static AttributeSpec> {
    ATTRIBUTES.iter().copied().find(|spec| spec.name == name)
}

/// Find an attribute by name, failing with [`DaqError::InvalidArgument`].
pub fn require(name: &str) -> Result<&'static AttributeSpec> {
    lookup(name).ok_or_else(|| DaqError::InvalidArgument(format!("unknown attribute '{}'", name)))
}
