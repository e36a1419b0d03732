//! Tag value model.
//!
//! A tag is a named, typed point of telemetry/control state. Values are a
//! tagged union carrying their own serialization rule, so no runtime type
//! inspection is needed anywhere else in the crate: booleans always read
//! back as the literals `true`/`false`, numbers as their decimal text form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{BridgeError, Result};

/// The kind of a tag, fixed at first assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    /// Boolean state (breaker positions, status flags).
    Bool,

    /// Floating-point measurement or setpoint.
    Number,
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Number => write!(f, "number"),
        }
    }
}

/// A typed tag value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TagValue {
    /// Boolean value, serialized as the literals `true`/`false`.
    Bool(bool),

    /// Numeric value, serialized as decimal text.
    Number(f64),
}

impl TagValue {
    /// Get the kind of this value.
    pub fn kind(&self) -> TagKind {
        match self {
            Self::Bool(_) => TagKind::Bool,
            Self::Number(_) => TagKind::Number,
        }
    }

    /// Get the value as f64 (`true` maps to 1, `false` to 0).
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Bool(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Number(v) => *v,
        }
    }

    /// Get the value as bool (a number is truthy when non-zero).
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(v) => *v,
            Self::Number(v) => *v != 0.0,
        }
    }

    /// Parse raw command text into a value of the required kind.
    ///
    /// The command channel is text-only, so boolean tags accept the literals
    /// `true`/`false` (any ASCII case) as well as numeric text (non-zero is
    /// true); numeric tags accept decimal text plus the boolean literals
    /// coerced to `1`/`0`.
    pub fn parse_as(kind: TagKind, raw: &str, tag: &str) -> Result<Self> {
        let raw = raw.trim();
        match kind {
            TagKind::Bool => {
                if raw.eq_ignore_ascii_case("true") {
                    Ok(Self::Bool(true))
                } else if raw.eq_ignore_ascii_case("false") {
                    Ok(Self::Bool(false))
                } else if let Ok(v) = raw.parse::<f64>() {
                    Ok(Self::Bool(v != 0.0))
                } else {
                    Err(BridgeError::InvalidValue {
                        tag: tag.to_string(),
                        reason: format!("{:?} is not a boolean", raw),
                    })
                }
            }
            TagKind::Number => {
                if raw.eq_ignore_ascii_case("true") {
                    Ok(Self::Number(1.0))
                } else if raw.eq_ignore_ascii_case("false") {
                    Ok(Self::Number(0.0))
                } else {
                    raw.parse::<f64>().map(Self::Number).map_err(|_| {
                        BridgeError::InvalidValue {
                            tag: tag.to_string(),
                            reason: format!("{:?} is not a number", raw),
                        }
                    })
                }
            }
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Number(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<f32> for TagValue {
    fn from(v: f32) -> Self {
        Self::Number(v as f64)
    }
}

impl From<i32> for TagValue {
    fn from(v: i32) -> Self {
        Self::Number(v as f64)
    }
}
