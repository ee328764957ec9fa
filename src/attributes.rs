//! Detector attribute catalog.
//!
//! The AD Pimega driver exposes its settings as areaDetector parameters. The
//! catalog lists the ones the harness knows how to verify, together with the
//! value kind and the range the driver accepts. Checks on attributes that are
//! not in the catalog have to declare their kind in the configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

use crate::hardware::PvValue;
use crate::validation;

/// Largest image count a single acquisition accepts.
pub const MAX_IMAGE_COUNT: i64 = 16383;

/// Value kind of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Int,
    Double,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Int => write!(f, "int"),
            ValueKind::Double => write!(f, "double"),
        }
    }
}

/// Accepted values of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Limits {
    Int(RangeInclusive<i64>),
    /// Lower bound, and whether it is exclusive
    DoubleAbove { min: f64, exclusive: bool },
}

impl Limits {
    pub fn accepts(&self, value: &PvValue) -> bool {
        match (self, value) {
            (Limits::Int(range), PvValue::Int(v)) => {
                validation::is_in_range(*v, range.clone()).is_ok()
            }
            (Limits::Int(_), PvValue::Double(_)) => false,
            (Limits::DoubleAbove { min, exclusive }, v) => {
                let x = v.as_f64();
                if *exclusive {
                    x > *min
                } else {
                    x >= *min
                }
            }
        }
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limits::Int(range) => write!(f, "{}..={}", range.start(), range.end()),
            Limits::DoubleAbove { min, exclusive: true } => write!(f, "> {}", min),
            Limits::DoubleAbove {
                min,
                exclusive: false,
            } => write!(f, ">= {}", min),
        }
    }
}

/// A known detector attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: &'static str,
    pub kind: ValueKind,
    pub limits: Limits,
    pub description: &'static str,
    /// Parametrization used when a check names the attribute without values
    pub default_values: &'static [PvValue],
}

/// Exposure counts covering single-digit, double-digit and large magnitudes.
pub const DEFAULT_EXPOSURE_COUNTS: &[PvValue] =
    &[PvValue::Int(1), PvValue::Int(10), PvValue::Int(1000)];

static CATALOG: &[Attribute] = &[
    Attribute {
        name: "NumExposures",
        kind: ValueKind::Int,
        limits: Limits::Int(1..=i32::MAX as i64),
        description: "Exposures per image",
        default_values: DEFAULT_EXPOSURE_COUNTS,
    },
    Attribute {
        name: "NumImages",
        kind: ValueKind::Int,
        limits: Limits::Int(1..=MAX_IMAGE_COUNT),
        description: "Images per acquisition",
        default_values: &[PvValue::Int(1), PvValue::Int(100), PvValue::Int(MAX_IMAGE_COUNT)],
    },
    Attribute {
        name: "AcquireTime",
        kind: ValueKind::Double,
        limits: Limits::DoubleAbove {
            min: 0.0,
            exclusive: true,
        },
        description: "Exposure time in seconds",
        default_values: &[PvValue::Double(0.001), PvValue::Double(0.1), PvValue::Double(1.0)],
    },
    Attribute {
        name: "AcquirePeriod",
        kind: ValueKind::Double,
        limits: Limits::DoubleAbove {
            min: 0.0,
            exclusive: false,
        },
        description: "Time between image starts in seconds",
        default_values: &[PvValue::Double(0.0), PvValue::Double(0.5), PvValue::Double(2.0)],
    },
    Attribute {
        name: "TriggerMode",
        kind: ValueKind::Int,
        limits: Limits::Int(0..=2),
        description: "0 = internal, 1 = external, 2 = alignment",
        default_values: &[PvValue::Int(1), PvValue::Int(2), PvValue::Int(0)],
    },
];

/// All catalogued attributes.
pub fn catalog() -> &'static [Attribute] {
    CATALOG
}

/// Look up an attribute by its (case-sensitive) channel name.
pub fn lookup(name: &str) -> Option<&'static Attribute> {
    CATALOG.iter().find(|a| a.name == name)
}

/// Whether `value` has the representation `kind` expects.
///
/// Integers are accepted for double channels; the reverse is not.
pub fn kind_accepts(kind: ValueKind, value: &PvValue) -> bool {
    !matches!((kind, value), (ValueKind::Int, PvValue::Double(_)))
}
