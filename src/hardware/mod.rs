//! Device Boundary
//!
//! Everything the harness knows about the detector goes through the
//! capability traits in [`capabilities`]. Two backends implement them:
//!
//! - [`ca_tools::CaToolsClient`] drives the EPICS base `caget`/`caput` tools
//! - [`mock::MockIoc`] is an in-memory IOC with fault injection

pub mod ca_tools;
pub mod capabilities;
pub mod mock;

pub use ca_tools::{CaToolsClient, CaToolsClientBuilder};
pub use capabilities::{ChannelAccess, ChannelReadable, ChannelWritable};
pub use mock::{FaultScenario, MockIoc};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{Backend, DeviceSettings};

/// Build the backend selected by `settings`.
pub fn connect(settings: &DeviceSettings) -> Arc<dyn ChannelAccess> {
    match settings.backend {
        Backend::CaTools => {
            tracing::debug!(
                caget = %settings.caget.display(),
                caput = %settings.caput.display(),
                timeout = ?settings.timeout,
                "Using Channel Access command line tools"
            );
            Arc::new(
                CaToolsClientBuilder::new()
                    .with_caget(settings.caget.clone())
                    .with_caput(settings.caput.clone())
                    .with_timeout(settings.timeout)
                    .build(),
            )
        }
        Backend::Mock => {
            tracing::warn!("Using the mock IOC; no detector will be contacted");
            Arc::new(MockIoc::new())
        }
    }
}

/// Value carried across the device boundary.
///
/// Deserializes untagged, so configuration can list plain numbers
/// (`values = [1, 10, 1000]` or `values = [0.5, 1.0]`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PvValue {
    /// Integer channel (DBR_LONG and friends)
    Int(i64),
    /// Floating point channel (DBR_DOUBLE)
    Double(f64),
}

impl PvValue {
    /// Parse the terse textual form printed by `caget -t`.
    ///
    /// Integer syntax is tried first so that `"1000"` stays an `Int`.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if let Ok(v) = trimmed.parse::<i64>() {
            return Some(PvValue::Int(v));
        }
        trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(PvValue::Double)
    }

    /// Numeric view of the value.
    pub fn as_f64(&self) -> f64 {
        match *self {
            PvValue::Int(v) => v as f64,
            PvValue::Double(v) => v,
        }
    }

    /// Magnitude of the value, used by the boundary-coverage lint.
    pub fn magnitude(&self) -> f64 {
        self.as_f64().abs()
    }

    /// Compare a written value with what came back.
    ///
    /// Integers compare exactly. As soon as either side is a double the
    /// comparison is numeric within `tolerance` (absolute). A channel that
    /// reports `1000.0` for a written `1000` therefore matches, while `999`
    /// never matches `1000`.
    pub fn matches(&self, actual: &PvValue, tolerance: f64) -> bool {
        match (self, actual) {
            (PvValue::Int(a), PvValue::Int(b)) => a == b,
            _ => (self.as_f64() - actual.as_f64()).abs() <= tolerance,
        }
    }
}

impl fmt::Display for PvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PvValue::Int(v) => write!(f, "{}", v),
            PvValue::Double(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for PvValue {
    fn from(value: i64) -> Self {
        PvValue::Int(value)
    }
}

impl From<i32> for PvValue {
    fn from(value: i32) -> Self {
        PvValue::Int(value.into())
    }
}

impl From<f64> for PvValue {
    fn from(value: f64) -> Self {
        PvValue::Double(value)
    }
}
