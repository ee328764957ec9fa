//! A single parametrized write/read case.

use serde::Serialize;
use std::time::Instant;

use crate::error::ChannelError;
use crate::hardware::{ChannelAccess, PvValue};
use crate::session::Prefix;

/// Which half of the round trip a connection error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Write,
    Read,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Write => write!(f, "write"),
            Phase::Read => write!(f, "read"),
        }
    }
}

/// Outcome of one case.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    /// The value read back matched the value written
    Passed { written: PvValue, read: PvValue },
    /// The device answered, with the wrong value
    ValueMismatch { expected: PvValue, actual: PvValue },
    /// The device could not be written or read
    ConnectionError { phase: Phase, error: ChannelError },
}

impl CaseOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, CaseOutcome::Passed { .. })
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, CaseOutcome::ValueMismatch { .. })
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, CaseOutcome::ConnectionError { .. })
    }
}

/// Recorded result of one case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    pub attribute: String,
    pub channel: String,
    pub readback_channel: String,
    /// The parametrized input
    pub input: PvValue,
    pub outcome: CaseOutcome,
    pub duration_ms: u64,
}

impl std::fmt::Display for CaseResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            CaseOutcome::Passed { written, read } => write!(
                f,
                "PASS  {}[{}]: value set {} | value read {}",
                self.attribute, self.input, written, read
            ),
            CaseOutcome::ValueMismatch { expected, actual } => write!(
                f,
                "FAIL  {}[{}]: expected {} read from {}, got {}",
                self.attribute, self.input, expected, self.readback_channel, actual
            ),
            CaseOutcome::ConnectionError { phase, error } => write!(
                f,
                "ERROR {}[{}]: {} failed: {}",
                self.attribute, self.input, phase, error
            ),
        }
    }
}

/// Write `value` to `prefix + attribute`, read it back, compare.
#[derive(Debug, Clone)]
pub struct VerificationCase<'a> {
    prefix: &'a Prefix,
    attribute: &'a str,
    value: PvValue,
    readback_suffix: &'a str,
    tolerance: f64,
}

impl<'a> VerificationCase<'a> {
    pub fn new(prefix: &'a Prefix, attribute: &'a str, value: PvValue) -> Self {
        Self {
            prefix,
            attribute,
            value,
            readback_suffix: "",
            tolerance: 0.0,
        }
    }

    pub fn with_readback_suffix(mut self, suffix: &'a str) -> Self {
        self.readback_suffix = suffix;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Channel the value is written to.
    pub fn channel(&self) -> String {
        self.prefix.channel(self.attribute)
    }

    /// Channel the value is read back from.
    pub fn readback_channel(&self) -> String {
        format!("{}{}", self.channel(), self.readback_suffix)
    }

    /// Run the round trip. Never fails: every problem becomes an outcome.
    pub async fn run<D>(&self, device: &D) -> CaseResult
    where
        D: ChannelAccess + ?Sized,
    {
        let channel = self.channel();
        let readback_channel = self.readback_channel();
        let started = Instant::now();

        let outcome = match device.put(&channel, &self.value).await {
            Err(error) => CaseOutcome::ConnectionError {
                phase: Phase::Write,
                error,
            },
            Ok(()) => match device.get(&readback_channel).await {
                Err(error) => CaseOutcome::ConnectionError {
                    phase: Phase::Read,
                    error,
                },
                Ok(read) if self.value.matches(&read, self.tolerance) => CaseOutcome::Passed {
                    written: self.value,
                    read,
                },
                Ok(read) => CaseOutcome::ValueMismatch {
                    expected: self.value,
                    actual: read,
                },
            },
        };

        let result = CaseResult {
            attribute: self.attribute.to_string(),
            channel,
            readback_channel,
            input: self.value,
            outcome,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        match &result.outcome {
            CaseOutcome::Passed { written, read } => {
                tracing::info!(channel = %result.channel, "Value set: {} | Value read: {}", written, read);
            }
            CaseOutcome::ValueMismatch { expected, actual } => {
                tracing::warn!(channel = %result.readback_channel, %expected, %actual, "Readback mismatch");
            }
            CaseOutcome::ConnectionError { phase, error } => {
                tracing::error!(%phase, kind = %error.kind, "{}", error);
                if error.is_unreachable() {
                    tracing::warn!(
                        "Device unreachable; check that the IOC is running and {} covers it",
                        crate::environment::EPICS_CA_ADDR_LIST
                    );
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelErrorKind;
    use crate::hardware::{FaultScenario, MockIoc};

    fn prefix() -> Prefix {
        Prefix::new("DET:").unwrap()
    }

    #[tokio::test]
    async fn round_trip_passes() {
        let prefix = prefix();
        let ioc = MockIoc::new();
        let result = VerificationCase::new(&prefix, "NumExposures", PvValue::Int(10))
            .run(&ioc)
            .await;
        assert_eq!(
            result.outcome,
            CaseOutcome::Passed {
                written: PvValue::Int(10),
                read: PvValue::Int(10)
            }
        );
        assert_eq!(result.channel, "DET:NumExposures");
    }

    #[tokio::test]
    async fn duration_covers_both_device_calls() {
        let prefix = prefix();
        let ioc = MockIoc::new().with_latency(std::time::Duration::from_millis(5));
        let result = VerificationCase::new(&prefix, "NumExposures", PvValue::Int(1))
            .run(&ioc)
            .await;
        assert!(result.outcome.is_passed());
        assert!(result.duration_ms >= 10, "got {}ms", result.duration_ms);
    }

    #[tokio::test]
    async fn readback_suffix_reads_other_channel() {
        let prefix = prefix();
        let ioc = MockIoc::new().with_channel("DET:NumImages_RBV", 3);
        let result = VerificationCase::new(&prefix, "NumImages", PvValue::Int(5))
            .with_readback_suffix("_RBV")
            .run(&ioc)
            .await;
        assert_eq!(result.readback_channel, "DET:NumImages_RBV");
        assert_eq!(
            result.outcome,
            CaseOutcome::ValueMismatch {
                expected: PvValue::Int(5),
                actual: PvValue::Int(3)
            }
        );
    }

    #[tokio::test]
    async fn write_timeout_is_connection_error_in_write_phase() {
        let prefix = prefix();
        let ioc = MockIoc::new().with_scenario(FaultScenario::WriteTimeout {
            channel: "DET:NumExposures".into(),
        });
        let result = VerificationCase::new(&prefix, "NumExposures", PvValue::Int(1))
            .run(&ioc)
            .await;
        match result.outcome {
            CaseOutcome::ConnectionError { phase, error } => {
                assert_eq!(phase, Phase::Write);
                assert_eq!(error.kind, ChannelErrorKind::Timeout);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn tolerance_applies_to_doubles() {
        let prefix = prefix();
        let ioc = MockIoc::new().with_scenario(FaultScenario::CorruptReadback {
            channel: "DET:AcquireTime".into(),
            value: PvValue::Double(0.100_000_2),
        });
        let result = VerificationCase::new(&prefix, "AcquireTime", PvValue::Double(0.1))
            .with_tolerance(1e-6)
            .run(&ioc)
            .await;
        assert!(result.outcome.is_passed());
    }

    #[test]
    fn display_reports_expected_and_actual() {
        let result = CaseResult {
            attribute: "NumExposures".into(),
            channel: "DET:NumExposures".into(),
            readback_channel: "DET:NumExposures".into(),
            input: PvValue::Int(1000),
            outcome: CaseOutcome::ValueMismatch {
                expected: PvValue::Int(1000),
                actual: PvValue::Int(999),
            },
            duration_ms: 4,
        };
        let line = result.to_string();
        assert!(line.contains("expected 1000"));
        assert!(line.contains("got 999"));
    }
}
