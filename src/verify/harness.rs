//! Sequential runner for verification checks.
//!
//! Cases run one at a time, in the order their values are declared, each
//! awaiting the device before the next one starts. A failing case is recorded
//! and the run moves on.

use serde::Serialize;
use tracing::Instrument;

use crate::config::CheckDefinition;
use crate::error::ChannelError;
use crate::hardware::{ChannelAccess, PvValue};
use crate::session::Session;
use crate::verify::case::{CaseResult, VerificationCase};
use crate::verify::report::VerificationReport;

/// What happened to the attribute's original value after a check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Restoration {
    /// Restoration was not requested; the device holds the last written value
    NotRequested { left_at: Option<PvValue> },
    /// The original value was written back
    Restored { value: PvValue },
    /// The original value could not be read, so nothing was written back
    Skipped { error: ChannelError },
    /// Writing the original value back failed
    Failed { value: PvValue, error: ChannelError },
}

/// Results of all cases of one check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub attribute: String,
    pub cases: Vec<CaseResult>,
    pub restoration: Restoration,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.cases.iter().all(|c| c.outcome.is_passed())
    }
}

/// Runs checks against one device within one session.
pub struct Harness<'s, D: ?Sized> {
    session: &'s Session,
    device: &'s D,
}

impl<'s, D> Harness<'s, D>
where
    D: ChannelAccess + ?Sized,
{
    pub fn new(session: &'s Session, device: &'s D) -> Self {
        Self { session, device }
    }

    /// Run one check: every value, in order, then the optional restoration.
    pub async fn run_check(&self, check: &CheckDefinition) -> CheckReport {
        let span = tracing::info_span!("check", attribute = %check.attribute);
        self.run_check_inner(check).instrument(span).await
    }

    async fn run_check_inner(&self, check: &CheckDefinition) -> CheckReport {
        let prefix = self.session.prefix();
        let channel = prefix.channel(&check.attribute);
        let values = check.effective_values();
        tracing::info!(cases = values.len(), "Running check");

        let original = if check.restore {
            Some(self.device.get(&channel).await)
        } else {
            None
        };

        let mut cases = Vec::with_capacity(values.len());
        for value in &values {
            let case = VerificationCase::new(prefix, &check.attribute, *value)
                .with_readback_suffix(&check.readback_suffix)
                .with_tolerance(check.tolerance);
            cases.push(case.run(self.device).await);
        }

        let restoration = match original {
            None => {
                let left_at = values.last().copied();
                if let Some(value) = left_at {
                    tracing::warn!(
                        %channel,
                        "Device left at last parametrized value {}",
                        value
                    );
                }
                Restoration::NotRequested { left_at }
            }
            Some(Err(error)) => {
                tracing::warn!(%channel, "Original value unknown, not restoring: {}", error);
                Restoration::Skipped { error }
            }
            Some(Ok(value)) => match self.device.put(&channel, &value).await {
                Ok(()) => {
                    tracing::info!(%channel, "Restored original value {}", value);
                    Restoration::Restored { value }
                }
                Err(error) => {
                    tracing::error!(%channel, "Restoring {} failed: {}", value, error);
                    Restoration::Failed { value, error }
                }
            },
        };

        CheckReport {
            attribute: check.attribute.clone(),
            cases,
            restoration,
        }
    }

    /// Run every check in order and collect a report.
    pub async fn run_all<'c, I>(&self, checks: I) -> VerificationReport
    where
        I: IntoIterator<Item = &'c CheckDefinition>,
    {
        let mut report = VerificationReport::begin(self.session, self.device.backend_name());
        for check in checks {
            report.checks.push(self.run_check(check).await);
        }
        report.finish();
        report
    }
}
