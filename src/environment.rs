//! Channel Access environment check.
//!
//! The CA client libraries locate IOCs through `EPICS_CA_ADDR_LIST`. A missing
//! value is usually a shell profile that was never sourced, and the symptom
//! later on is every channel timing out. The check runs once when a session is
//! established and either warns or aborts, depending on [`EnvPolicy`].

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, VerifyError};

/// Variable consulted by the environment check.
pub const EPICS_CA_ADDR_LIST: &str = "EPICS_CA_ADDR_LIST";

/// What to do when `EPICS_CA_ADDR_LIST` is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvPolicy {
    /// Log a warning and continue
    #[default]
    Warn,
    /// Fail session establishment
    Abort,
}

/// Result of the environment check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentReport {
    /// Value of `EPICS_CA_ADDR_LIST`, if set and non-empty
    pub ca_addr_list: Option<String>,
}

impl EnvironmentReport {
    pub fn is_complete(&self) -> bool {
        self.ca_addr_list.is_some()
    }
}

/// Check the Channel Access environment through `lookup`.
///
/// `lookup` is normally [`process_env`]; tests pass a closure over a fixed
/// map instead of mutating the process environment. An empty value counts as
/// absent.
pub fn check_ca_environment<F>(policy: EnvPolicy, lookup: F) -> AppResult<EnvironmentReport>
where
    F: Fn(&str) -> Option<String>,
{
    let ca_addr_list = lookup(EPICS_CA_ADDR_LIST).filter(|v| !v.trim().is_empty());

    match (&ca_addr_list, policy) {
        (Some(list), _) => {
            tracing::info!("{}: {}", EPICS_CA_ADDR_LIST, list);
        }
        (None, EnvPolicy::Warn) => {
            tracing::warn!(
                "{} not found. May be missing from the shell profile",
                EPICS_CA_ADDR_LIST
            );
        }
        (None, EnvPolicy::Abort) => {
            return Err(VerifyError::EnvironmentMissing {
                var: EPICS_CA_ADDR_LIST.to_string(),
            });
        }
    }

    Ok(EnvironmentReport { ca_addr_list })
}

/// Environment lookup backed by the process environment.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
