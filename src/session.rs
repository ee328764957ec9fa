//! Verification session.
//!
//! A [`Session`] is built once per run from a [`HarnessConfig`] and is
//! immutable afterwards. Establishing it is where configuration problems
//! surface: the prefix is resolved first, then the Channel Access environment
//! is checked. Verification cases borrow the session; nothing about it is
//! process-global.
//!
//! # Preconditions
//!
//! Cases write real values to the detector. Two sessions running against the
//! same IOC at the same time will overwrite each other's values and report
//! spurious mismatches; run one session per device at a time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::environment::{self, EnvironmentReport};
use crate::error::{AppResult, VerifyError};
use crate::validation;

/// Address namespace of the device under test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Prefix(String);

impl Prefix {
    /// Validate and wrap a prefix.
    pub fn new(raw: impl Into<String>) -> AppResult<Self> {
        let raw = raw.into();
        validation::is_valid_channel_fragment(&raw)
            .map_err(|e| VerifyError::Configuration(format!("epics_prefix '{}': {}", raw, e)))?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full channel name for `attribute` under this prefix.
    pub fn channel(&self, attribute: &str) -> String {
        format!("{}{}", self.0, attribute)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Prefix {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One verification session.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    id: Uuid,
    prefix: Prefix,
    environment: EnvironmentReport,
    started_at: DateTime<Utc>,
}

impl Session {
    /// Establish a session against the process environment.
    pub fn establish(config: &HarnessConfig) -> AppResult<Self> {
        Self::establish_with(config, environment::process_env)
    }

    /// Establish a session with an explicit environment lookup.
    pub fn establish_with<F>(config: &HarnessConfig, lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = config.epics_prefix()?;
        let environment =
            environment::check_ca_environment(config.session.on_missing_env, lookup)?;

        let session = Self {
            id: Uuid::new_v4(),
            prefix,
            environment,
            started_at: Utc::now(),
        };
        tracing::info!(session = %session.id, prefix = %session.prefix, "Session established");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The configured device prefix.
    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    pub fn environment(&self) -> &EnvironmentReport {
        &self.environment
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvPolicy;

    fn config_with_prefix(prefix: Option<&str>) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.session.epics_prefix = prefix.map(str::to_string);
        config
    }

    #[test]
    fn prefix_composes_channels() {
        let prefix = Prefix::new("DET:").unwrap();
        assert_eq!(prefix.channel("NumExposures"), "DET:NumExposures");
        assert_eq!(prefix.to_string(), "DET:");
    }

    #[test]
    fn prefix_rejects_whitespace() {
        assert!(matches!(
            Prefix::new("DET :"),
            Err(VerifyError::Configuration(_))
        ));
    }

    #[test]
    fn establish_resolves_prefix() {
        let config = config_with_prefix(Some("DET:"));
        let session = Session::establish_with(&config, |_| Some("127.0.0.1".into())).unwrap();
        assert_eq!(session.prefix().as_str(), "DET:");
        assert!(session.environment().is_complete());
    }

    #[test]
    fn missing_prefix_fails_before_environment_check() {
        let mut config = config_with_prefix(None);
        config.session.on_missing_env = EnvPolicy::Abort;
        let err = Session::establish_with(&config, |_| None).unwrap_err();
        assert!(matches!(err, VerifyError::ConfigurationMissing(_)));
    }

    #[test]
    fn missing_environment_is_advisory_by_default() {
        let config = config_with_prefix(Some("DET:"));
        let session = Session::establish_with(&config, |_| None).unwrap();
        assert!(!session.environment().is_complete());
    }

    #[test]
    fn missing_environment_aborts_when_strict() {
        let mut config = config_with_prefix(Some("DET:"));
        config.session.on_missing_env = EnvPolicy::Abort;
        let err = Session::establish_with(&config, |_| None).unwrap_err();
        assert!(matches!(err, VerifyError::EnvironmentMissing { .. }));
    }

    #[test]
    fn sessions_get_distinct_ids() {
        let config = config_with_prefix(Some("DET:"));
        let a = Session::establish_with(&config, |_| None).unwrap();
        let b = Session::establish_with(&config, |_| None).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
