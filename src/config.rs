//! Harness Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `pimega_verify.toml` (or the path given on the command line)
//! 2. Environment variables prefixed with `PIMEGA_VERIFY_`, sections separated
//!    by a double underscore: `PIMEGA_VERIFY_SESSION__EPICS_PREFIX=DET:`
//!
//! # Example
//! ```no_run
//! use pimega_verify::config::HarnessConfig;
//!
//! let config = HarnessConfig::load()?;
//! config.validate()?;
//! println!("Prefix: {}", config.epics_prefix()?);
//! # Ok::<(), pimega_verify::error::VerifyError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::attributes::{self, ValueKind};
use crate::environment::EnvPolicy;
use crate::error::{AppResult, VerifyError};
use crate::hardware::PvValue;
use crate::session::Prefix;
use crate::validation;

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "pimega_verify.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "PIMEGA_VERIFY_";

/// Magnitude a parametrization set should reach to exercise wide values.
pub const BOUNDARY_MAGNITUDE: f64 = 1000.0;

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Session settings
    #[serde(default)]
    pub session: SessionSettings,
    /// Device backend settings
    #[serde(default)]
    pub device: DeviceSettings,
    /// Verification checks; the default `NumExposures` check when omitted
    #[serde(default = "default_checks")]
    pub checks: Vec<CheckDefinition>,
}

/// Session-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Address prefix of the detector IOC
    #[serde(default)]
    pub epics_prefix: Option<String>,
    /// Reaction to a missing `EPICS_CA_ADDR_LIST`
    #[serde(default)]
    pub on_missing_env: EnvPolicy,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            epics_prefix: None,
            on_missing_env: EnvPolicy::default(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Which device backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// EPICS base `caget`/`caput`
    #[default]
    CaTools,
    /// In-memory IOC, for dry runs
    Mock,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ca_tools" | "ca-tools" => Ok(Backend::CaTools),
            "mock" => Ok(Backend::Mock),
            other => Err(format!(
                "Invalid backend '{}'. Must be one of: ca_tools, mock",
                other
            )),
        }
    }
}

/// Device backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default)]
    pub backend: Backend,
    /// Channel Access timeout for each get/put
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// `caget` executable
    #[serde(default = "default_caget")]
    pub caget: PathBuf,
    /// `caput` executable
    #[serde(default = "default_caput")]
    pub caput: PathBuf,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            timeout: default_timeout(),
            caget: default_caget(),
            caput: default_caput(),
        }
    }
}

/// One attribute to verify, with its parametrization set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    /// Attribute name appended to the prefix (e.g. "NumExposures")
    pub attribute: String,
    /// Values to write, in order; catalog defaults when empty
    #[serde(default)]
    pub values: Vec<PvValue>,
    /// Value kind; required for attributes outside the catalog
    #[serde(default)]
    pub kind: Option<ValueKind>,
    /// Suffix of the readback channel ("" reads the written channel)
    #[serde(default)]
    pub readback_suffix: String,
    /// Absolute tolerance for floating point comparisons
    #[serde(default)]
    pub tolerance: f64,
    /// Write the original value back after the last case
    #[serde(default)]
    pub restore: bool,
    /// Whether this check runs
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl CheckDefinition {
    /// Check with catalog defaults for `attribute`
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            values: Vec::new(),
            kind: None,
            readback_suffix: String::new(),
            tolerance: 0.0,
            restore: false,
            enabled: true,
        }
    }

    /// Override the parametrization set
    pub fn with_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<PvValue>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Read back from `attribute + suffix` instead of the written channel
    pub fn with_readback_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.readback_suffix = suffix.into();
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    /// Values the check will write: explicit values, else catalog defaults.
    pub fn effective_values(&self) -> Vec<PvValue> {
        if !self.values.is_empty() {
            return self.values.clone();
        }
        attributes::lookup(&self.attribute)
            .map(|a| a.default_values.to_vec())
            .unwrap_or_default()
    }

    /// Declared kind, else the catalog kind.
    pub fn effective_kind(&self) -> Option<ValueKind> {
        self.kind
            .or_else(|| attributes::lookup(&self.attribute).map(|a| a.kind))
    }

    /// Whether the parametrization reaches a boundary-adjacent magnitude.
    pub fn covers_boundary_magnitude(&self) -> bool {
        self.effective_values()
            .iter()
            .any(|v| v.magnitude() >= BOUNDARY_MAGNITUDE)
    }

    fn validate(&self) -> AppResult<()> {
        let attr = &self.attribute;
        validation::is_valid_channel_fragment(attr)
            .map_err(|e| VerifyError::Configuration(format!("Check '{}': {}", attr, e)))?;
        if !self.readback_suffix.is_empty() {
            validation::is_valid_channel_fragment(&self.readback_suffix).map_err(|e| {
                VerifyError::Configuration(format!("Check '{}' readback_suffix: {}", attr, e))
            })?;
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(VerifyError::Configuration(format!(
                "Check '{}': tolerance must be a non-negative number",
                attr
            )));
        }

        let kind = self.effective_kind().ok_or_else(|| {
            VerifyError::Configuration(format!(
                "Check '{}': attribute is not in the catalog, declare its kind",
                attr
            ))
        })?;

        let values = self.effective_values();
        if values.is_empty() {
            return Err(VerifyError::Configuration(format!(
                "Check '{}': no values to verify",
                attr
            )));
        }

        let catalog_limits = attributes::lookup(attr).map(|a| &a.limits);
        for value in &values {
            if !attributes::kind_accepts(kind, value) {
                return Err(VerifyError::Configuration(format!(
                    "Check '{}': value {} is not a valid {}",
                    attr, value, kind
                )));
            }
            if let Some(limits) = catalog_limits {
                if !limits.accepts(value) {
                    return Err(VerifyError::Configuration(format!(
                        "Check '{}': value {} outside accepted range {}",
                        attr, value, limits
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            device: DeviceSettings::default(),
            checks: default_checks(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_caget() -> PathBuf {
    PathBuf::from("caget")
}

fn default_caput() -> PathBuf {
    PathBuf::from("caput")
}

fn default_enabled() -> bool {
    true
}

fn default_checks() -> Vec<CheckDefinition> {
    vec![CheckDefinition::new("NumExposures")]
}

impl HarnessConfig {
    /// Load configuration from `pimega_verify.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error at this point; the settings it would
    /// have provided are then checked individually (see [`Self::epics_prefix`]).
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The figment the configuration is extracted from
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Resolve the EPICS prefix.
    ///
    /// Fails with `ConfigurationMissing` when the prefix is absent or blank.
    pub fn epics_prefix(&self) -> AppResult<Prefix> {
        match self.session.epics_prefix.as_deref() {
            Some(raw) if validation::is_not_blank(raw).is_ok() => Prefix::new(raw.trim()),
            _ => Err(VerifyError::ConfigurationMissing("epics_prefix".to_string())),
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.session.log_level.to_lowercase().as_str()) {
            return Err(VerifyError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.session.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.session.log_format.to_lowercase().as_str()) {
            return Err(VerifyError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.session.log_format,
                valid_formats.join(", ")
            )));
        }

        validation::is_positive_duration(self.device.timeout)
            .map_err(|e| VerifyError::Configuration(format!("device.timeout: {}", e)))?;

        let mut seen = std::collections::HashSet::new();
        for check in &self.checks {
            check.validate()?;
            if !seen.insert(check.attribute.as_str()) {
                return Err(VerifyError::Configuration(format!(
                    "Duplicate check for attribute: {}",
                    check.attribute
                )));
            }
            if check.enabled && !check.covers_boundary_magnitude() {
                tracing::warn!(
                    attribute = %check.attribute,
                    "Parametrization never reaches magnitude {}; truncation bugs may go unnoticed",
                    BOUNDARY_MAGNITUDE
                );
            }
        }

        if self.enabled_checks().is_empty() {
            return Err(VerifyError::Configuration(
                "No enabled checks; at least one attribute must be verified".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks that will run
    pub fn enabled_checks(&self) -> Vec<&CheckDefinition> {
        self.checks.iter().filter(|c| c.enabled).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn loads_prefix_and_defaults_from_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "pimega_verify.toml",
                r#"
                [session]
                epics_prefix = "DET:"
                "#,
            )?;

            let config = HarnessConfig::load().expect("config loads");
            assert_eq!(config.epics_prefix().unwrap().as_str(), "DET:");
            assert_eq!(config.session.on_missing_env, EnvPolicy::Warn);
            assert_eq!(config.device.backend, Backend::CaTools);
            assert_eq!(config.device.timeout, Duration::from_secs(3));
            assert_eq!(config.checks, vec![CheckDefinition::new("NumExposures")]);
            assert_eq!(
                config.checks[0].effective_values(),
                vec![PvValue::Int(1), PvValue::Int(10), PvValue::Int(1000)]
            );
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn missing_prefix_is_configuration_missing() {
        Jail::expect_with(|jail| {
            jail.create_file("pimega_verify.toml", "[session]\nlog_level = \"debug\"\n")?;
            let config = HarnessConfig::load().expect("config loads");
            let err = config.epics_prefix().unwrap_err();
            assert!(matches!(err, VerifyError::ConfigurationMissing(ref k) if k == "epics_prefix"));
            Ok(())
        });
    }

    #[test]
    fn blank_prefix_is_configuration_missing() {
        let mut config = HarnessConfig::default();
        config.session.epics_prefix = Some("   ".into());
        assert!(matches!(
            config.epics_prefix(),
            Err(VerifyError::ConfigurationMissing(_))
        ));
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "pimega_verify.toml",
                "[session]\nepics_prefix = \"DET:\"\n[device]\ntimeout = \"3s\"\n",
            )?;
            jail.set_env("PIMEGA_VERIFY_SESSION__EPICS_PREFIX", "LAB:PIMEGA:");
            jail.set_env("PIMEGA_VERIFY_DEVICE__BACKEND", "mock");

            let config = HarnessConfig::load().expect("config loads");
            assert_eq!(config.epics_prefix().unwrap().as_str(), "LAB:PIMEGA:");
            assert_eq!(config.device.backend, Backend::Mock);
            Ok(())
        });
    }

    #[test]
    fn parses_checks_and_humantime() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                [session]
                epics_prefix = "DET:"
                on_missing_env = "abort"

                [device]
                timeout = "500ms"

                [[checks]]
                attribute = "NumImages"
                values = [1, 100, 16383]
                readback_suffix = "_RBV"
                restore = true

                [[checks]]
                attribute = "AcquireTime"
                values = [0.01, 1.5]
                tolerance = 1e-6
                enabled = false
                "#,
            )?;

            let config = HarnessConfig::load_from("custom.toml").expect("config loads");
            assert_eq!(config.session.on_missing_env, EnvPolicy::Abort);
            assert_eq!(config.device.timeout, Duration::from_millis(500));
            assert_eq!(config.checks.len(), 2);
            assert_eq!(config.checks[0].readback_suffix, "_RBV");
            assert!(config.checks[0].restore);
            assert_eq!(config.checks[1].values[1], PvValue::Double(1.5));
            assert_eq!(config.enabled_checks().len(), 1);
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        let config = HarnessConfig {
            checks: vec![CheckDefinition::new("NumImages").with_values([1, 20000])],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("outside accepted range"));
    }

    #[test]
    fn double_value_on_integer_attribute_is_rejected() {
        let config = HarnessConfig {
            checks: vec![CheckDefinition::new("NumExposures").with_values([1.5])],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_attribute_needs_kind() {
        let mut check = CheckDefinition::new("THRESHOLD0").with_values([10, 1000]);
        let config = HarnessConfig {
            checks: vec![check.clone()],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        check.kind = Some(ValueKind::Int);
        let config = HarnessConfig {
            checks: vec![check],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn duplicate_checks_are_rejected() {
        let config = HarnessConfig {
            checks: vec![
                CheckDefinition::new("NumExposures"),
                CheckDefinition::new("NumExposures"),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_check_set_is_rejected() {
        let config = HarnessConfig {
            checks: Vec::new(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_setup_failure());
        assert!(err.to_string().contains("No enabled checks"));

        let config = HarnessConfig {
            checks: vec![CheckDefinition {
                enabled: false,
                ..CheckDefinition::new("NumExposures")
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_attribute_accepts_negative_values() {
        let config = HarnessConfig {
            checks: vec![CheckDefinition {
                kind: Some(ValueKind::Int),
                ..CheckDefinition::new("THRESHOLD0").with_values([-5, 0, 1000])
            }],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_log_level() {
        let mut config = HarnessConfig::default();
        config.session.log_level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn boundary_coverage() {
        assert!(CheckDefinition::new("NumExposures").covers_boundary_magnitude());
        assert!(!CheckDefinition::new("NumExposures")
            .with_values([1, 10])
            .covers_boundary_magnitude());
    }

    #[test]
    fn backend_from_str() {
        assert_eq!("mock".parse::<Backend>().unwrap(), Backend::Mock);
        assert_eq!("ca-tools".parse::<Backend>().unwrap(), Backend::CaTools);
        assert!("pva".parse::<Backend>().is_err());
    }
}
