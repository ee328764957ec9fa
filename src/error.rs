//! Custom error types for the harness.
//!
//! Two families of errors exist, and they are deliberately kept apart:
//!
//! - **`VerifyError`**: session-level failures. These surface while a session
//!   is being established (configuration could not be parsed, a required
//!   setting is missing, the environment check aborted) and stop the run
//!   before any device is touched.
//! - **`ChannelError`**: failures of a single get/put against the device. These
//!   are recorded against the verification case that triggered them and never
//!   abort the remaining cases.
//!
//! A value that reads back differently from what was written is *not* an
//! error in either family; it is a case outcome (see
//! [`crate::verify::CaseOutcome::ValueMismatch`]).

use thiserror::Error;

/// Convenience alias for results using the session error type.
pub type AppResult<T> = std::result::Result<T, VerifyError>;

/// Session-level errors.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Required setting '{0}' is missing from the configuration")]
    ConfigurationMissing(String),

    #[error("Required environment variable {var} is not set")]
    EnvironmentMissing { var: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl From<figment::Error> for VerifyError {
    fn from(value: figment::Error) -> Self {
        VerifyError::Config(Box::new(value))
    }
}

impl VerifyError {
    /// True for errors raised while resolving configuration or environment.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            VerifyError::Config(_)
                | VerifyError::Configuration(_)
                | VerifyError::ConfigurationMissing(_)
                | VerifyError::EnvironmentMissing { .. }
        )
    }
}

/// Classification of a failed device call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelErrorKind {
    /// The channel did not connect or answer within the timeout.
    Timeout,
    /// The device answered with an error, or the link dropped.
    Communication,
    /// The Channel Access client itself could not be started.
    ClientUnavailable,
    /// The client answered but its output could not be understood.
    Protocol,
    /// The device refused the written value.
    Rejected,
}

impl std::fmt::Display for ChannelErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ChannelErrorKind::Timeout => "timeout",
            ChannelErrorKind::Communication => "communication",
            ChannelErrorKind::ClientUnavailable => "client_unavailable",
            ChannelErrorKind::Protocol => "protocol",
            ChannelErrorKind::Rejected => "rejected",
        };
        write!(f, "{}", label)
    }
}

/// A failed get or put against a single channel.
#[derive(Error, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[error("Channel '{channel}' {kind} error: {message}")]
pub struct ChannelError {
    pub channel: String,
    pub kind: ChannelErrorKind,
    pub message: String,
}

impl ChannelError {
    pub fn new(
        channel: impl Into<String>,
        kind: ChannelErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(channel, ChannelErrorKind::Timeout, message)
    }

    /// True when the device could not be reached at all, as opposed to
    /// answering with something unexpected.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self.kind,
            ChannelErrorKind::Timeout | ChannelErrorKind::ClientUnavailable
        )
    }
}
