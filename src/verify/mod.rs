//! Write/read verification.
//!
//! - [`case`]: one parametrized round trip and its outcome
//! - [`harness`]: sequential runner over configured checks
//! - [`report`]: session report, summary and exit codes

pub mod case;
pub mod harness;
pub mod report;

pub use case::{CaseOutcome, CaseResult, Phase, VerificationCase};
pub use harness::{CheckReport, Harness, Restoration};
pub use report::{Summary, VerificationReport};
