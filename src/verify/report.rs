//! Session report and summary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use uuid::Uuid;

use crate::error::AppResult;
use crate::session::{Prefix, Session};
use crate::verify::harness::{CheckReport, Restoration};

/// Exit code when every case passed.
pub const EXIT_PASSED: i32 = 0;
/// Exit code when at least one value mismatched and no device was unreachable.
pub const EXIT_MISMATCH: i32 = 1;
/// Exit code when at least one case could not reach the device.
pub const EXIT_CONNECTION: i32 = 2;
/// Exit code when the session could not be established.
pub const EXIT_SETUP: i32 = 3;

/// Counts over all cases of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub mismatched: usize,
    pub connection_errors: usize,
}

impl Summary {
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }

    /// Process exit code for this summary. Connection errors dominate.
    pub fn exit_code(&self) -> i32 {
        if self.connection_errors > 0 {
            EXIT_CONNECTION
        } else if self.mismatched > 0 {
            EXIT_MISMATCH
        } else {
            EXIT_PASSED
        }
    }
}

/// Everything a session produced.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub session_id: Uuid,
    pub prefix: Prefix,
    pub backend: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub system_info: HashMap<String, String>,
    pub checks: Vec<CheckReport>,
}

impl VerificationReport {
    /// Empty report for `session`.
    pub fn begin(session: &Session, backend: &str) -> Self {
        let mut system_info = HashMap::new();
        system_info.insert(
            "software_version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        if let Ok(hostname) = hostname::get() {
            if let Ok(hostname_str) = hostname.into_string() {
                system_info.insert("hostname".to_string(), hostname_str);
            }
        }
        if let Some(list) = &session.environment().ca_addr_list {
            system_info.insert("epics_ca_addr_list".to_string(), list.clone());
        }

        Self {
            session_id: session.id(),
            prefix: session.prefix().clone(),
            backend: backend.to_string(),
            started_at: session.started_at(),
            finished_at: None,
            system_info,
            checks: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for case in self.checks.iter().flat_map(|c| c.cases.iter()) {
            summary.total += 1;
            if case.outcome.is_passed() {
                summary.passed += 1;
            } else if case.outcome.is_mismatch() {
                summary.mismatched += 1;
            } else {
                summary.connection_errors += 1;
            }
        }
        summary
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable rendering, one line per case.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Session {} | prefix {} | backend {}",
            self.session_id, self.prefix, self.backend
        );
        for check in &self.checks {
            let _ = writeln!(out, "\n{}", check.attribute);
            for case in &check.cases {
                let _ = writeln!(out, "  {}", case);
            }
            match &check.restoration {
                Restoration::NotRequested {
                    left_at: Some(value),
                } => {
                    let _ = writeln!(out, "  note: device left at {}", value);
                }
                Restoration::NotRequested { left_at: None } => {}
                Restoration::Restored { value } => {
                    let _ = writeln!(out, "  restored original value {}", value);
                }
                Restoration::Skipped { error } => {
                    let _ = writeln!(out, "  not restored, original unknown: {}", error);
                }
                Restoration::Failed { value, error } => {
                    let _ = writeln!(out, "  restoring {} failed: {}", value, error);
                }
            }
        }

        let summary = self.summary();
        let _ = writeln!(
            out,
            "\n{} cases: {} passed, {} value mismatches, {} connection errors",
            summary.total, summary.passed, summary.mismatched, summary.connection_errors
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_precedence() {
        let mut summary = Summary {
            total: 3,
            passed: 3,
            ..Default::default()
        };
        assert!(summary.all_passed());
        assert_eq!(summary.exit_code(), EXIT_PASSED);

        summary.passed = 2;
        summary.mismatched = 1;
        assert_eq!(summary.exit_code(), EXIT_MISMATCH);

        summary.passed = 1;
        summary.connection_errors = 1;
        assert_eq!(summary.exit_code(), EXIT_CONNECTION);
    }
}
