//! Channel Access through the EPICS base command-line tools.
//!
//! `CaToolsClient` treats `caget` and `caput` as an opaque collaborator: each
//! get/put spawns one tool invocation and interprets its exit status and
//! terse output. The wire protocol stays inside the tools.
//!
//! Timeouts are layered. The tools receive the configured timeout through
//! `-w`, so an unreachable IOC normally produces the tool's own
//! "Channel connect timed out" message. The invocation itself is bounded by
//! that timeout plus a grace period, so a hung tool is reported the same way.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

use crate::error::{ChannelError, ChannelErrorKind};
use crate::hardware::capabilities::{ChannelAccess, ChannelReadable, ChannelWritable};
use crate::hardware::PvValue;

/// Output fragments the CA tools print when a channel never answered.
static TIMEOUT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(channel connect timed out|not connected|timed out|timeout)")
        .expect("Invalid timeout regex")
});

/// Builder for constructing [`CaToolsClient`] with custom configuration
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use pimega_verify::hardware::CaToolsClientBuilder;
///
/// let client = CaToolsClientBuilder::new()
///     .with_timeout(Duration::from_secs(2))
///     .with_caget("/opt/epics/base/bin/linux-x86_64/caget")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct CaToolsClientBuilder {
    caget: PathBuf,
    caput: PathBuf,
    timeout: Duration,
    grace: Duration,
    wait_for_completion: bool,
}

impl CaToolsClientBuilder {
    /// Default configuration:
    /// * tools resolved through `PATH`
    /// * timeout: 3 seconds
    /// * grace: 2 seconds on top of the timeout
    /// * puts wait for record processing to complete (`caput -c`)
    pub fn new() -> Self {
        Self {
            caget: PathBuf::from("caget"),
            caput: PathBuf::from("caput"),
            timeout: Duration::from_secs(3),
            grace: Duration::from_secs(2),
            wait_for_completion: true,
        }
    }

    /// Path to the `caget` executable
    pub fn with_caget(mut self, path: impl Into<PathBuf>) -> Self {
        self.caget = path.into();
        self
    }

    /// Path to the `caput` executable
    pub fn with_caput(mut self, path: impl Into<PathBuf>) -> Self {
        self.caput = path.into();
        self
    }

    /// Channel Access timeout handed to the tools (`-w`)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra time granted to a tool invocation before it is killed
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Whether `caput` waits for the put callback (`-c`)
    pub fn with_wait_for_completion(mut self, wait: bool) -> Self {
        self.wait_for_completion = wait;
        self
    }

    pub fn build(self) -> CaToolsClient {
        CaToolsClient {
            caget: self.caget,
            caput: self.caput,
            timeout: self.timeout,
            grace: self.grace,
            wait_for_completion: self.wait_for_completion,
        }
    }
}

impl Default for CaToolsClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel Access client backed by `caget`/`caput` subprocesses.
#[derive(Debug, Clone)]
pub struct CaToolsClient {
    caget: PathBuf,
    caput: PathBuf,
    timeout: Duration,
    grace: Duration,
    wait_for_completion: bool,
}

impl CaToolsClient {
    /// Client with default configuration. See [`CaToolsClientBuilder`].
    pub fn new() -> Self {
        CaToolsClientBuilder::new().build()
    }

    fn wait_arg(&self) -> String {
        format!("{}", self.timeout.as_secs_f64())
    }

    fn caget_args(&self, channel: &str) -> Vec<String> {
        // -n keeps enum channels numeric
        vec![
            "-t".to_string(),
            "-n".to_string(),
            "-w".to_string(),
            self.wait_arg(),
            "--".to_string(),
            channel.to_string(),
        ]
    }

    fn caput_args(&self, channel: &str, value: &PvValue) -> Vec<String> {
        let mut args = vec!["-t".to_string()];
        if self.wait_for_completion {
            args.push("-c".to_string());
        }
        args.push("-w".to_string());
        args.push(self.wait_arg());
        // getopt would take a negative value for an option
        args.push("--".to_string());
        args.push(channel.to_string());
        args.push(value.to_string());
        args
    }

    async fn invoke(
        &self,
        program: &Path,
        args: &[String],
        channel: &str,
    ) -> Result<Output, ChannelError> {
        tracing::trace!(program = %program.display(), ?args, "Invoking CA tool");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(channel, program, e))?;

        let limit = self.timeout + self.grace;
        match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ChannelError::new(
                channel,
                ChannelErrorKind::Communication,
                format!("failed to collect {} output: {}", program.display(), e),
            )),
            Err(_) => Err(ChannelError::timeout(
                channel,
                format!("{} did not finish within {:?}", program.display(), limit),
            )),
        }
    }
}

impl Default for CaToolsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelReadable for CaToolsClient {
    async fn get(&self, channel: &str) -> Result<PvValue, ChannelError> {
        let output = self
            .invoke(&self.caget, &self.caget_args(channel), channel)
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(channel, Operation::Get, &stdout, &stderr));
        }
        let value = parse_caget_output(channel, &stdout)?;
        tracing::debug!(channel, %value, "caget");
        Ok(value)
    }
}

#[async_trait]
impl ChannelWritable for CaToolsClient {
    async fn put(&self, channel: &str, value: &PvValue) -> Result<(), ChannelError> {
        let output = self
            .invoke(&self.caput, &self.caput_args(channel, value), channel)
            .await?;
        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(channel, Operation::Put, &stdout, &stderr));
        }
        tracing::debug!(channel, %value, "caput");
        Ok(())
    }
}

impl ChannelAccess for CaToolsClient {
    fn backend_name(&self) -> &'static str {
        "ca_tools"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Get,
    Put,
}

fn spawn_error(channel: &str, program: &Path, err: std::io::Error) -> ChannelError {
    let kind = if err.kind() == std::io::ErrorKind::NotFound {
        ChannelErrorKind::ClientUnavailable
    } else {
        ChannelErrorKind::Communication
    };
    ChannelError::new(
        channel,
        kind,
        format!("cannot run {}: {}", program.display(), err),
    )
}

/// Map a failed tool invocation onto a [`ChannelErrorKind`].
fn classify_failure(channel: &str, op: Operation, stdout: &str, stderr: &str) -> ChannelError {
    let combined = format!("{} {}", stderr.trim(), stdout.trim());
    let message = combined.trim().to_string();
    let message = if message.is_empty() {
        "tool exited with an error and no output".to_string()
    } else {
        message
    };

    let kind = if TIMEOUT_PATTERN.is_match(&message) {
        ChannelErrorKind::Timeout
    } else {
        match op {
            Operation::Get => ChannelErrorKind::Communication,
            Operation::Put => ChannelErrorKind::Rejected,
        }
    };
    ChannelError::new(channel, kind, message)
}

/// Parse the first line of `caget -t -n` output.
fn parse_caget_output(channel: &str, stdout: &str) -> Result<PvValue, ChannelError> {
    let first = stdout.lines().map(str::trim).find(|l| !l.is_empty());
    match first.and_then(PvValue::parse) {
        Some(value) => Ok(value),
        None => Err(ChannelError::new(
            channel,
            ChannelErrorKind::Protocol,
            format!("unexpected caget output: {:?}", stdout.trim()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caget_args_are_terse_and_numeric() {
        let client = CaToolsClientBuilder::new()
            .with_timeout(Duration::from_millis(1500))
            .build();
        assert_eq!(
            client.caget_args("DET:NumExposures"),
            vec!["-t", "-n", "-w", "1.5", "--", "DET:NumExposures"]
        );
    }

    #[test]
    fn caput_args_wait_for_completion_by_default() {
        let client = CaToolsClient::new();
        assert_eq!(
            client.caput_args("DET:NumExposures", &PvValue::Int(1000)),
            vec!["-t", "-c", "-w", "3", "--", "DET:NumExposures", "1000"]
        );

        let no_wait = CaToolsClientBuilder::new()
            .with_wait_for_completion(false)
            .build();
        assert!(!no_wait
            .caput_args("DET:AcquireTime", &PvValue::Double(0.5))
            .contains(&"-c".to_string()));
    }

    #[test]
    fn negative_values_follow_end_of_options() {
        let client = CaToolsClient::new();
        let args = client.caput_args("DET:THRESHOLD0", &PvValue::Int(-5));
        let end = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(&args[end + 1..], &["DET:THRESHOLD0", "-5"]);
    }

    #[test]
    fn connect_timeout_is_classified_as_timeout() {
        let err = classify_failure(
            "DET:NumExposures",
            Operation::Get,
            "",
            "Channel connect timed out: 'DET:NumExposures' not found.",
        );
        assert_eq!(err.kind, ChannelErrorKind::Timeout);
        assert!(err.message.contains("not found"));
    }

    #[test]
    fn failed_put_without_timeout_is_rejected() {
        let err = classify_failure(
            "DET:NumImages",
            Operation::Put,
            "",
            "Error from put operation: Put failed",
        );
        assert_eq!(err.kind, ChannelErrorKind::Rejected);
    }

    #[test]
    fn failed_get_without_output_is_communication() {
        let err = classify_failure("DET:NumImages", Operation::Get, "", "");
        assert_eq!(err.kind, ChannelErrorKind::Communication);
        assert!(!err.message.is_empty());
    }

    #[test]
    fn caget_output_parsing() {
        assert_eq!(
            parse_caget_output("X", "1000\n").unwrap(),
            PvValue::Int(1000)
        );
        assert_eq!(
            parse_caget_output("X", "\n0.1\n").unwrap(),
            PvValue::Double(0.1)
        );
        let err = parse_caget_output("X", "Internal\n").unwrap_err();
        assert_eq!(err.kind, ChannelErrorKind::Protocol);
    }

    #[tokio::test]
    async fn missing_tool_is_client_unavailable() {
        let client = CaToolsClientBuilder::new()
            .with_caget("/nonexistent/path/to/caget")
            .build();
        let err = client.get("DET:NumExposures").await.unwrap_err();
        assert_eq!(err.kind, ChannelErrorKind::ClientUnavailable);
        assert!(err.is_unreachable());
    }

    /// Executable script that records its pid and then hangs.
    #[cfg(target_os = "linux")]
    fn hanging_tool(dir: &Path) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let pid_file = dir.join("caget.pid");
        let script = dir.join("caget");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho $$ > {}\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script, pid_file)
    }

    /// True while `pid` exists and is not a zombie.
    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .map_or(false, |state| state != "Z"),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn hung_tool_times_out_and_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let (script, pid_file) = hanging_tool(dir.path());
        let client = CaToolsClientBuilder::new()
            .with_caget(script)
            .with_timeout(Duration::from_millis(50))
            .with_grace(Duration::from_millis(50))
            .build();

        let started = std::time::Instant::now();
        let err = client.get("DET:NumExposures").await.unwrap_err();
        assert_eq!(err.kind, ChannelErrorKind::Timeout);
        assert!(err.message.contains("did not finish"));
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        let mut killed = false;
        for _ in 0..50 {
            if !is_running(pid) {
                killed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(killed, "tool process {} still running", pid);
    }
}
