//! CLI Entry Point for pimega_verify
//!
//! Provides command-line interface for:
//! - Running the configured write/read checks against the detector IOC
//! - One-shot `get`/`put` of a single attribute
//! - Listing the attribute catalog
//! - Checking the Channel Access environment
//!
//! # Usage
//!
//! Run every enabled check:
//! ```bash
//! pimega_verify run --config pimega_verify.toml
//! ```
//!
//! Dry run against the mock IOC, JSON report on stdout:
//! ```bash
//! pimega_verify --prefix DET: --backend mock run --json
//! ```
//!
//! Only one session may run against a given IOC at a time; concurrent
//! sessions overwrite each other's values.

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use pimega_verify::attributes;
use pimega_verify::config::{Backend, CheckDefinition, HarnessConfig, DEFAULT_CONFIG_PATH};
use pimega_verify::environment::{EnvPolicy, EPICS_CA_ADDR_LIST};
use pimega_verify::error::{ChannelError, VerifyError};
use pimega_verify::hardware::{self, ChannelReadable, ChannelWritable, PvValue};
use pimega_verify::logging;
use pimega_verify::session::Session;
use pimega_verify::verify::report::{EXIT_CONNECTION, EXIT_PASSED, EXIT_SETUP};
use pimega_verify::verify::Harness;

#[derive(Parser)]
#[command(name = "pimega_verify")]
#[command(about = "Write/read verification of PIMEGA detector attributes over Channel Access")]
#[command(
    long_about = "Write/read verification of PIMEGA detector attributes over Channel Access.\n\n\
                  Checks write real values to the detector. Do not run two sessions against \
                  the same IOC at the same time."
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// EPICS prefix of the detector IOC, overrides the configuration
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Device backend (ca_tools, mock), overrides the configuration
    #[arg(long, global = true)]
    backend: Option<Backend>,

    /// Abort when EPICS_CA_ADDR_LIST is not set
    #[arg(long, global = true)]
    strict_env: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured verification checks
    Run {
        /// Only run the check for this attribute (repeatable)
        #[arg(long)]
        only: Vec<String>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read one attribute
    Get {
        /// Attribute name, appended to the prefix
        attribute: String,
    },

    /// Write one attribute
    Put {
        /// Attribute name, appended to the prefix
        attribute: String,
        /// Value to write
        #[arg(allow_negative_numbers = true)]
        value: String,
    },

    /// List the known detector attributes
    Attributes,

    /// Establish a session and report the Channel Access environment
    CheckEnv,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            exit_code_for(&e)
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Attributes => {
            list_attributes();
            Ok(EXIT_PASSED)
        }
        Commands::Run { only, json } => {
            let config = setup(&cli.global, &only)?;
            run_checks(&config, json).await
        }
        Commands::Get { attribute } => {
            let config = setup(&cli.global, &[])?;
            get_attribute(&config, &attribute).await
        }
        Commands::Put { attribute, value } => {
            let config = setup(&cli.global, &[])?;
            put_attribute(&config, &attribute, &value).await
        }
        Commands::CheckEnv => {
            let config = setup(&cli.global, &[])?;
            check_env(&config)
        }
    }
}

/// Load configuration, apply command line overrides, start logging, validate.
fn setup(args: &GlobalArgs, only: &[String]) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::load_from(&args.config)
        .with_context(|| format!("Loading configuration from {}", args.config.display()))?;

    if let Some(prefix) = &args.prefix {
        config.session.epics_prefix = Some(prefix.clone());
    }
    if let Some(backend) = args.backend {
        config.device.backend = backend;
    }
    if args.strict_env {
        config.session.on_missing_env = EnvPolicy::Abort;
    }
    if !only.is_empty() {
        config.checks = select_checks(&config.checks, only);
    }

    logging::init_from_config(&config).map_err(VerifyError::Configuration)?;
    config.validate()?;
    Ok(config)
}

/// Keep the configured checks named in `only`, adding catalog defaults for
/// names the configuration does not mention.
fn select_checks(configured: &[CheckDefinition], only: &[String]) -> Vec<CheckDefinition> {
    only.iter()
        .map(|name| {
            configured
                .iter()
                .find(|c| &c.attribute == name)
                .cloned()
                .map(|mut c| {
                    c.enabled = true;
                    c
                })
                .unwrap_or_else(|| CheckDefinition::new(name.as_str()))
        })
        .collect()
}

async fn run_checks(config: &HarnessConfig, json: bool) -> Result<i32> {
    let session = Session::establish(config)?;
    let device = hardware::connect(&config.device);
    let harness = Harness::new(&session, device.as_ref());

    let report = harness.run_all(config.enabled_checks()).await;
    let summary = report.summary();
    tracing::info!(
        total = summary.total,
        passed = summary.passed,
        mismatched = summary.mismatched,
        connection_errors = summary.connection_errors,
        "Session finished"
    );

    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(summary.exit_code())
}

async fn get_attribute(config: &HarnessConfig, attribute: &str) -> Result<i32> {
    let session = Session::establish(config)?;
    let device = hardware::connect(&config.device);
    let channel = session.prefix().channel(attribute);

    let value = device.get(&channel).await?;
    println!("{} {}", channel, value);
    Ok(EXIT_PASSED)
}

async fn put_attribute(config: &HarnessConfig, attribute: &str, raw: &str) -> Result<i32> {
    let value = PvValue::parse(raw)
        .ok_or_else(|| VerifyError::Configuration(format!("'{}' is not a number", raw)))?;
    if let Some(attr) = attributes::lookup(attribute) {
        if !attributes::kind_accepts(attr.kind, &value) || !attr.limits.accepts(&value) {
            return Err(VerifyError::Configuration(format!(
                "{} accepts {} values in {}, got {}",
                attribute, attr.kind, attr.limits, value
            ))
            .into());
        }
    }

    let session = Session::establish(config)?;
    let device = hardware::connect(&config.device);
    let channel = session.prefix().channel(attribute);

    device.put(&channel, &value).await?;
    println!("{} {}", channel, value);
    Ok(EXIT_PASSED)
}

fn check_env(config: &HarnessConfig) -> Result<i32> {
    let session = Session::establish(config)?;
    println!("Session {}", session.id());
    println!("  prefix: {}", session.prefix());
    match &session.environment().ca_addr_list {
        Some(list) => println!("  {}: {}", EPICS_CA_ADDR_LIST, list),
        None => println!("  {}: not set", EPICS_CA_ADDR_LIST),
    }
    Ok(EXIT_PASSED)
}

fn list_attributes() {
    println!(
        "{:<15} {:<7} {:<16} {:<22} DESCRIPTION",
        "ATTRIBUTE", "KIND", "RANGE", "DEFAULT VALUES"
    );
    for attr in attributes::catalog() {
        let defaults = attr
            .default_values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{:<15} {:<7} {:<16} {:<22} {}",
            attr.name,
            attr.kind.to_string(),
            attr.limits.to_string(),
            defaults,
            attr.description
        );
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ChannelError>().is_some() {
        return EXIT_CONNECTION;
    }
    match err.downcast_ref::<VerifyError>() {
        Some(VerifyError::Channel(_)) => EXIT_CONNECTION,
        _ => EXIT_SETUP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "pimega_verify",
            "run",
            "--prefix",
            "DET:",
            "--backend",
            "mock",
            "--strict-env",
            "--only",
            "NumImages",
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.global.prefix.as_deref(), Some("DET:"));
        assert_eq!(cli.global.backend, Some(Backend::Mock));
        assert!(cli.global.strict_env);
        match cli.command {
            Commands::Run { only, json } => {
                assert_eq!(only, vec!["NumImages".to_string()]);
                assert!(json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn cli_accepts_negative_put_value() {
        let cli = Cli::try_parse_from(["pimega_verify", "put", "THRESHOLD0", "-5"]).unwrap();
        match cli.command {
            Commands::Put { attribute, value } => {
                assert_eq!(attribute, "THRESHOLD0");
                assert_eq!(value, "-5");
            }
            _ => panic!("expected put"),
        }
    }

    #[test]
    fn cli_rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["pimega_verify", "--backend", "pva", "run"]).is_err());
    }

    #[test]
    fn select_checks_keeps_configured_settings() {
        let configured = vec![
            CheckDefinition::new("NumExposures"),
            CheckDefinition::new("NumImages")
                .with_readback_suffix("_RBV")
                .with_restore(true),
        ];
        let selected = select_checks(&configured, &["NumImages".into(), "TriggerMode".into()]);

        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].readback_suffix, "_RBV");
        assert!(selected[0].restore);
        assert_eq!(selected[1], CheckDefinition::new("TriggerMode"));
    }

    #[test]
    fn channel_errors_map_to_connection_exit_code() {
        let err = anyhow::Error::from(ChannelError::timeout("DET:NumExposures", "timed out"));
        assert_eq!(exit_code_for(&err), EXIT_CONNECTION);

        let err = anyhow::Error::from(VerifyError::ConfigurationMissing("epics_prefix".into()));
        assert_eq!(exit_code_for(&err), EXIT_SETUP);
    }
}
