//! # pimega_verify
//!
//! Write/read verification harness for the PIMEGA detector IOC. A session
//! writes a set of values to a detector attribute over EPICS Channel Access,
//! reads each one back and reports whether the device really holds it.
//!
//! ## Crate Structure
//!
//! - **`attributes`**: Catalog of known detector attributes, their value kinds,
//!   accepted ranges and default parametrization sets.
//! - **`config`**: Figment-based configuration (TOML file plus `PIMEGA_VERIFY_`
//!   environment overrides). See `config::HarnessConfig`.
//! - **`environment`**: Channel Access environment check (`EPICS_CA_ADDR_LIST`).
//! - **`error`**: `VerifyError` for session setup and `ChannelError` for device calls.
//! - **`hardware`**: Capability traits for channel access, the `caget`/`caput`
//!   backend and the mock IOC.
//! - **`logging`**: Tracing subscriber setup.
//! - **`session`**: The immutable per-run session and the device `Prefix`.
//! - **`validation`**: Small validators used by configuration loading.
//! - **`verify`**: Verification cases, the sequential harness and the report.

pub mod attributes;
pub mod config;
pub mod environment;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod session;
pub mod validation;
pub mod verify;

pub use config::HarnessConfig;
pub use error::{AppResult, ChannelError, ChannelErrorKind, VerifyError};
pub use hardware::{ChannelAccess, PvValue};
pub use session::{Prefix, Session};
