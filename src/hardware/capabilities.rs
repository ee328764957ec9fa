//! Channel Capabilities
//!
//! The harness needs exactly two things from the device-communication layer:
//! read a channel and write a channel. Each is its own capability trait so a
//! read-only backend (or a test double that only records writes) can
//! implement one without the other.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Reports failures as [`ChannelError`] so that "device unreachable" can be
//!   told apart from "device gave the wrong value"
//! - Focuses on ONE thing
//!
//! # Example
//!
//! ```rust,ignore
//! async fn round_trip<D: ChannelAccess>(device: &D, pv: &str) -> Result<bool, ChannelError> {
//!     device.put(pv, &PvValue::Int(10)).await?;
//!     Ok(device.get(pv).await? == PvValue::Int(10))
//! }
//! ```

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::hardware::PvValue;

/// Capability: Channel Readout
///
/// # Contract
/// - `get()` performs a fresh read of the channel; it must not answer from a
///   cache of previously written values
/// - A channel that cannot be reached within the backend's timeout yields a
///   `ChannelErrorKind::Timeout` error
#[async_trait]
pub trait ChannelReadable: Send + Sync {
    /// Read the current value of `channel`.
    async fn get(&self, channel: &str) -> Result<PvValue, ChannelError>;
}

/// Capability: Channel Write
///
/// # Contract
/// - `put()` returns once the backend acknowledged the write
/// - A value the device refuses yields `ChannelErrorKind::Rejected`
#[async_trait]
pub trait ChannelWritable: Send + Sync {
    /// Write `value` to `channel`.
    async fn put(&self, channel: &str, value: &PvValue) -> Result<(), ChannelError>;
}

/// Full read/write access to device channels.
pub trait ChannelAccess: ChannelReadable + ChannelWritable {
    /// Short label for logs and reports (e.g. "ca_tools", "mock").
    fn backend_name(&self) -> &'static str;
}

#[async_trait]
impl<T: ChannelReadable + ?Sized> ChannelReadable for std::sync::Arc<T> {
    async fn get(&self, channel: &str) -> Result<PvValue, ChannelError> {
        (**self).get(channel).await
    }
}

#[async_trait]
impl<T: ChannelWritable + ?Sized> ChannelWritable for std::sync::Arc<T> {
    async fn put(&self, channel: &str, value: &PvValue) -> Result<(), ChannelError> {
        (**self).put(channel, value).await
    }
}

impl<T: ChannelAccess + ?Sized> ChannelAccess for std::sync::Arc<T> {
    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }
}
