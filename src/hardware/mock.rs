//! Mock IOC
//!
//! Provides a simulated detector IOC for testing without physical hardware.
//! All delays use `tokio::time::sleep`, never `std::thread::sleep`.
//!
//! Channels are stored in memory. A put creates the channel if it does not
//! exist yet; a get on an unknown channel behaves like Channel Access does
//! for a PV nobody serves and times out.
//!
//! # Fault Injection
//!
//! [`FaultScenario`] values make the IOC misbehave in the ways the harness
//! must be able to tell apart:
//!
//! ```rust,ignore
//! let ioc = MockIoc::new()
//!     .with_scenario(FaultScenario::CorruptReadback {
//!         channel: "DET:NumExposures".into(),
//!         value: PvValue::Int(999),
//!     });
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};

use crate::error::{ChannelError, ChannelErrorKind};
use crate::hardware::capabilities::{ChannelAccess, ChannelReadable, ChannelWritable};
use crate::hardware::PvValue;

/// Ways the mock IOC can be told to misbehave.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultScenario {
    /// Reads of `channel` time out
    ReadTimeout { channel: String },
    /// Writes to `channel` time out
    WriteTimeout { channel: String },
    /// Writes to `channel` are refused by the record
    RejectWrite { channel: String },
    /// Reads of `channel` return `value` whatever was written
    CorruptReadback { channel: String, value: PvValue },
    /// Integer writes to `channel` are clamped to `max`, emulating a record
    /// whose underlying representation is too narrow
    Clamp { channel: String, max: i64 },
    /// Every operation after the first `operations` fails with a
    /// communication error
    FailAfter { operations: u32 },
    /// Every operation fails with a communication error
    CommunicationLoss,
}

#[derive(Default, Debug)]
struct FaultState {
    operations: u32,
    writes: Vec<(String, PvValue)>,
}

/// In-memory IOC with fault injection.
#[derive(Clone)]
pub struct MockIoc {
    channels: Arc<RwLock<HashMap<String, PvValue>>>,
    scenarios: Arc<Vec<FaultScenario>>,
    state: Arc<Mutex<FaultState>>,
    latency: Duration,
}

impl MockIoc {
    /// Create an IOC with no channels and no faults
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            scenarios: Arc::new(Vec::new()),
            state: Arc::new(Mutex::new(FaultState::default())),
            latency: Duration::ZERO,
        }
    }

    /// Pre-populate a channel
    pub fn with_channel(self, channel: impl Into<String>, value: impl Into<PvValue>) -> Self {
        // Builder runs before the IOC is shared, so the lock is uncontended.
        if let Ok(mut channels) = self.channels.try_write() {
            channels.insert(channel.into(), value.into());
        }
        self
    }

    /// Add a fault scenario
    pub fn with_scenario(mut self, scenario: FaultScenario) -> Self {
        let mut scenarios = (*self.scenarios).clone();
        scenarios.push(scenario);
        self.scenarios = Arc::new(scenarios);
        self
    }

    /// Simulated round-trip latency per operation
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Current stored value of a channel, bypassing fault injection
    pub async fn peek(&self, channel: &str) -> Option<PvValue> {
        self.channels.read().await.get(channel).copied()
    }

    /// Every successful write, in order
    pub async fn writes(&self) -> Vec<(String, PvValue)> {
        self.state.lock().await.writes.clone()
    }

    async fn check_operation(&self, channel: &str) -> Result<(), ChannelError> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        let mut state = self.state.lock().await;
        state.operations += 1;
        for scenario in self.scenarios.iter() {
            match scenario {
                FaultScenario::CommunicationLoss => {
                    return Err(ChannelError::new(
                        channel,
                        ChannelErrorKind::Communication,
                        "Communication lost",
                    ));
                }
                FaultScenario::FailAfter { operations } if state.operations > *operations => {
                    return Err(ChannelError::new(
                        channel,
                        ChannelErrorKind::Communication,
                        format!("Injected failure after {} operations", operations),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Default for MockIoc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelReadable for MockIoc {
    async fn get(&self, channel: &str) -> Result<PvValue, ChannelError> {
        self.check_operation(channel).await?;

        for scenario in self.scenarios.iter() {
            match scenario {
                FaultScenario::ReadTimeout { channel: c } if c == channel => {
                    return Err(ChannelError::timeout(channel, "Injected read timeout"));
                }
                FaultScenario::CorruptReadback { channel: c, value } if c == channel => {
                    return Ok(*value);
                }
                _ => {}
            }
        }

        self.channels
            .read()
            .await
            .get(channel)
            .copied()
            .ok_or_else(|| {
                ChannelError::timeout(
                    channel,
                    format!("Channel connect timed out: '{}' not found", channel),
                )
            })
    }
}

#[async_trait]
impl ChannelWritable for MockIoc {
    async fn put(&self, channel: &str, value: &PvValue) -> Result<(), ChannelError> {
        self.check_operation(channel).await?;

        let mut stored = *value;
        for scenario in self.scenarios.iter() {
            match scenario {
                FaultScenario::WriteTimeout { channel: c } if c == channel => {
                    return Err(ChannelError::timeout(channel, "Injected write timeout"));
                }
                FaultScenario::RejectWrite { channel: c } if c == channel => {
                    return Err(ChannelError::new(
                        channel,
                        ChannelErrorKind::Rejected,
                        format!("Record refused value {}", value),
                    ));
                }
                FaultScenario::Clamp { channel: c, max } if c == channel => {
                    if let PvValue::Int(v) = stored {
                        stored = PvValue::Int(v.min(*max));
                    }
                }
                _ => {}
            }
        }

        self.channels
            .write()
            .await
            .insert(channel.to_string(), stored);
        self.state
            .lock()
            .await
            .writes
            .push((channel.to_string(), *value));
        Ok(())
    }
}

impl ChannelAccess for MockIoc {
    fn backend_name(&self) -> &'static str {
        "mock"
    }
}
