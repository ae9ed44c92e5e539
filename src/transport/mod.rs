//! Transport layer abstractions.
//!
//! The publisher only needs two operations from a transport: hand off one
//! outbound message, and poll for pending control values without blocking.
//! Buffering between the two sides lives in `QosQueue`, which applies the
//! configured history policy; it is the only queue between producer and wire.
//!
//! Backends:
//! - `memory`: in-process loopback (tests, dry runs)
//! - `mqtt`: broker-backed pub/sub via rumqttc

pub mod memory;
pub mod mqtt;
mod queue;

use serde::Deserialize;
use std::str::FromStr;

use crate::error::{FramecastError, Result};
use crate::message::WireMessage;

pub use memory::{MemoryPeer, MemoryTransport};
pub use mqtt::{parse_mqtt_endpoint, MqttEndpoint, MqttSettings, MqttTransport};
pub use queue::QosQueue;

/// Default keep-last depth, matching the usual middleware default profile.
pub const DEFAULT_QOS_DEPTH: usize = 10;

pub trait Transport {
    /// Hand a message to the transport. Ownership moves; the caller keeps nothing.
    fn publish(&mut self, message: WireMessage) -> Result<()>;

    /// Next pending control value, or `None` when nothing is queued.
    fn try_recv_control(&mut self) -> Option<bool>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn publish(&mut self, message: WireMessage) -> Result<()> {
        (**self).publish(message)
    }

    fn try_recv_control(&mut self) -> Option<bool> {
        (**self).try_recv_control()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum History {
    /// Keep only the newest `depth` messages.
    #[default]
    KeepLast,
    /// Keep everything until taken, bounded only by memory.
    KeepAll,
}

impl FromStr for History {
    type Err = FramecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "keep_last" | "last" => Ok(Self::KeepLast),
            "keep_all" | "all" => Ok(Self::KeepAll),
            other => Err(FramecastError::InvalidConfig(format!(
                "unknown history policy '{}': expected 'keep_last' or 'keep_all'",
                other
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    BestEffort,
    #[default]
    Reliable,
}

impl FromStr for Reliability {
    type Err = FramecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "best_effort" | "besteffort" => Ok(Self::BestEffort),
            "reliable" => Ok(Self::Reliable),
            other => Err(FramecastError::InvalidConfig(format!(
                "unknown reliability '{}': expected 'best_effort' or 'reliable'",
                other
            ))),
        }
    }
}

/// Delivery and buffering policy of the outbound channel. Fixed per publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QosConfig {
    pub history: History,
    /// Only meaningful for `History::KeepLast`.
    pub depth: usize,
    pub reliability: Reliability,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            history: History::KeepLast,
            depth: DEFAULT_QOS_DEPTH,
            reliability: Reliability::Reliable,
        }
    }
}

impl QosConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history == History::KeepLast && self.depth == 0 {
            return Err(FramecastError::InvalidConfig(
                "QoS depth must be greater than zero for keep_last history".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Mqtt,
    /// In-process queue with no remote peer; useful for dry runs.
    Memory,
}

impl FromStr for TransportKind {
    type Err = FramecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mqtt" => Ok(Self::Mqtt),
            "memory" | "loopback" => Ok(Self::Memory),
            other => Err(FramecastError::InvalidConfig(format!(
                "unknown transport '{}': expected 'mqtt' or 'memory'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_parse_common_spellings() {
        assert_eq!("keep-last".parse::<History>().unwrap(), History::KeepLast);
        assert_eq!("KEEP_ALL".parse::<History>().unwrap(), History::KeepAll);
        assert_eq!(
            "best-effort".parse::<Reliability>().unwrap(),
            Reliability::BestEffort
        );
        assert!("sometimes".parse::<Reliability>().is_err());
        assert_eq!("loopback".parse::<TransportKind>().unwrap(), TransportKind::Memory);
    }

    #[test]
    fn keep_last_requires_depth() {
        let qos = QosConfig {
            depth: 0,
            ..QosConfig::default()
        };
        assert!(qos.validate().is_err());
        let qos = QosConfig {
            history: History::KeepAll,
            depth: 0,
            ..QosConfig::default()
        };
        assert!(qos.validate().is_ok());
    }
}
