//! In-process loopback transport.
//!
//! `channel` returns the publishing half (handed to the publisher loop) and a
//! `MemoryPeer` that plays the remote side: it takes published frames off the
//! QoS queue and sends flip toggles back.

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use super::{QosConfig, QosQueue, Transport};
use crate::error::{FramecastError, Result};
use crate::message::WireMessage;

pub struct MemoryTransport {
    outbound: QosQueue<WireMessage>,
    control: Receiver<bool>,
}

#[derive(Clone)]
pub struct MemoryPeer {
    inbound: QosQueue<WireMessage>,
    control: Sender<bool>,
}

pub fn channel(qos: &QosConfig) -> (MemoryTransport, MemoryPeer) {
    let queue = QosQueue::new(qos);
    let (tx, rx) = mpsc::channel();
    (
        MemoryTransport {
            outbound: queue.clone(),
            control: rx,
        },
        MemoryPeer {
            inbound: queue,
            control: tx,
        },
    )
}

impl Transport for MemoryTransport {
    fn publish(&mut self, message: WireMessage) -> Result<()> {
        self.outbound
            .push(message)
            .map_err(|_| FramecastError::TransportPublish("memory channel closed".into()))
    }

    fn try_recv_control(&mut self) -> Option<bool> {
        self.control.try_recv().ok()
    }
}

impl MemoryPeer {
    /// Send a flip toggle. Dropped silently if the transport is gone, which
    /// matches best-effort control delivery.
    pub fn send_flip(&self, value: bool) {
        let _ = self.control.send(value);
    }

    pub fn try_recv(&self) -> Option<WireMessage> {
        self.inbound.try_pop()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<WireMessage> {
        self.inbound.pop_timeout(timeout)
    }

    /// Messages lost to the keep-last policy.
    pub fn evicted(&self) -> u64 {
        self.inbound.evicted()
    }

    /// Tear down the channel; later publishes fail.
    pub fn close(&self) {
        self.inbound.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PixelBuffer, PixelLayout};
    use crate::message;
    use crate::transport::History;

    fn sample(seq: u64) -> WireMessage {
        let buffer = PixelBuffer::tight(2, 2, PixelLayout::MONO8, vec![1, 2, 3, 4]).unwrap();
        message::build(&buffer, seq).unwrap()
    }

    #[test]
    fn published_messages_reach_peer_in_order() {
        let qos = QosConfig {
            history: History::KeepAll,
            ..QosConfig::default()
        };
        let (mut transport, peer) = channel(&qos);
        transport.publish(sample(1)).unwrap();
        transport.publish(sample(2)).unwrap();
        assert_eq!(peer.try_recv().unwrap().frame_id(), "1");
        assert_eq!(peer.try_recv().unwrap().frame_id(), "2");
        assert!(peer.try_recv().is_none());
    }

    #[test]
    fn keep_last_peer_sees_newest_and_counts_evictions() {
        let qos = QosConfig {
            history: History::KeepLast,
            depth: 1,
            ..QosConfig::default()
        };
        let (mut transport, peer) = channel(&qos);
        for seq in 1..=3 {
            transport.publish(sample(seq)).unwrap();
        }
        assert_eq!(peer.evicted(), 2);
        assert_eq!(peer.try_recv().unwrap().frame_id(), "3");
        assert!(peer.try_recv().is_none());
    }

    #[test]
    fn control_values_drain_in_send_order() {
        let (mut transport, peer) = channel(&QosConfig::default());
        peer.send_flip(true);
        peer.send_flip(false);
        assert_eq!(transport.try_recv_control(), Some(true));
        assert_eq!(transport.try_recv_control(), Some(false));
        assert_eq!(transport.try_recv_control(), None);
    }

    #[test]
    fn publish_fails_after_close() {
        let (mut transport, peer) = channel(&QosConfig::default());
        peer.close();
        let err = transport.publish(sample(1)).unwrap_err();
        assert!(matches!(err, FramecastError::TransportPublish(_)));
    }
}
