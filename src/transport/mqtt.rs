//! MQTT transport.
//!
//! Frames are published on the image topic; flip toggles arrive on the control
//! topic. rumqttc needs its network event loop driven continuously, so two
//! helper threads sit next to the publisher loop:
//!
//! - network: iterates the connection, (re)subscribes on every ConnAck and
//!   forwards parsed control payloads into an mpsc channel
//! - pump: moves encoded frames from the `QosQueue` into the client
//!
//! The publisher itself never blocks on the broker: `publish` is a queue push
//! and `try_recv_control` is a `try_recv`. While the broker is unreachable the
//! client buffers up to `CLIENT_CAPACITY` requests and the pump drops frames
//! beyond that; rumqttc reconnects on its own. Publishing only fails once the
//! network thread has died.

use anyhow::{anyhow, Context};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{QosConfig, QosQueue, Reliability, Transport};
use crate::error::{FramecastError, Result};
use crate::flip::parse_flip_payload;
use crate::message::WireMessage;

/// Requests buffered inside the rumqttc client before the pump starts dropping.
const CLIENT_CAPACITY: usize = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const PUMP_POLL: Duration = Duration::from_millis(100);

/// MQTT endpoint parsed from a broker address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Connection settings for the MQTT backend.
#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: MqttEndpoint,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// PEM CA bundle for TLS; system roots when `None`.
    pub tls_ca_path: Option<PathBuf>,
    pub image_topic: String,
    pub control_topic: String,
    pub qos: QosConfig,
}

pub struct MqttTransport {
    outbox: QosQueue<WireMessage>,
    control: Receiver<bool>,
    client: Client,
    stop: Arc<AtomicBool>,
    network_down: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
    network: Option<JoinHandle<()>>,
}

impl MqttTransport {
    pub fn connect(settings: &MqttSettings) -> anyhow::Result<Self> {
        let mut options = MqttOptions::new(
            &settings.client_id,
            &settings.endpoint.host,
            settings.endpoint.port,
        );
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_transport(build_transport(
            &settings.endpoint,
            settings.tls_ca_path.as_ref(),
        )?);

        let (client, connection) = Client::new(options, CLIENT_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let network_down = Arc::new(AtomicBool::new(false));
        let outbox = QosQueue::new(&settings.qos);
        let (control_tx, control_rx) = mpsc::channel();

        let network = {
            let client = client.clone();
            let stop = Arc::clone(&stop);
            let down = Arc::clone(&network_down);
            let topic = settings.control_topic.clone();
            std::thread::Builder::new()
                .name("mqtt-network".into())
                .spawn(move || {
                    run_network(connection, client, topic, control_tx, &stop);
                    if !stop.load(Ordering::Acquire) {
                        log::error!("MQTT network thread stopped unexpectedly");
                        down.store(true, Ordering::Release);
                    }
                })
                .context("spawn mqtt network thread")?
        };

        let pump = {
            let client = client.clone();
            let outbox = outbox.clone();
            let topic = settings.image_topic.clone();
            let qos = mqtt_qos(settings.qos.reliability);
            std::thread::Builder::new()
                .name("mqtt-pump".into())
                .spawn(move || run_pump(client, outbox, topic, qos))
                .context("spawn mqtt pump thread")?
        };

        log::info!(
            "MQTT transport to {}:{} (TLS: {}, auth: {}), publishing on '{}', control on '{}'",
            settings.endpoint.host,
            settings.endpoint.port,
            settings.endpoint.use_tls,
            settings.username.is_some(),
            settings.image_topic,
            settings.control_topic
        );

        Ok(Self {
            outbox,
            control: control_rx,
            client,
            stop,
            network_down,
            pump: Some(pump),
            network: Some(network),
        })
    }
}

impl Transport for MqttTransport {
    fn publish(&mut self, message: WireMessage) -> Result<()> {
        if self.network_down.load(Ordering::Acquire) {
            return Err(FramecastError::TransportPublish(
                "MQTT network event loop is not running".into(),
            ));
        }
        self.outbox
            .push(message)
            .map_err(|_| FramecastError::TransportPublish("MQTT outbox closed".into()))
    }

    fn try_recv_control(&mut self) -> Option<bool> {
        self.control.try_recv().ok()
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.outbox.close();
        if let Some(handle) = self.pump.take() {
            let _ = handle.join();
        }
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect: {}", e);
        }
        if let Some(handle) = self.network.take() {
            let _ = handle.join();
        }
        log::info!("MQTT transport closed");
    }
}

fn mqtt_qos(reliability: Reliability) -> QoS {
    match reliability {
        Reliability::BestEffort => QoS::AtMostOnce,
        Reliability::Reliable => QoS::AtLeastOnce,
    }
}

fn run_network(
    mut connection: Connection,
    client: Client,
    control_topic: String,
    control_tx: Sender<bool>,
    stop: &AtomicBool,
) {
    for event in connection.iter() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        match event {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                log::info!("Connected to MQTT broker");
                // Control toggles are best-effort.
                if let Err(e) = client.try_subscribe(&control_topic, QoS::AtMostOnce) {
                    log::warn!("Failed to subscribe to {}: {}", control_topic, e);
                } else {
                    log::info!("Subscribed to {}", control_topic);
                }
            }
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                if &publish.topic[..] != control_topic.as_bytes() {
                    continue;
                }
                match parse_flip_payload(&publish.payload) {
                    Some(value) => {
                        if control_tx.send(value).is_err() {
                            break;
                        }
                    }
                    None => log::warn!(
                        "Ignoring unparsable {} payload ({} bytes)",
                        control_topic,
                        publish.payload.len()
                    ),
                }
            }
            Ok(_) => {}
            Err(e) => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                log::warn!("MQTT connection error: {}. Reconnecting...", e);
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    log::debug!("MQTT network thread exiting");
}

fn run_pump(client: Client, outbox: QosQueue<WireMessage>, topic: String, qos: QoS) {
    let mut dropped = 0u64;
    loop {
        let Some(message) = outbox.pop_timeout(PUMP_POLL) else {
            if outbox.is_closed() {
                break;
            }
            continue;
        };
        let frame_id = message.frame_id().to_string();
        if let Err(e) = client.try_publish(topic.as_str(), qos, false, message.encode()) {
            dropped += 1;
            if dropped.is_power_of_two() {
                log::warn!(
                    "MQTT client backlog full, dropped frame {} ({} total): {}",
                    frame_id,
                    dropped,
                    e
                );
            }
        }
    }
    let evicted = outbox.evicted();
    if evicted > 0 || dropped > 0 {
        log::info!(
            "MQTT outbox evicted {} frames under keep_last, client dropped {}",
            evicted,
            dropped
        );
    }
}

fn build_transport(
    endpoint: &MqttEndpoint,
    ca_path: Option<&PathBuf>,
) -> anyhow::Result<rumqttc::Transport> {
    if !endpoint.use_tls {
        if ca_path.is_some() {
            return Err(anyhow!(
                "MQTT TLS CA provided but TLS is disabled (use mqtts:// to enable TLS)"
            ));
        }
        return Ok(rumqttc::Transport::tcp());
    }
    match ca_path {
        Some(path) => {
            let ca = std::fs::read(path)
                .with_context(|| format!("failed to read MQTT TLS CA '{}'", path.display()))?;
            Ok(rumqttc::Transport::tls(ca, None, None))
        }
        None => Ok(rumqttc::Transport::tls_with_default_config()),
    }
}

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;

/// Parse a broker address such as `mqtt://host`, `mqtts://host:8883`,
/// `host:1883` or `[::1]`. The port defaults by scheme when omitted.
pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    addr.parse()
}

impl FromStr for MqttEndpoint {
    type Err = FramecastError;

    fn from_str(addr: &str) -> Result<Self> {
        let invalid = |what: &str| {
            FramecastError::InvalidConfig(format!("broker address '{}': {}", addr, what))
        };

        let trimmed = addr.trim();
        let (use_tls, authority) = match trimmed.split_once("://") {
            Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
                "mqtt" | "tcp" => (false, rest),
                "mqtts" | "ssl" | "tls" => (true, rest),
                _ => return Err(invalid("scheme must be mqtt, tcp, mqtts, ssl or tls")),
            },
            None => (false, trimmed),
        };
        let authority = authority.strip_suffix('/').unwrap_or(authority);
        if authority.contains('/') {
            return Err(invalid("paths are not supported"));
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated '[' in IPv6 host"))?;
            let port = match tail {
                "" => None,
                _ => Some(
                    tail.strip_prefix(':')
                        .ok_or_else(|| invalid("expected ':' after ']'"))?,
                ),
            };
            (host, port)
        } else {
            match authority.split_once(':') {
                Some((_, rest)) if rest.contains(':') => {
                    return Err(invalid("IPv6 hosts must be written in brackets"))
                }
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(raw) => match raw.parse::<u16>() {
                Ok(0) | Err(_) => return Err(invalid("port must be a number from 1 to 65535")),
                Ok(port) => port,
            },
            None if use_tls => DEFAULT_TLS_PORT,
            None => DEFAULT_PORT,
        };
        Ok(MqttEndpoint {
            host: host.to_string(),
            port,
            use_tls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_and_port_is_plain_tcp() {
        let ep = parse_mqtt_endpoint(" 10.1.2.3:1884 ").unwrap();
        assert_eq!(
            ep,
            MqttEndpoint {
                host: "10.1.2.3".into(),
                port: 1884,
                use_tls: false
            }
        );
    }

    #[test]
    fn omitted_port_defaults_by_scheme() {
        assert_eq!(parse_mqtt_endpoint("mqtt://broker.lan").unwrap().port, 1883);
        assert_eq!(parse_mqtt_endpoint("camera-hub").unwrap().port, 1883);
        let ep = parse_mqtt_endpoint("MQTTS://broker.lan/").unwrap();
        assert!(ep.use_tls);
        assert_eq!(ep.port, 8883);
    }

    #[test]
    fn bracketed_ipv6_with_and_without_port() {
        let ep = parse_mqtt_endpoint("tls://[fe80::1]:9000").unwrap();
        assert_eq!((ep.host.as_str(), ep.port, ep.use_tls), ("fe80::1", 9000, true));
        assert_eq!(parse_mqtt_endpoint("[::1]").unwrap().port, 1883);
    }

    #[test]
    fn malformed_addresses_are_config_errors() {
        for addr in [
            "",
            "ws://broker:80",
            "::1:1883",
            "[::1",
            "[::1]1883",
            "broker:0",
            "broker:70000",
            "mqtt://broker:1883/images",
            ":1883",
        ] {
            let err = parse_mqtt_endpoint(addr).unwrap_err();
            assert!(
                matches!(err, FramecastError::InvalidConfig(_)),
                "{:?} gave {}",
                addr,
                err
            );
        }
    }

    #[test]
    fn reliability_maps_to_mqtt_qos() {
        assert_eq!(mqtt_qos(Reliability::BestEffort), QoS::AtMostOnce);
        assert_eq!(mqtt_qos(Reliability::Reliable), QoS::AtLeastOnce);
    }

    #[test]
    fn ca_without_tls_is_rejected() {
        let ep = parse_mqtt_endpoint("localhost:1883").unwrap();
        match build_transport(&ep, Some(&PathBuf::from("/tmp/ca.pem"))) {
            Ok(_) => panic!("a CA bundle without mqtts:// was accepted"),
            Err(err) => assert!(err.to_string().contains("TLS is disabled")),
        }
    }
}
