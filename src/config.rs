use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::encoding::Encoding;
use crate::frame::PixelLayout;
use crate::preview::DEFAULT_PREVIEW_PATH;
use crate::publisher::Rate;
use crate::source::{SourceConfig, SourceKind};
use crate::transport::{
    parse_mqtt_endpoint, History, MqttSettings, QosConfig, Reliability, TransportKind,
    DEFAULT_QOS_DEPTH,
};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FREQUENCY_HZ: f64 = 30.0;
const DEFAULT_TOPIC: &str = "image";
const DEFAULT_CONTROL_TOPIC: &str = "flip_image";
const DEFAULT_BROKER: &str = "mqtt://127.0.0.1:1883";
const DEFAULT_CLIENT_ID: &str = "framecast";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FramecastConfigFile {
    source: Option<SourceConfigFile>,
    frequency: Option<f64>,
    topic: Option<String>,
    control_topic: Option<String>,
    qos: Option<QosConfigFile>,
    transport: Option<TransportConfigFile>,
    preview: Option<PreviewConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    kind: Option<SourceKind>,
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    /// Layout of synthetic frames, as a wire encoding name.
    encoding: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct QosConfigFile {
    history: Option<History>,
    depth: Option<usize>,
    reliability: Option<Reliability>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TransportConfigFile {
    kind: Option<TransportKind>,
    broker: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    tls_ca_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PreviewConfigFile {
    enabled: Option<bool>,
    path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FramecastConfig {
    pub source: SourceConfig,
    pub frequency_hz: f64,
    pub topic: String,
    pub control_topic: String,
    pub qos: QosConfig,
    pub transport: TransportKind,
    pub mqtt: MqttConfig,
    pub show_camera: bool,
    pub preview_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls_ca_path: Option<PathBuf>,
}

impl FramecastConfig {
    /// Defaults, then the JSON file named by `FRAMECAST_CONFIG`, then
    /// `FRAMECAST_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRAMECAST_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit config file instead of `FRAMECAST_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FramecastConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let qos_file = file.qos.unwrap_or_default();
        let transport_file = file.transport.unwrap_or_default();
        let preview_file = file.preview.unwrap_or_default();

        let synthetic_layout = match source_file.encoding.as_deref() {
            Some(name) => parse_layout(name)?,
            None => PixelLayout::BGR8,
        };
        let source = SourceConfig {
            kind: source_file.kind.unwrap_or(SourceKind::V4l2),
            device: source_file
                .device
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            width: source_file.width.unwrap_or(DEFAULT_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_HEIGHT),
            target_fps: 0,
            synthetic_layout,
        };
        let qos = QosConfig {
            history: qos_file.history.unwrap_or_default(),
            depth: qos_file.depth.unwrap_or(DEFAULT_QOS_DEPTH),
            reliability: qos_file.reliability.unwrap_or_default(),
        };
        let mqtt = MqttConfig {
            broker: transport_file
                .broker
                .unwrap_or_else(|| DEFAULT_BROKER.to_string()),
            client_id: transport_file
                .client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            username: transport_file.username,
            password: transport_file.password,
            tls_ca_path: transport_file.tls_ca_path,
        };
        Ok(Self {
            source,
            frequency_hz: file.frequency.unwrap_or(DEFAULT_FREQUENCY_HZ),
            topic: file.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            control_topic: file
                .control_topic
                .unwrap_or_else(|| DEFAULT_CONTROL_TOPIC.to_string()),
            qos,
            transport: transport_file.kind.unwrap_or_default(),
            mqtt,
            show_camera: preview_file.enabled.unwrap_or(false),
            preview_path: preview_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PREVIEW_PATH)),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(kind) = env_parse::<SourceKind>("FRAMECAST_SOURCE")? {
            self.source.kind = kind;
        }
        if let Some(device) = env_nonempty("FRAMECAST_DEVICE") {
            self.source.device = device;
        }
        if let Some(width) = env_parse::<u32>("FRAMECAST_WIDTH")? {
            self.source.width = width;
        }
        if let Some(height) = env_parse::<u32>("FRAMECAST_HEIGHT")? {
            self.source.height = height;
        }
        if let Some(name) = env_nonempty("FRAMECAST_ENCODING") {
            self.source.synthetic_layout = parse_layout(&name)?;
        }
        if let Some(freq) = env_parse::<f64>("FRAMECAST_FREQ")? {
            self.frequency_hz = freq;
        }
        if let Some(topic) = env_nonempty("FRAMECAST_TOPIC") {
            self.topic = topic;
        }
        if let Some(topic) = env_nonempty("FRAMECAST_CONTROL_TOPIC") {
            self.control_topic = topic;
        }
        if let Some(history) = env_parse::<History>("FRAMECAST_QOS_HISTORY")? {
            self.qos.history = history;
        }
        if let Some(depth) = env_parse::<usize>("FRAMECAST_QOS_DEPTH")? {
            self.qos.depth = depth;
        }
        if let Some(reliability) = env_parse::<Reliability>("FRAMECAST_QOS_RELIABILITY")? {
            self.qos.reliability = reliability;
        }
        if let Some(kind) = env_parse::<TransportKind>("FRAMECAST_TRANSPORT")? {
            self.transport = kind;
        }
        if let Some(broker) = env_nonempty("FRAMECAST_MQTT_BROKER") {
            self.mqtt.broker = broker;
        }
        if let Some(client_id) = env_nonempty("FRAMECAST_MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        if let Some(username) = env_nonempty("FRAMECAST_MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = env_nonempty("FRAMECAST_MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(path) = env_nonempty("FRAMECAST_MQTT_TLS_CA_PATH") {
            self.mqtt.tls_ca_path = Some(PathBuf::from(path));
        }
        if let Some(show) = env_nonempty("FRAMECAST_SHOW_CAMERA") {
            self.show_camera = parse_bool("FRAMECAST_SHOW_CAMERA", &show)?;
        }
        if let Some(path) = env_nonempty("FRAMECAST_PREVIEW_PATH") {
            self.preview_path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Check the settings and fill in derived fields. Call again after
    /// changing fields by hand (command-line overrides).
    pub fn validate(&mut self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "image size must be non-zero, got {}x{}",
                self.source.width,
                self.source.height
            ));
        }
        if !(Rate::MIN_HZ..=Rate::MAX_HZ).contains(&self.frequency_hz) {
            return Err(anyhow!(
                "frequency must be between {} and {} Hz, got {}",
                Rate::MIN_HZ,
                Rate::MAX_HZ,
                self.frequency_hz
            ));
        }
        self.qos.validate()?;

        self.topic = self.topic.trim().to_string();
        self.control_topic = self.control_topic.trim().to_string();
        if self.topic.is_empty() || self.control_topic.is_empty() {
            return Err(anyhow!("topic names must not be empty"));
        }
        if self.topic == self.control_topic {
            return Err(anyhow!(
                "image topic and control topic must differ (both '{}')",
                self.topic
            ));
        }
        if self.source.kind == SourceKind::V4l2 && self.source.device.trim().is_empty() {
            return Err(anyhow!("device path must not be empty"));
        }

        self.source.target_fps = device_fps(self.frequency_hz);
        Ok(())
    }

    pub fn mqtt_settings(&self) -> Result<MqttSettings> {
        Ok(MqttSettings {
            endpoint: parse_mqtt_endpoint(&self.mqtt.broker)?,
            client_id: self.mqtt.client_id.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            tls_ca_path: self.mqtt.tls_ca_path.clone(),
            image_topic: self.topic.clone(),
            control_topic: self.control_topic.clone(),
            qos: self.qos,
        })
    }
}

/// Rate requested from the device: the publish frequency rounded up, at least 1.
fn device_fps(frequency_hz: f64) -> u32 {
    frequency_hz.ceil().clamp(1.0, u32::MAX as f64) as u32
}

fn parse_layout(name: &str) -> Result<PixelLayout> {
    let encoding = Encoding::from_str(name.trim())
        .map_err(|_| anyhow!("unknown encoding '{}': expected mono8, bgr8, mono16 or rgba8", name))?;
    Ok(encoding.layout())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean, got '{}'", key, value)),
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_nonempty(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("invalid {}: {}", key, e)),
        None => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<FramecastConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
