use std::sync::Mutex;

use tempfile::NamedTempFile;

use framecast::config::FramecastConfig;
use framecast::transport::{History, Reliability, TransportKind};
use framecast::{PixelLayout, SourceKind};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FRAMECAST_CONFIG",
        "FRAMECAST_SOURCE",
        "FRAMECAST_DEVICE",
        "FRAMECAST_WIDTH",
        "FRAMECAST_HEIGHT",
        "FRAMECAST_ENCODING",
        "FRAMECAST_FREQ",
        "FRAMECAST_TOPIC",
        "FRAMECAST_CONTROL_TOPIC",
        "FRAMECAST_QOS_HISTORY",
        "FRAMECAST_QOS_DEPTH",
        "FRAMECAST_QOS_RELIABILITY",
        "FRAMECAST_TRANSPORT",
        "FRAMECAST_MQTT_BROKER",
        "FRAMECAST_MQTT_CLIENT_ID",
        "FRAMECAST_MQTT_USERNAME",
        "FRAMECAST_MQTT_PASSWORD",
        "FRAMECAST_MQTT_TLS_CA_PATH",
        "FRAMECAST_SHOW_CAMERA",
        "FRAMECAST_PREVIEW_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": {
            "kind": "synthetic",
            "device": "/dev/video2",
            "width": 320,
            "height": 240,
            "encoding": "mono8"
        },
        "frequency": 15.0,
        "topic": "camera/image",
        "qos": {
            "history": "keep_all",
            "reliability": "best_effort"
        },
        "transport": {
            "kind": "memory",
            "broker": "mqtt://10.0.0.5:1883",
            "username": "camera"
        },
        "preview": {
            "enabled": true,
            "path": "/tmp/framecast-test.png"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("FRAMECAST_CONFIG", file.path());
    std::env::set_var("FRAMECAST_WIDTH", "160");
    std::env::set_var("FRAMECAST_FREQ", "5");
    std::env::set_var("FRAMECAST_QOS_HISTORY", "keep-last");
    std::env::set_var("FRAMECAST_QOS_DEPTH", "1");
    std::env::set_var("FRAMECAST_CONTROL_TOPIC", "camera/flip");

    let cfg = FramecastConfig::load().expect("load config");

    assert_eq!(cfg.source.kind, SourceKind::Synthetic);
    assert_eq!(cfg.source.device, "/dev/video2");
    assert_eq!(cfg.source.width, 160);
    assert_eq!(cfg.source.height, 240);
    assert_eq!(cfg.source.synthetic_layout, PixelLayout::MONO8);
    assert_eq!(cfg.source.target_fps, 5);
    assert_eq!(cfg.frequency_hz, 5.0);
    assert_eq!(cfg.topic, "camera/image");
    assert_eq!(cfg.control_topic, "camera/flip");
    assert_eq!(cfg.qos.history, History::KeepLast);
    assert_eq!(cfg.qos.depth, 1);
    assert_eq!(cfg.qos.reliability, Reliability::BestEffort);
    assert_eq!(cfg.transport, TransportKind::Memory);
    assert_eq!(cfg.mqtt.broker, "mqtt://10.0.0.5:1883");
    assert_eq!(cfg.mqtt.username.as_deref(), Some("camera"));
    assert_eq!(cfg.mqtt.password, None);
    assert!(cfg.show_camera);
    assert_eq!(cfg.preview_path.to_str(), Some("/tmp/framecast-test.png"));

    clear_env();
}

#[test]
fn defaults_apply_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = FramecastConfig::load().expect("load config");
    assert_eq!(cfg.source.kind, SourceKind::V4l2);
    assert_eq!(cfg.source.device, "/dev/video0");
    assert_eq!(cfg.topic, "image");
    assert_eq!(cfg.control_topic, "flip_image");
    assert_eq!(cfg.transport, TransportKind::Mqtt);
    assert_eq!(cfg.qos.depth, 10);
}

#[test]
fn invalid_env_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FRAMECAST_FREQ", "fast");
    assert!(FramecastConfig::load().is_err());
    clear_env();

    std::env::set_var("FRAMECAST_FREQ", "0");
    assert!(FramecastConfig::load().is_err());
    clear_env();

    std::env::set_var("FRAMECAST_FREQ", "1e-20");
    let err = FramecastConfig::load().unwrap_err();
    assert!(err.to_string().contains("frequency must be between"));
    clear_env();

    std::env::set_var("FRAMECAST_TOPIC", "flip_image");
    assert!(FramecastConfig::load().is_err());
    clear_env();

    std::env::set_var("FRAMECAST_QOS_RELIABILITY", "sometimes");
    assert!(FramecastConfig::load().is_err());
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FRAMECAST_CONFIG", "/nonexistent/framecast.json");
    let err = FramecastConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
