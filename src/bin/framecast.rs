//! framecast - periodic image publisher
//!
//! 1. Loads configuration (JSON file, `FRAMECAST_*` env, command-line flags)
//! 2. Opens the frame source once; a device that cannot be opened is fatal
//! 3. Connects the transport and subscribes to the flip control topic
//! 4. Publishes frames at the configured rate until Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread::JoinHandle;
use std::time::Duration;

use framecast::config::FramecastConfig;
use framecast::preview::{Preview, DEFAULT_PREVIEW_INTERVAL};
use framecast::transport::{memory, History, MemoryPeer, MqttTransport, Reliability, TransportKind};
use framecast::{CaptureSource, FlipController, Publisher, ShutdownFlag, SourceKind, Transport};

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish camera frames at a fixed rate")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = "FRAMECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source (v4l2|synthetic).
    #[arg(long)]
    source: Option<SourceKind>,

    /// Video device path.
    #[arg(long)]
    device: Option<String>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Publish rate in Hz.
    #[arg(long = "freq")]
    frequency: Option<f64>,

    /// Topic the images are published on.
    #[arg(long)]
    topic: Option<String>,

    /// Topic carrying flip toggles.
    #[arg(long)]
    control_topic: Option<String>,

    /// History policy (keep_last|keep_all).
    #[arg(long)]
    qos_history: Option<History>,

    /// Queue depth for keep_last.
    #[arg(long)]
    qos_depth: Option<usize>,

    /// Reliability policy (best_effort|reliable).
    #[arg(long)]
    qos_reliability: Option<Reliability>,

    /// Transport backend (mqtt|memory).
    #[arg(long)]
    transport: Option<TransportKind>,

    /// MQTT broker address, e.g. mqtt://127.0.0.1:1883.
    #[arg(long)]
    mqtt_broker: Option<String>,

    #[arg(long)]
    mqtt_client_id: Option<String>,

    /// Write the latest published frame to a PNG preview file.
    #[arg(long)]
    show_camera: bool,

    #[arg(long)]
    preview_path: Option<PathBuf>,
}

impl Args {
    fn apply(self, cfg: &mut FramecastConfig) {
        if let Some(kind) = self.source {
            cfg.source.kind = kind;
        }
        if let Some(device) = self.device {
            cfg.source.device = device;
        }
        if let Some(width) = self.width {
            cfg.source.width = width;
        }
        if let Some(height) = self.height {
            cfg.source.height = height;
        }
        if let Some(freq) = self.frequency {
            cfg.frequency_hz = freq;
        }
        if let Some(topic) = self.topic {
            cfg.topic = topic;
        }
        if let Some(topic) = self.control_topic {
            cfg.control_topic = topic;
        }
        if let Some(history) = self.qos_history {
            cfg.qos.history = history;
        }
        if let Some(depth) = self.qos_depth {
            cfg.qos.depth = depth;
        }
        if let Some(reliability) = self.qos_reliability {
            cfg.qos.reliability = reliability;
        }
        if let Some(kind) = self.transport {
            cfg.transport = kind;
        }
        if let Some(broker) = self.mqtt_broker {
            cfg.mqtt.broker = broker;
        }
        if let Some(client_id) = self.mqtt_client_id {
            cfg.mqtt.client_id = client_id;
        }
        if self.show_camera {
            cfg.show_camera = true;
        }
        if let Some(path) = self.preview_path {
            cfg.preview_path = path;
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut cfg = FramecastConfig::load_from(args.config.as_deref())?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let shutdown = ShutdownFlag::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.request())
            .context("error setting Ctrl-C handler")?;
    }

    // Fails before any transport exists, so nothing is ever published.
    let source = CaptureSource::open(&cfg.source)?;

    let flip = FlipController::new(false);
    log::info!(
        "Publishing data on topic '{}', listening for flips on '{}'",
        cfg.topic,
        cfg.control_topic
    );

    match cfg.transport {
        TransportKind::Mqtt => {
            let settings = cfg.mqtt_settings()?;
            let transport = MqttTransport::connect(&settings)?;
            run_publisher(&cfg, source, transport, flip, &shutdown)
        }
        TransportKind::Memory => {
            let (transport, peer) = memory::channel(&cfg.qos);
            let sink = spawn_sink(peer, shutdown.clone());
            let result = run_publisher(&cfg, source, transport, flip, &shutdown);
            shutdown.request();
            if sink.join().is_err() {
                log::error!("memory sink thread panicked");
            }
            result
        }
    }
}

fn run_publisher<T: Transport>(
    cfg: &FramecastConfig,
    source: CaptureSource,
    transport: T,
    flip: FlipController,
    shutdown: &ShutdownFlag,
) -> Result<()> {
    let mut publisher = Publisher::new(source, transport, flip, cfg.frequency_hz)?;
    if cfg.show_camera {
        publisher =
            publisher.with_preview(Preview::new(cfg.preview_path.clone(), DEFAULT_PREVIEW_INTERVAL));
    }
    let stats = publisher.run(shutdown)?;
    log::info!(
        "framecast stopped: published={} empty={} skipped={}",
        stats.published,
        stats.empty,
        stats.skipped
    );
    Ok(())
}

/// Consume frames published to the in-memory transport so keep_all history
/// does not grow without bound on a dry run.
fn spawn_sink(peer: MemoryPeer, shutdown: ShutdownFlag) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut received = 0u64;
        while !shutdown.is_requested() {
            if let Some(msg) = peer.recv_timeout(Duration::from_millis(200)) {
                received += 1;
                log::debug!(
                    "memory sink received frame {} ({}x{} {})",
                    msg.frame_id(),
                    msg.width(),
                    msg.height(),
                    msg.encoding()
                );
            }
        }
        log::info!(
            "memory sink received {} frames, {} evicted under keep_last",
            received,
            peer.evicted()
        );
    })
}
