//! framecast
//!
//! Periodic frame producer: grabs frames from a V4L2 capture device (or a
//! synthetic test pattern), wraps each one in a self-describing image message
//! and publishes it on a named topic at a fixed rate. A boolean control topic
//! (`flip_image`) toggles horizontal mirroring while the stream keeps running.
//!
//! # Module Structure
//!
//! - `frame`: pixel buffers and the horizontal mirror transform
//! - `encoding`: layout to wire encoding tag resolution
//! - `message`: wire message construction and binary codec
//! - `source`: frame sources (synthetic, V4L2 behind `capture-v4l2`)
//! - `flip`: shared mirroring flag and control payload parsing
//! - `transport`: QoS policy, in-memory and MQTT backends
//! - `publisher`: the paced publish loop
//! - `preview`: optional PNG snapshot of the latest frame
//! - `config`: file and environment configuration

pub mod config;
pub mod encoding;
pub mod error;
pub mod flip;
pub mod frame;
pub mod message;
pub mod preview;
pub mod publisher;
pub mod source;
pub mod transport;

pub use encoding::Encoding;
pub use error::{FramecastError, Result};
pub use flip::FlipController;
pub use frame::{mirror_horizontal, PixelBuffer, PixelLayout, SampleDepth};
pub use message::WireMessage;
pub use publisher::{Publisher, PublisherStats, Rate, ShutdownFlag, TickOutcome};
pub use source::{CaptureSource, FrameSource, SourceConfig, SourceKind, SourceStats};
pub use transport::{QosConfig, Transport};
