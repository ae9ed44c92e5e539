//! Frame sources.
//!
//! This module provides the two producers the publisher can be built with:
//! - V4L2 capture devices (feature: capture-v4l2)
//! - Synthetic test pattern (testing, CI, headless demos)
//!
//! Exactly one source is chosen when the process starts and is never swapped.
//! A source returns `None` when no frame is available right now; callers treat
//! that as "skip this tick" and try again on the next one.

#[cfg(feature = "capture-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

use serde::Deserialize;
use std::str::FromStr;

use crate::error::{FramecastError, Result};
use crate::frame::{PixelBuffer, PixelLayout};

pub use synthetic::SyntheticSource;
#[cfg(feature = "capture-v4l2")]
pub use v4l2::V4l2Source;

/// Produces one pixel buffer per call, or `None` when nothing is ready.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<PixelBuffer>;

    /// Human readable identity for logs.
    fn describe(&self) -> String;

    fn stats(&self) -> SourceStats {
        SourceStats::default()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Option<PixelBuffer> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    V4l2,
    Synthetic,
}

impl FromStr for SourceKind {
    type Err = FramecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "v4l2" | "camera" | "device" => Ok(Self::V4l2),
            "synthetic" | "test" | "burger" => Ok(Self::Synthetic),
            other => Err(FramecastError::InvalidConfig(format!(
                "unknown source '{}': expected 'v4l2' or 'synthetic'",
                other
            ))),
        }
    }
}

/// Settings shared by every source variant.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Device path (e.g., "/dev/video0"). Ignored by the synthetic source.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Requested device frame rate. Pacing is done by the publisher.
    pub target_fps: u32,
    /// Layout emitted by the synthetic source.
    pub synthetic_layout: PixelLayout,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::V4l2,
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
            synthetic_layout: PixelLayout::BGR8,
        }
    }
}

/// Frame source selected from configuration.
pub struct CaptureSource {
    backend: CaptureBackend,
}

enum CaptureBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "capture-v4l2")]
    Device(V4l2Source),
}

impl CaptureSource {
    /// Open the configured source. Device failures are fatal here, not per tick.
    pub fn open(config: &SourceConfig) -> Result<Self> {
        match config.kind {
            SourceKind::Synthetic => Ok(Self {
                backend: CaptureBackend::Synthetic(SyntheticSource::new(
                    config.width,
                    config.height,
                    config.synthetic_layout,
                )?),
            }),
            SourceKind::V4l2 => {
                #[cfg(feature = "capture-v4l2")]
                {
                    Ok(Self {
                        backend: CaptureBackend::Device(V4l2Source::open(config)?),
                    })
                }
                #[cfg(not(feature = "capture-v4l2"))]
                {
                    Err(FramecastError::DeviceOpen {
                        device: config.device.clone(),
                        reason: "V4L2 capture requires the capture-v4l2 feature".to_string(),
                    })
                }
            }
        }
    }
}

impl FrameSource for CaptureSource {
    fn next_frame(&mut self) -> Option<PixelBuffer> {
        match &mut self.backend {
            CaptureBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(source) => source.next_frame(),
        }
    }

    fn describe(&self) -> String {
        match &self.backend {
            CaptureBackend::Synthetic(source) => source.describe(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(source) => source.describe(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            CaptureBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "capture-v4l2")]
            CaptureBackend::Device(source) => source.stats(),
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub empty_reads: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_parses_aliases() {
        assert_eq!("V4L2".parse::<SourceKind>().unwrap(), SourceKind::V4l2);
        assert_eq!(
            "synthetic".parse::<SourceKind>().unwrap(),
            SourceKind::Synthetic
        );
        assert!("rtsp".parse::<SourceKind>().is_err());
    }

    #[test]
    fn synthetic_source_opens_from_config() {
        let config = SourceConfig {
            kind: SourceKind::Synthetic,
            width: 32,
            height: 24,
            ..SourceConfig::default()
        };
        let mut source = CaptureSource::open(&config).unwrap();
        let frame = source.next_frame().expect("synthetic frames are always ready");
        assert_eq!((frame.width(), frame.height()), (32, 24));
        assert_eq!(source.stats().frames_captured, 1);
    }

    #[test]
    fn missing_device_fails_at_open() {
        let config = SourceConfig {
            kind: SourceKind::V4l2,
            device: "/dev/framecast-does-not-exist".to_string(),
            ..SourceConfig::default()
        };
        match CaptureSource::open(&config) {
            Err(FramecastError::DeviceOpen { device, .. }) => {
                assert_eq!(device, "/dev/framecast-does-not-exist")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opening a missing device must fail"),
        }
    }
}
