//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for capturing frames from local V4L2 devices.
//!
//! The V4L2 source is responsible for:
//! - Opening the device node (e.g., /dev/video0) once, at construction
//! - Negotiating size, rate and a pixel format we can publish
//! - Capturing frames in-memory with a bounded read timeout
//! - Producing `PixelBuffer` instances
//!
//! A failed read is not fatal: it is logged and surfaces as `None`, and the
//! publisher retries on its next tick. The device is released when the source
//! is dropped.

use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_frame, DeviceFormat};
use super::{FrameSource, SourceConfig, SourceStats};
use crate::error::{FramecastError, Result};
use crate::frame::PixelBuffer;

/// Number of mmap buffers queued with the driver.
const STREAM_BUFFERS: u32 = 4;

/// Upper bound for a single dequeue; keeps the publisher loop responsive.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

pub struct V4l2Source {
    device_path: String,
    state: DeviceState,
    format: DeviceFormat,
    width: u32,
    height: u32,
    stride: usize,
    frame_count: u64,
    empty_reads: u64,
    last_frame_at: Option<Instant>,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn open(config: &SourceConfig) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let open_err = |reason: String| FramecastError::DeviceOpen {
            device: config.device.clone(),
            reason,
        };

        let device = v4l::Device::with_path(&config.device).map_err(|e| open_err(e.to_string()))?;
        let mut format = device
            .format()
            .map_err(|e| open_err(format!("read format: {}", e)))?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"BGR3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    config.device,
                    err
                );
                device
                    .format()
                    .map_err(|e| open_err(format!("read format after set failure: {}", e)))?
            }
        };

        let pixel_format = DeviceFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            open_err(format!(
                "unsupported pixel format {} (expected BGR3, RGB3, YUYV or GREY)",
                format.fourcc
            ))
        })?;
        if pixel_format == DeviceFormat::Yuyv && format.width % 2 != 0 {
            return Err(open_err(format!(
                "YUYV needs an even width, device negotiated {}",
                format.width
            )));
        }

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    config.device,
                    err
                );
            }
        }

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)?;
                stream.set_timeout(READ_TIMEOUT);
                Ok(stream)
            },
        }
        .try_build()
        .map_err(|e: std::io::Error| open_err(format!("create buffer stream: {}", e)))?;

        log::info!(
            "V4l2Source: opened {} ({}x{} {}, stride {})",
            config.device,
            format.width,
            format.height,
            format.fourcc,
            format.stride
        );

        Ok(Self {
            device_path: config.device.clone(),
            state,
            format: pixel_format,
            width: format.width,
            height: format.height,
            stride: format.stride as usize,
            frame_count: 0,
            empty_reads: 0,
            last_frame_at: None,
        })
    }

    fn read_frame(&mut self) -> Result<PixelBuffer> {
        use v4l::io::traits::CaptureStream;

        let (width, height, stride, format) = (self.width, self.height, self.stride, self.format);
        self.state.with_mut(|fields| {
            let (buf, meta) = fields
                .stream
                .next()
                .map_err(|e| FramecastError::InvalidBuffer(format!("capture: {}", e)))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_frame(&buf[..used], width, height, stride, format)
        })
    }
}

impl FrameSource for V4l2Source {
    fn next_frame(&mut self) -> Option<PixelBuffer> {
        match self.read_frame() {
            Ok(frame) => {
                self.frame_count += 1;
                self.last_frame_at = Some(Instant::now());
                Some(frame)
            }
            Err(e) => {
                self.empty_reads += 1;
                let since = self
                    .last_frame_at
                    .map(|at| format!("{:?} since last frame", at.elapsed()))
                    .unwrap_or_else(|| "no frame yet".to_string());
                log::warn!(
                    "V4l2Source: no frame from {} ({}): {}",
                    self.device_path,
                    since,
                    e
                );
                None
            }
        }
    }

    fn describe(&self) -> String {
        format!(
            "v4l2 {} {}x{} {:?}",
            self.device_path, self.width, self.height, self.format
        )
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            empty_reads: self.empty_reads,
        }
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        log::info!(
            "V4l2Source: releasing {} after {} frames",
            self.device_path,
            self.frame_count
        );
    }
}
