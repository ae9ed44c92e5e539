//! Synthetic frame source.
//!
//! Renders a scrolling gradient with a block bouncing across it, so a viewer
//! can see both motion and the effect of the flip transform. Only the output
//! contract matters: every call returns a tightly packed frame of the
//! configured size and layout.

use crate::encoding::{self, Encoding};
use crate::error::{FramecastError, Result};
use crate::frame::{PixelBuffer, PixelLayout};

use super::{FrameSource, SourceStats};

/// Edge length of the bouncing block as a fraction of the shorter side.
const BLOCK_DIVISOR: u32 = 5;

pub struct SyntheticSource {
    width: u32,
    height: u32,
    encoding: Encoding,
    frame_count: u64,
}

impl SyntheticSource {
    /// Layouts without an encoding tag are rejected here, before any tick runs.
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(FramecastError::InvalidBuffer(format!(
                "synthetic frame size must be non-zero, got {}x{}",
                width, height
            )));
        }
        let encoding = encoding::resolve(layout)?;
        log::info!(
            "SyntheticSource: {}x{} {} test pattern",
            width,
            height,
            encoding
        );
        Ok(Self {
            width,
            height,
            encoding,
            frame_count: 0,
        })
    }

    fn render(&self) -> Vec<u8> {
        let w = self.width as usize;
        let h = self.height as usize;
        let layout = self.encoding.layout();
        let bpp = layout.bytes_per_pixel();
        let t = self.frame_count as usize;

        let block = (self.width.min(self.height) / BLOCK_DIVISOR).max(1) as usize;
        let (bx, by) = (bounce(t * 3, w, block), bounce(t * 2, h, block));

        let mut data = vec![0u8; w * h * bpp];
        for (y, row) in data.chunks_exact_mut(w * bpp).enumerate() {
            for (x, pixel) in row.chunks_exact_mut(bpp).enumerate() {
                let inside = x >= bx && x < bx + block && y >= by && y < by + block;
                // Gradient runs left to right so mirroring is visible.
                let level = if inside {
                    255
                } else {
                    ((x * 255 / w.max(1) + t) % 200) as u8
                };
                write_pixel(self.encoding, pixel, level, (y * 255 / h.max(1)) as u8);
            }
        }
        data
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Option<PixelBuffer> {
        self.frame_count += 1;
        let data = self.render();
        match PixelBuffer::tight(self.width, self.height, self.encoding.layout(), data) {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                log::warn!("SyntheticSource: failed to assemble frame: {}", e);
                None
            }
        }
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{} {}", self.width, self.height, self.encoding)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            empty_reads: 0,
        }
    }
}

/// Position of a block of size `block` bouncing inside `extent` after `step` moves.
fn bounce(step: usize, extent: usize, block: usize) -> usize {
    let span = extent.saturating_sub(block);
    if span == 0 {
        return 0;
    }
    let period = span * 2;
    let phase = step % period;
    if phase <= span {
        phase
    } else {
        period - phase
    }
}

fn write_pixel(encoding: Encoding, pixel: &mut [u8], level: u8, tint: u8) {
    match encoding {
        Encoding::Mono8 => pixel[0] = level,
        Encoding::Bgr8 => {
            pixel[0] = tint;
            pixel[1] = level;
            pixel[2] = level / 2 + tint / 2;
        }
        Encoding::Rgba8 => {
            pixel[0] = level / 2 + tint / 2;
            pixel[1] = level;
            pixel[2] = tint;
            pixel[3] = 255;
        }
        Encoding::Mono16 => {
            let value = (level as i16) << 7;
            pixel.copy_from_slice(&value.to_le_bytes());
        }
    }
}
