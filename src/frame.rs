//! In-memory pixel buffers.
//!
//! - `PixelLayout`: channel count plus per-sample depth.
//! - `PixelBuffer`: rectangular grid with an explicit row stride.
//! - `mirror_horizontal`: the runtime flip transform.
//!
//! A buffer's payload is always exactly `stride * height` bytes and the stride
//! is never smaller than the tight row size. Both are checked at construction
//! so every later stage can index rows without bounds surprises.

use std::fmt;

use crate::error::{FramecastError, Result};

/// Storage type of a single channel sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleDepth {
    U8,
    I8,
    U16,
    I16,
    F32,
}

impl SampleDepth {
    pub fn bytes(self) -> usize {
        match self {
            SampleDepth::U8 | SampleDepth::I8 => 1,
            SampleDepth::U16 | SampleDepth::I16 => 2,
            SampleDepth::F32 => 4,
        }
    }
}

impl fmt::Display for SampleDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleDepth::U8 => "u8",
            SampleDepth::I8 => "i8",
            SampleDepth::U16 => "u16",
            SampleDepth::I16 => "i16",
            SampleDepth::F32 => "f32",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelLayout {
    pub channels: u8,
    pub depth: SampleDepth,
}

impl PixelLayout {
    pub const MONO8: PixelLayout = PixelLayout::new(1, SampleDepth::U8);
    pub const BGR8: PixelLayout = PixelLayout::new(3, SampleDepth::U8);
    pub const MONO16: PixelLayout = PixelLayout::new(1, SampleDepth::I16);
    pub const RGBA8: PixelLayout = PixelLayout::new(4, SampleDepth::U8);

    pub const fn new(channels: u8, depth: SampleDepth) -> Self {
        Self { channels, depth }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.channels as usize * self.depth.bytes()
    }
}

/// Rectangular image with an explicit row stride.
///
/// Fields are private so the `stride * height == data.len()` invariant cannot
/// be broken after construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    layout: PixelLayout,
    stride: usize,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        stride: usize,
        data: Vec<u8>,
    ) -> Result<Self> {
        let row = tight_row_bytes(width, layout)?;
        if stride < row {
            return Err(FramecastError::InvalidBuffer(format!(
                "stride {} is smaller than row size {} ({}px x {} bytes)",
                stride,
                row,
                width,
                layout.bytes_per_pixel()
            )));
        }
        let expected = stride
            .checked_mul(height as usize)
            .ok_or_else(|| FramecastError::InvalidBuffer("buffer dimensions overflow".into()))?;
        if data.len() != expected {
            return Err(FramecastError::InvalidBuffer(format!(
                "payload length mismatch: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            layout,
            stride,
            data,
        })
    }

    /// Build a buffer whose stride is exactly `width * bytes_per_pixel`.
    pub fn tight(width: u32, height: u32, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        let stride = tight_row_bytes(width, layout)?;
        Self::new(width, height, layout, stride, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Bytes of pixel content in one row, excluding padding.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.layout.bytes_per_pixel()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

fn tight_row_bytes(width: u32, layout: PixelLayout) -> Result<usize> {
    (width as usize)
        .checked_mul(layout.bytes_per_pixel())
        .ok_or_else(|| FramecastError::InvalidBuffer("row size overflows".into()))
}

/// Mirror a buffer about its vertical axis in place.
///
/// Pixels (not bytes) swap within each row, so multi-byte pixels keep their
/// channel order. Row padding past `width * bpp` is left untouched, which keeps
/// odd strides well defined.
pub fn mirror_horizontal(buffer: &mut PixelBuffer) {
    let bpp = buffer.layout.bytes_per_pixel();
    let row_bytes = buffer.row_bytes();
    let width = buffer.width as usize;
    if bpp == 0 || width < 2 {
        return;
    }
    let stride = buffer.stride;
    for row in buffer.data.chunks_exact_mut(stride) {
        let pixels = &mut row[..row_bytes];
        for left in 0..width / 2 {
            let right = width - 1 - left;
            let (head, tail) = pixels.split_at_mut(right * bpp);
            head[left * bpp..(left + 1) * bpp].swap_with_slice(&mut tail[..bpp]);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
