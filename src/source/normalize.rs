use crate::error::{FramecastError, Result};
use crate::frame::{PixelBuffer, PixelLayout};

/// Pixel formats a V4L2 device may negotiate that we know how to publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeviceFormat {
    Bgr24,
    Rgb24,
    Yuyv,
    Grey,
}

impl DeviceFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"BGR3" => Some(Self::Bgr24),
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }

    /// Minimum bytes one row of `width` pixels occupies in the device buffer.
    /// YUYV packs pixels in 4-byte pairs, so an odd width still needs a whole pair.
    fn min_row_bytes(self, width: usize) -> usize {
        match self {
            Self::Bgr24 | Self::Rgb24 => width * 3,
            Self::Yuyv => width.div_ceil(2) * 4,
            Self::Grey => width,
        }
    }
}

/// Convert one captured device buffer into a publishable pixel buffer.
///
/// BGR and GREY keep the device stride; RGB and YUYV are repacked tightly as BGR.
pub(crate) fn normalize_frame(
    raw: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    format: DeviceFormat,
) -> Result<PixelBuffer> {
    let w = width as usize;
    let h = height as usize;
    let stride = stride.max(format.min_row_bytes(w));
    let expected = stride
        .checked_mul(h)
        .ok_or_else(|| FramecastError::InvalidBuffer("frame dimensions overflow".into()))?;
    if raw.len() < expected {
        return Err(FramecastError::InvalidBuffer(format!(
            "{:?} frame too short: expected {}, got {}",
            format,
            expected,
            raw.len()
        )));
    }
    let raw = &raw[..expected];

    match format {
        DeviceFormat::Bgr24 => PixelBuffer::new(width, height, PixelLayout::BGR8, stride, raw.to_vec()),
        DeviceFormat::Grey => PixelBuffer::new(width, height, PixelLayout::MONO8, stride, raw.to_vec()),
        DeviceFormat::Rgb24 => {
            let mut bgr = Vec::with_capacity(w * h * 3);
            for row in raw.chunks_exact(stride) {
                for px in row[..w * 3].chunks_exact(3) {
                    bgr.extend_from_slice(&[px[2], px[1], px[0]]);
                }
            }
            PixelBuffer::tight(width, height, PixelLayout::BGR8, bgr)
        }
        DeviceFormat::Yuyv => {
            let mut bgr = Vec::with_capacity(w * h * 3);
            for row in raw.chunks_exact(stride) {
                for x in 0..w {
                    let pair = (x / 2) * 4;
                    let y = row[pair + (x % 2) * 2] as f32;
                    let u = row[pair + 1] as f32 - 128.0;
                    let v = row[pair + 3] as f32 - 128.0;
                    let r = y + 1.402_f32 * v;
                    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
                    let b = y + 1.772_f32 * u;
                    bgr.extend_from_slice(&[clamp_to_u8(b), clamp_to_u8(g), clamp_to_u8(r)]);
                }
            }
            PixelBuffer::tight(width, height, PixelLayout::BGR8, bgr)
        }
    }
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
