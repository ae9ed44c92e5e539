//! Debug preview of the most recently published frame.
//!
//! The preview is purely observational: it writes the post-flip frame as a PNG
//! snapshot at most once per `min_interval`, and every failure is logged and
//! swallowed so the publisher loop never stalls or aborts because of it.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::frame::PixelBuffer;

pub const DEFAULT_PREVIEW_PATH: &str = "framecast-preview.png";
pub const DEFAULT_PREVIEW_INTERVAL: Duration = Duration::from_secs(1);

pub struct Preview {
    path: PathBuf,
    min_interval: Duration,
    last_write: Option<Instant>,
    failures: u64,
}

impl Preview {
    pub fn new(path: PathBuf, min_interval: Duration) -> Self {
        if cfg!(feature = "preview") {
            log::info!("preview snapshots will be written to {}", path.display());
        } else {
            log::warn!("preview requested but framecast was built without the preview feature");
        }
        Self {
            path,
            min_interval,
            last_write: None,
            failures: 0,
        }
    }

    pub fn render(&mut self, frame: &PixelBuffer) {
        if let Some(last) = self.last_write {
            if last.elapsed() < self.min_interval {
                return;
            }
        }
        self.last_write = Some(Instant::now());
        if let Err(e) = write_snapshot(&self.path, frame) {
            self.failures += 1;
            if self.failures.is_power_of_two() {
                log::warn!(
                    "preview write to {} failed ({} so far): {}",
                    self.path.display(),
                    self.failures,
                    e
                );
            }
        }
    }
}

#[cfg(feature = "preview")]
fn write_snapshot(path: &std::path::Path, frame: &PixelBuffer) -> anyhow::Result<()> {
    use anyhow::Context;

    let rgb = to_rgb8(frame);
    let tmp = path.with_extension("png.tmp");
    image::save_buffer_with_format(
        &tmp,
        &rgb,
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgb8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("encode preview {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(not(feature = "preview"))]
fn write_snapshot(_path: &std::path::Path, _frame: &PixelBuffer) -> anyhow::Result<()> {
    Ok(())
}

/// Flatten any publishable layout into tightly packed RGB8.
#[cfg_attr(not(feature = "preview"), allow(dead_code))]
fn to_rgb8(frame: &PixelBuffer) -> Vec<u8> {
    use crate::encoding::{self, Encoding};

    let width = frame.width() as usize;
    let mut out = Vec::with_capacity(width * frame.height() as usize * 3);
    let Ok(encoding) = encoding::resolve(frame.layout()) else {
        return vec![0; width * frame.height() as usize * 3];
    };
    let bpp = frame.layout().bytes_per_pixel();
    for row in frame.data().chunks_exact(frame.stride()) {
        for px in row[..width * bpp].chunks_exact(bpp) {
            match encoding {
                Encoding::Mono8 => out.extend_from_slice(&[px[0], px[0], px[0]]),
                Encoding::Bgr8 => out.extend_from_slice(&[px[2], px[1], px[0]]),
                Encoding::Rgba8 => out.extend_from_slice(&px[..3]),
                Encoding::Mono16 => {
                    let v = i16::from_le_bytes([px[0], px[1]]).max(0) as u16;
                    let level = (v >> 7).min(255) as u8;
                    out.extend_from_slice(&[level, level, level]);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;

    #[test]
    fn bgr_rows_are_swizzled_and_unpadded() {
        let frame =
            PixelBuffer::new(1, 2, PixelLayout::BGR8, 4, vec![1, 2, 3, 0, 4, 5, 6, 0]).unwrap();
        assert_eq!(to_rgb8(&frame), vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn mono16_is_scaled_down() {
        let value = (200i16 << 7).to_le_bytes();
        let frame = PixelBuffer::tight(1, 1, PixelLayout::MONO16, value.to_vec()).unwrap();
        assert_eq!(to_rgb8(&frame), vec![200, 200, 200]);
    }

    #[test]
    fn render_never_fails_on_unwritable_path() {
        let mut preview = Preview::new(
            PathBuf::from("/nonexistent-dir/framecast/preview.png"),
            Duration::ZERO,
        );
        let frame = PixelBuffer::tight(2, 1, PixelLayout::MONO8, vec![0, 255]).unwrap();
        preview.render(&frame);
        preview.render(&frame);
    }

    #[cfg(feature = "preview")]
    #[test]
    fn render_writes_png_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.png");
        let mut preview = Preview::new(path.clone(), Duration::from_secs(60));
        let frame = PixelBuffer::tight(2, 2, PixelLayout::RGBA8, vec![255; 16]).unwrap();
        preview.render(&frame);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
