//! Canonical encoding tags for pixel layouts.

use std::fmt;
use std::str::FromStr;

use crate::error::{FramecastError, Result};
use crate::frame::{PixelLayout, SampleDepth};

/// Encoding tag carried by every wire message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    Mono8,
    Bgr8,
    Mono16,
    Rgba8,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Mono8 => "mono8",
            Encoding::Bgr8 => "bgr8",
            Encoding::Mono16 => "mono16",
            Encoding::Rgba8 => "rgba8",
        }
    }

    /// Inverse of [`resolve`].
    pub fn layout(&self) -> PixelLayout {
        match self {
            Encoding::Mono8 => PixelLayout::MONO8,
            Encoding::Bgr8 => PixelLayout::BGR8,
            Encoding::Mono16 => PixelLayout::MONO16,
            Encoding::Rgba8 => PixelLayout::RGBA8,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = FramecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mono8" => Ok(Encoding::Mono8),
            "bgr8" => Ok(Encoding::Bgr8),
            "mono16" => Ok(Encoding::Mono16),
            "rgba8" => Ok(Encoding::Rgba8),
            other => Err(FramecastError::WireFormat(format!(
                "unknown encoding tag '{}'",
                other
            ))),
        }
    }
}

/// Map a pixel layout to its encoding tag.
pub fn resolve(layout: PixelLayout) -> Result<Encoding> {
    match (layout.channels, layout.depth) {
        (1, SampleDepth::U8) => Ok(Encoding::Mono8),
        (3, SampleDepth::U8) => Ok(Encoding::Bgr8),
        (1, SampleDepth::I16) => Ok(Encoding::Mono16),
        (4, SampleDepth::U8) => Ok(Encoding::Rgba8),
        (channels, depth) => Err(FramecastError::UnsupportedEncoding { channels, depth }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_layouts_resolve_to_fixed_tags() {
        let table = [
            (PixelLayout::new(1, SampleDepth::U8), "mono8"),
            (PixelLayout::new(3, SampleDepth::U8), "bgr8"),
            (PixelLayout::new(1, SampleDepth::I16), "mono16"),
            (PixelLayout::new(4, SampleDepth::U8), "rgba8"),
        ];
        for (layout, tag) in table {
            assert_eq!(resolve(layout).unwrap().as_str(), tag);
        }
    }

    #[test]
    fn other_layouts_are_unsupported() {
        for layout in [
            PixelLayout::new(2, SampleDepth::U8),
            PixelLayout::new(1, SampleDepth::U16),
            PixelLayout::new(3, SampleDepth::I8),
            PixelLayout::new(1, SampleDepth::F32),
            PixelLayout::new(0, SampleDepth::U8),
        ] {
            let err = resolve(layout).unwrap_err();
            assert!(matches!(err, FramecastError::UnsupportedEncoding { .. }));
        }
    }

    #[test]
    fn tags_parse_back_to_layouts() {
        for enc in [
            Encoding::Mono8,
            Encoding::Bgr8,
            Encoding::Mono16,
            Encoding::Rgba8,
        ] {
            let parsed: Encoding = enc.as_str().parse().unwrap();
            assert_eq!(parsed, enc);
            assert_eq!(resolve(parsed.layout()).unwrap(), enc);
        }
        assert!("yuv422".parse::<Encoding>().is_err());
    }
}
