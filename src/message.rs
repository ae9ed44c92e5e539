//! Wire messages: one frame plus the metadata a subscriber needs to decode it.
//!
//! `build` snapshots a `PixelBuffer` into an immutable `WireMessage`. The
//! payload is copied, never aliased, because a capture backend may recycle its
//! buffer storage on the next read.
//!
//! Binary layout produced by `WireMessage::encode` (all integers little-endian):
//!
//! ```text
//! "FCI1" | u32 height | u32 width | u32 len, encoding tag | u32 step
//!        | u8 is_bigendian | u32 len, frame_id | u32 len, data
//! ```

use crate::encoding::{self, Encoding};
use crate::error::{FramecastError, Result};
use crate::frame::PixelBuffer;

const WIRE_MAGIC: &[u8; 4] = b"FCI1";

/// Largest accepted payload (256 MiB), bounds decode allocations.
const MAX_DATA_LEN: usize = 256 * 1024 * 1024;

const MAX_TAG_LEN: usize = 32;
const MAX_FRAME_ID_LEN: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireMessage {
    height: u32,
    width: u32,
    encoding: Encoding,
    step: u32,
    is_bigendian: bool,
    data: Vec<u8>,
    frame_id: String,
}

/// Convert a pixel buffer into a wire message tagged with `sequence_id`.
pub fn build(buffer: &PixelBuffer, sequence_id: u64) -> Result<WireMessage> {
    let encoding = encoding::resolve(buffer.layout())?;
    let step = u32::try_from(buffer.stride()).map_err(|_| {
        FramecastError::InvalidBuffer(format!("stride {} exceeds u32", buffer.stride()))
    })?;
    let size = buffer.stride() * buffer.height() as usize;
    let mut data = vec![0u8; size];
    data.copy_from_slice(&buffer.data()[..size]);
    Ok(WireMessage {
        height: buffer.height(),
        width: buffer.width(),
        encoding,
        step,
        is_bigendian: false,
        data,
        frame_id: sequence_id.to_string(),
    })
}

impl WireMessage {
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn is_bigendian(&self) -> bool {
        self.is_bigendian
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    /// Re-derive a pixel buffer from step, height and payload.
    pub fn to_pixel_buffer(&self) -> Result<PixelBuffer> {
        PixelBuffer::new(
            self.width,
            self.height,
            self.encoding.layout(),
            self.step as usize,
            self.data.clone(),
        )
    }

    pub fn encode(&self) -> Vec<u8> {
        let tag = self.encoding.as_str().as_bytes();
        let mut out = Vec::with_capacity(
            WIRE_MAGIC.len() + 4 * 6 + 1 + tag.len() + self.frame_id.len() + self.data.len(),
        );
        out.extend_from_slice(WIRE_MAGIC);
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        write_bytes(&mut out, tag);
        out.extend_from_slice(&self.step.to_le_bytes());
        out.push(u8::from(self.is_bigendian));
        write_bytes(&mut out, self.frame_id.as_bytes());
        write_bytes(&mut out, &self.data);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = 0usize;
        let magic = read_slice(bytes, &mut cursor, WIRE_MAGIC.len())?;
        if magic != WIRE_MAGIC {
            return Err(FramecastError::WireFormat("bad magic".into()));
        }
        let height = read_u32(bytes, &mut cursor)?;
        let width = read_u32(bytes, &mut cursor)?;
        let tag = read_str(bytes, &mut cursor, MAX_TAG_LEN, "encoding tag")?;
        let encoding: Encoding = tag.parse()?;
        let step = read_u32(bytes, &mut cursor)?;
        let is_bigendian = match read_slice(bytes, &mut cursor, 1)?[0] {
            0 => false,
            1 => true,
            other => {
                return Err(FramecastError::WireFormat(format!(
                    "invalid is_bigendian flag {}",
                    other
                )))
            }
        };
        let frame_id = read_str(bytes, &mut cursor, MAX_FRAME_ID_LEN, "frame id")?;
        let data_len = read_u32(bytes, &mut cursor)? as usize;
        if data_len > MAX_DATA_LEN {
            return Err(FramecastError::WireFormat(format!(
                "data length {} exceeds maximum {}",
                data_len, MAX_DATA_LEN
            )));
        }
        let expected = (step as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| FramecastError::WireFormat("step * height overflows".into()))?;
        if data_len != expected {
            return Err(FramecastError::WireFormat(format!(
                "data length {} does not match step {} x height {}",
                data_len, step, height
            )));
        }
        let data = read_slice(bytes, &mut cursor, data_len)?.to_vec();
        if cursor != bytes.len() {
            return Err(FramecastError::WireFormat(format!(
                "{} trailing bytes",
                bytes.len() - cursor
            )));
        }
        Ok(Self {
            height,
            width,
            encoding,
            step,
            is_bigendian,
            data,
            frame_id,
        })
    }
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let slice = read_slice(bytes, cursor, 4)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(slice);
    Ok(u32::from_le_bytes(buf))
}

fn read_slice<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .ok_or_else(|| FramecastError::WireFormat("length overflow".into()))?;
    if end > bytes.len() {
        return Err(FramecastError::WireFormat("unexpected end of message".into()));
    }
    let slice = &bytes[*cursor..end];
    *cursor = end;
    Ok(slice)
}

fn read_str(bytes: &[u8], cursor: &mut usize, max: usize, what: &str) -> Result<String> {
    let len = read_u32(bytes, cursor)? as usize;
    if len > max {
        return Err(FramecastError::WireFormat(format!(
            "{} length {} exceeds maximum {}",
            what, len, max
        )));
    }
    let raw = read_slice(bytes, cursor, len)?;
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|_| FramecastError::WireFormat(format!("{} is not utf-8", what)))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
