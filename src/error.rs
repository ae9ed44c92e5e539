//! Error taxonomy for the frame publisher.
//!
//! Per-tick failures (`UnsupportedEncoding`, empty reads) are contained by the
//! publisher loop. Construction failures (`DeviceOpen`, `InvalidConfig`) and
//! `TransportPublish` escape to the binary and terminate the process.

use thiserror::Error;

use crate::frame::SampleDepth;

#[derive(Debug, Error)]
pub enum FramecastError {
    /// The pixel layout has no canonical encoding tag.
    #[error("unsupported encoding: {channels} channel(s) of {depth}")]
    UnsupportedEncoding { channels: u8, depth: SampleDepth },

    /// Buffer geometry does not match its payload.
    #[error("invalid pixel buffer: {0}")]
    InvalidBuffer(String),

    /// The capture device could not be opened at construction.
    #[error("could not open video device {device}: {reason}")]
    DeviceOpen { device: String, reason: String },

    /// The transport refused a message or has shut down.
    #[error("transport publish failed: {0}")]
    TransportPublish(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A wire message could not be decoded.
    #[error("malformed wire message: {0}")]
    WireFormat(String),
}

pub type Result<T> = std::result::Result<T, FramecastError>;
