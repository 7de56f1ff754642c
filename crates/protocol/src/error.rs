//! Frame decoding error types

use thiserror::Error;

/// Anomalies found while reassembling or parsing a frame
///
/// None of these halt decoding: the decoder reports them as error messages
/// and continues with the next packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Start packet carried a discriminator we do not understand
    #[error("Unknown frame type: {marker}")]
    UnknownFrameType { marker: String },

    /// Frame grew past the reassembly bound without a terminator
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Frame body was not valid UTF-8 text
    #[error("Invalid frame encoding: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}
