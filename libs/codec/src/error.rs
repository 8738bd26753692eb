//! Codec errors for header decoding and frame splitting
//!
//! Decoding failures always travel back to the caller; nothing here is
//! coerced into a default header.

use std::fmt;
use thiserror::Error;

/// Header decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer shorter than the preamble or than the declared stage list requires
    #[error("Truncated header: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// Type tag outside the closed message type enumeration
    #[error("Unknown message type tag {tag}")]
    UnknownType { tag: u8 },
}

impl DecodeError {
    pub fn truncated(needed: usize, available: usize) -> Self {
        Self::Truncated { needed, available }
    }
}

/// Which part of a frame a size limit applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSection {
    Header,
    Payload,
}

impl fmt::Display for FrameSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSection::Header => f.write_str("header"),
            FrameSection::Payload => f.write_str("payload"),
        }
    }
}

/// Frame-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The header section could not be decoded
    #[error("Header decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// The decoded header does not fill the declared header section
    #[error("Header length mismatch: frame declares {declared} bytes, header encodes {actual}")]
    HeaderLength { declared: usize, actual: usize },

    /// A declared length exceeds the configured limit
    #[error("Frame {section} too large: {size} bytes exceeds limit {limit}")]
    TooLarge {
        section: FrameSection,
        size: u64,
        limit: usize,
    },
}

impl FrameError {
    pub fn too_large(section: FrameSection, size: u64, limit: usize) -> Self {
        Self::TooLarge {
            section,
            size,
            limit,
        }
    }

    /// Whether the byte stream can no longer be trusted after this error
    ///
    /// Oversized lengths leave no safe frame boundary to resume from; every
    /// other error is confined to one frame whose bounds are known.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::TooLarge { .. })
    }

    /// Short label for metrics and logs
    pub fn category(&self) -> &'static str {
        match self {
            FrameError::Decode(DecodeError::Truncated { .. }) => "truncated",
            FrameError::Decode(DecodeError::UnknownType { .. }) => "unknown_type",
            FrameError::HeaderLength { .. } => "header_length",
            FrameError::TooLarge { .. } => "too_large",
        }
    }
}

/// Result type for decoding operations
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Result type for framing operations
pub type FrameResult<T> = std::result::Result<T, FrameError>;
