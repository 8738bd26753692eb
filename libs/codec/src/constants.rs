//! Wire layout constants
//!
//! All multi-byte integers on the wire are little-endian.

use types::Header;

/// Fixed header preamble: msg_type (1) + creation_time (8) + request_id (8) + stage_count (4)
pub const PREAMBLE_SIZE: usize = Header::PREAMBLE_SIZE;

/// One stage record: stage_id (4) + range_start (4) + range_end (4)
pub const STAGE_RECORD_SIZE: usize = Header::STAGE_RECORD_SIZE;

/// `header_len` prefix in front of every frame
pub const HEADER_LENGTH_PREFIX: usize = 4;

/// `payload_length` field between header and payload
pub const PAYLOAD_LENGTH_SIZE: usize = 8;

/// Framing overhead excluding the header itself
pub const FRAME_OVERHEAD: usize = HEADER_LENGTH_PREFIX + PAYLOAD_LENGTH_SIZE;

/// Default ceiling on the encoded header section (≈5.4K stages)
pub const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;

/// Default ceiling on a single payload
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;
