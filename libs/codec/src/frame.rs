//! # Stream Framing
//!
//! One frame carries one envelope:
//!
//! ```text
//! ┌────────────────┬──────────────────┬─────────────────────┬───────────┐
//! │ header_len u32 │ header (encoded) │ payload_length u64  │ payload   │
//! └────────────────┴──────────────────┴─────────────────────┴───────────┘
//! ```
//!
//! Boundaries come only from the two length fields, so a header that fails
//! to decode can be dropped while the stream stays in sync. [`FrameDecoder`]
//! accumulates partial reads and hands out complete frames one at a time.

use crate::constants::{
    DEFAULT_MAX_HEADER_SIZE, DEFAULT_MAX_PAYLOAD_SIZE, FRAME_OVERHEAD, HEADER_LENGTH_PREFIX,
    PAYLOAD_LENGTH_SIZE,
};
use crate::error::{FrameError, FrameResult, FrameSection};
use crate::header::{decode_header_prefix, encode_header_into};
use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;
use types::Envelope;

/// Size ceilings enforced on both the encode and decode side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_header_size: usize,
    pub max_payload_size: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl FrameLimits {
    fn check(&self, section: FrameSection, size: u64) -> FrameResult<()> {
        let limit = match section {
            FrameSection::Header => self.max_header_size,
            FrameSection::Payload => self.max_payload_size,
        };
        if size > limit as u64 {
            return Err(FrameError::too_large(section, size, limit));
        }
        Ok(())
    }
}

/// Serialize an envelope into one contiguous frame, consuming it
pub fn encode_frame(envelope: Envelope, limits: &FrameLimits) -> FrameResult<Bytes> {
    let header_len = envelope.header.encoded_len();
    limits.check(FrameSection::Header, header_len as u64)?;
    limits.check(FrameSection::Payload, envelope.payload.len() as u64)?;

    let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + header_len + envelope.payload.len());
    buf.put_u32_le(header_len as u32);
    encode_header_into(&envelope.header, &mut buf);
    buf.put_u64_le(envelope.payload.len() as u64);
    buf.put_slice(&envelope.payload);
    Ok(buf.freeze())
}

/// A complete frame whose header has not been decoded yet
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub header: Bytes,
    pub payload: Bytes,
}

impl RawFrame {
    /// Decode the header section and rebuild the envelope
    ///
    /// The header must fill its declared section exactly; leftovers or a
    /// shortfall mean the sender and receiver disagree on the layout.
    pub fn decode(self) -> FrameResult<Envelope> {
        let (header, consumed) = decode_header_prefix(&self.header)?;
        if consumed != self.header.len() {
            return Err(FrameError::HeaderLength {
                declared: self.header.len(),
                actual: consumed,
            });
        }
        Ok(Envelope::new(header, self.payload))
    }

    /// Total size this frame occupied on the wire
    pub fn wire_len(&self) -> usize {
        FRAME_OVERHEAD + self.header.len() + self.payload.len()
    }
}

/// Incremental frame splitter over a byte stream
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    limits: FrameLimits,
}

impl FrameDecoder {
    pub fn new(limits: FrameLimits) -> Self {
        Self::with_capacity(limits, 64 * 1024)
    }

    pub fn with_capacity(limits: FrameLimits, capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            limits,
        }
    }

    pub fn limits(&self) -> &FrameLimits {
        &self.limits
    }

    /// Bytes received but not yet handed out as frames
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Length of the complete frame at the front of the buffer, if one is there
    pub fn complete_frame_len(&self) -> FrameResult<Option<usize>> {
        let Some(prefix) = self.buffer.get(..HEADER_LENGTH_PREFIX) else {
            return Ok(None);
        };
        let header_len = LittleEndian::read_u32(prefix) as usize;
        self.limits.check(FrameSection::Header, header_len as u64)?;

        let payload_len_at = HEADER_LENGTH_PREFIX + header_len;
        let Some(len_field) = self
            .buffer
            .get(payload_len_at..payload_len_at + PAYLOAD_LENGTH_SIZE)
        else {
            return Ok(None);
        };
        let payload_len = LittleEndian::read_u64(len_field);
        self.limits.check(FrameSection::Payload, payload_len)?;

        let total = payload_len_at + PAYLOAD_LENGTH_SIZE + payload_len as usize;
        if self.buffer.len() < total {
            return Ok(None);
        }
        Ok(Some(total))
    }

    /// Whether a whole frame is waiting in the buffer
    pub fn has_frame(&self) -> bool {
        matches!(self.complete_frame_len(), Ok(Some(_)))
    }

    /// Split the next complete frame off the buffer
    ///
    /// Returns `Ok(None)` while the frame is still partial; in that case the
    /// buffer is grown so the remaining bytes fit without repeated copies.
    pub fn next_frame(&mut self) -> FrameResult<Option<RawFrame>> {
        let total = match self.complete_frame_len()? {
            Some(total) => total,
            None => {
                self.reserve_for_partial();
                return Ok(None);
            }
        };

        let frame = self.buffer.split_to(total).freeze();
        let header_len = LittleEndian::read_u32(&frame[..HEADER_LENGTH_PREFIX]) as usize;
        let header_end = HEADER_LENGTH_PREFIX + header_len;
        let payload_start = header_end + PAYLOAD_LENGTH_SIZE;

        trace!(
            frame_bytes = total,
            header_bytes = header_len,
            remaining = self.buffer.len(),
            "Split frame from stream"
        );

        Ok(Some(RawFrame {
            header: frame.slice(HEADER_LENGTH_PREFIX..header_end),
            payload: frame.slice(payload_start..),
        }))
    }

    /// Mutable access to the receive buffer for direct socket reads
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Drop everything buffered (after a fatal framing error)
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn reserve_for_partial(&mut self) {
        let Some(prefix) = self.buffer.get(..HEADER_LENGTH_PREFIX) else {
            return;
        };
        let header_len = LittleEndian::read_u32(prefix) as usize;
        let payload_len_at = HEADER_LENGTH_PREFIX + header_len;
        if let Some(len_field) = self
            .buffer
            .get(payload_len_at..payload_len_at + PAYLOAD_LENGTH_SIZE)
        {
            let total = payload_len_at + PAYLOAD_LENGTH_SIZE + LittleEndian::read_u64(len_field) as usize;
            let missing = total.saturating_sub(self.buffer.len());
            self.buffer.reserve(missing);
        }
    }
}
