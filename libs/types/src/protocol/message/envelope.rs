//! Header + payload pair handed to the transport

use super::header::Header;
use bytes::Bytes;

/// Message envelope
///
/// Owns both the header and the payload buffer. Transport calls take the
/// envelope by value, so a sent buffer cannot be touched again by the caller;
/// clone the `Bytes` beforehand to keep a handle (reference counted, no copy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header: Header,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(header: Header, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    pub fn into_parts(self) -> (Header, Bytes) {
        (self.header, self.payload)
    }
}
