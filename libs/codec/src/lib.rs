//! # Staged Relay Codec
//!
//! ## Purpose
//!
//! The "rules" layer between the plain data model and the transport:
//! - Header encoding/decoding with bounds-checked, allocation-free validation
//! - Frame encoding for one [`types::Envelope`] per frame
//! - Incremental stream splitting via [`FrameDecoder`]
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → network/
//!     ↑           ↓          ↓
//! Header,     Wire layout,  Sockets,
//! Envelope    framing       poll loop
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Socket management or readiness handling (belongs in network/)
//! - Routing decisions; the stage list is carried, never interpreted here
//!
//! ## Quick Start
//!
//! ```rust
//! use codec::{decode_header, encode_frame, encode_header, FrameDecoder, FrameLimits};
//! use types::{Envelope, Header, MsgType};
//!
//! let header = Header::new(MsgType::Prompt, 7)
//!     .with_stage(1, 0, 2)
//!     .with_stage(2, 2, 4);
//!
//! let bytes = encode_header(&header);
//! assert_eq!(decode_header(&bytes).unwrap(), header);
//!
//! let frame = encode_frame(Envelope::new(header.clone(), vec![b'a'; 64]), &FrameLimits::default()).unwrap();
//! let mut decoder = FrameDecoder::new(FrameLimits::default());
//! decoder.extend_from_slice(&frame);
//! let envelope = decoder.next_frame().unwrap().unwrap().decode().unwrap();
//! assert_eq!(envelope.header, header);
//! ```

pub mod constants;
pub mod error;
pub mod frame;
pub mod header;

pub use constants::*;
pub use error::{DecodeError, DecodeResult, FrameError, FrameResult, FrameSection};
pub use frame::{encode_frame, FrameDecoder, FrameLimits, RawFrame};
pub use header::{decode_header, decode_header_prefix, encode_header, encode_header_into, encoded_len_for};
