//! # Staged Relay Types
//!
//! Data model shared by every process on a staged pipeline.
//!
//! ## Quick Start
//!
//! ```rust
//! use types::{Envelope, Header, MsgType};
//!
//! let mut header = Header::new(MsgType::Prompt, 7);
//! header.add_stage(1, 0, 2);
//! header.add_stage(2, 2, 4);
//!
//! let envelope = Envelope::new(header, vec![b'a'; 16 * 1024]);
//! assert_eq!(envelope.header.stages().len(), 2);
//! ```
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → libs/codec → libs/network
//!     ↑            ↓             ↓
//! Pure Data   Wire Layout    Poll Server
//! Header      encode/decode  Endpoints
//! ```

pub mod protocol;

pub use protocol::{precise_timestamp_ns, Envelope, Header, MsgType, Stage};
