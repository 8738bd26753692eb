//! # Message Structure
//!
//! [`Header`] carries routing and accounting metadata, [`Envelope`] pairs it
//! with the opaque payload for one frame.
//!
//! ## Message Flow
//!
//! 1. **Construction**: the producer creates a header and appends the route
//! 2. **Wrapping**: header and payload are moved into an envelope
//! 3. **Transport**: the envelope is consumed by the poll server's send path
//! 4. **Delivery**: the receiving side rebuilds an envelope per decoded frame

pub mod envelope;
pub mod header;

pub use envelope::Envelope;
pub use header::{precise_timestamp_ns, Header, Stage};
