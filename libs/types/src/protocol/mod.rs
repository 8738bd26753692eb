//! Protocol layer data types
//!
//! Plain data only; encoding rules live in the codec crate and socket
//! handling in the network crate.

pub mod message;
pub mod msg_type;

pub use message::*;
pub use msg_type::MsgType;
