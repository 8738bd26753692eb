//! Message kinds carried in the first header byte

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// Message type tag
///
/// Closed set: a tag outside this enumeration is a decoding error, never a
/// default. Downstream stages pick the payload interpretation from it.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MsgType {
    /// Prompt phase: the whole input sequence travels through the pipeline
    Prompt = 0,

    /// Decode phase: one incremental step of an in-flight request
    Decode = 1,

    /// Request teardown; stages release per-request state
    Terminate = 2,
}

impl MsgType {
    /// Wire tag for this type
    pub fn tag(self) -> u8 {
        self.into()
    }

    /// Short lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            MsgType::Prompt => "prompt",
            MsgType::Decode => "decode",
            MsgType::Terminate => "terminate",
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        for ty in [MsgType::Prompt, MsgType::Decode, MsgType::Terminate] {
            assert_eq!(MsgType::try_from(ty.tag()).unwrap(), ty);
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(MsgType::try_from(3u8).is_err());
        assert!(MsgType::try_from(0xFFu8).is_err());
    }

    #[test]
    fn test_prompt_is_zero() {
        assert_eq!(MsgType::Prompt.tag(), 0);
        assert_eq!(MsgType::Prompt.to_string(), "prompt");
    }
}
