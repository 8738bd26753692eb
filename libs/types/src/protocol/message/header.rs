//! Message Header Implementation
//!
//! The header tags every frame with its type, creation time, owning request
//! and the ordered list of pipeline stages the request traverses.

use crate::protocol::msg_type::MsgType;
use std::fmt;

/// One pipeline hop: the stage identity plus the contiguous index range
/// (`[range_start, range_end)`, e.g. a layer span) it is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stage {
    pub stage_id: u32,
    pub range_start: u32,
    pub range_end: u32,
}

impl Stage {
    pub fn new(stage_id: u32, range_start: u32, range_end: u32) -> Self {
        Self {
            stage_id,
            range_start,
            range_end,
        }
    }

    /// Number of indices covered by this stage
    pub fn span(&self) -> u32 {
        self.range_end.saturating_sub(self.range_start)
    }

    /// Whether `index` falls inside this stage's range
    pub fn covers(&self, index: u32) -> bool {
        index >= self.range_start && index < self.range_end
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{})", self.stage_id, self.range_start, self.range_end)
    }
}

/// Message Header
///
/// Fields are private so the stage list can only grow through
/// [`Header::add_stage`]. Order of `stages` is traversal order and is never
/// rewritten after insertion. Sending moves the header into the transport,
/// which makes it immutable from the caller's point of view.
///
/// ```text
/// ┌──────────┬───────────────┬────────────┬─────────────┬──────────────────┐
/// │ msg_type │ creation_time │ request_id │ stage_count │ stages × 12 B    │
/// │ u8       │ u64           │ u64        │ u32         │ (id, start, end) │
/// └──────────┴───────────────┴────────────┴─────────────┴──────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    msg_type: MsgType,
    creation_time: u64,
    request_id: u64,
    stages: Vec<Stage>,
}

impl Header {
    /// Size of the fixed preamble in bytes (type, timestamp, request id, stage count)
    pub const PREAMBLE_SIZE: usize = 1 + 8 + 8 + 4;

    /// Size of one encoded stage record in bytes
    pub const STAGE_RECORD_SIZE: usize = 4 + 4 + 4;

    /// Create a header stamped with the current wall-clock time
    pub fn new(msg_type: MsgType, request_id: u64) -> Self {
        Self::from_parts(msg_type, precise_timestamp_ns(), request_id, Vec::new())
    }

    /// Rebuild a header from already-known fields (decoders, tests)
    pub fn from_parts(
        msg_type: MsgType,
        creation_time: u64,
        request_id: u64,
        stages: Vec<Stage>,
    ) -> Self {
        Self {
            msg_type,
            creation_time,
            request_id,
            stages,
        }
    }

    /// Append a stage to the route
    pub fn add_stage(&mut self, stage_id: u32, range_start: u32, range_end: u32) {
        self.stages.push(Stage::new(stage_id, range_start, range_end));
    }

    /// Builder-style variant of [`Header::add_stage`]
    pub fn with_stage(mut self, stage_id: u32, range_start: u32, range_end: u32) -> Self {
        self.add_stage(stage_id, range_start, range_end);
        self
    }

    pub fn msg_type(&self) -> MsgType {
        self.msg_type
    }

    /// Creation timestamp in nanoseconds since the Unix epoch
    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Encoded size of this header on the wire
    pub fn encoded_len(&self) -> usize {
        Self::PREAMBLE_SIZE + self.stages.len() * Self::STAGE_RECORD_SIZE
    }

    /// Position of the stage with the given id, if the route contains it
    pub fn stage_position(&self, stage_id: u32) -> Option<usize> {
        self.stages.iter().position(|s| s.stage_id == stage_id)
    }

    /// Get age of this message in nanoseconds
    pub fn age_ns(&self) -> u64 {
        precise_timestamp_ns().saturating_sub(self.creation_time)
    }

    /// Check if this message is older than the given duration
    pub fn is_older_than(&self, max_age_ns: u64) -> bool {
        self.age_ns() > max_age_ns
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} req={} route=[", self.msg_type, self.request_id)?;
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", stage)?;
        }
        f.write_str("]")
    }
}

/// Get precise system timestamp in nanoseconds since the Unix epoch
///
/// A clock set before the epoch yields 0 rather than failing; callers only
/// use the value for latency accounting.
pub fn precise_timestamp_ns() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_creation() {
        let header = Header::new(MsgType::Prompt, 7);

        assert_eq!(header.msg_type(), MsgType::Prompt);
        assert_eq!(header.request_id(), 7);
        assert!(header.creation_time() > 0);
        assert!(header.stages().is_empty());
        assert_eq!(header.encoded_len(), Header::PREAMBLE_SIZE);
    }

    #[test]
    fn test_add_stage_preserves_call_order() {
        let mut header = Header::new(MsgType::Decode, 1);
        let inputs = [(5, 0, 3), (2, 3, 6), (9, 6, 8), (1, 8, 10)];
        for (id, start, end) in inputs {
            header.add_stage(id, start, end);
        }

        assert_eq!(header.stage_count(), inputs.len());
        let ids: Vec<u32> = header.stages().iter().map(|s| s.stage_id).collect();
        assert_eq!(ids, vec![5, 2, 9, 1]);
        assert_eq!(header.stage_position(9), Some(2));
        assert_eq!(header.stage_position(42), None);
    }

    #[test]
    fn test_encoded_len_counts_stages() {
        let header = Header::new(MsgType::Prompt, 7)
            .with_stage(1, 0, 2)
            .with_stage(2, 2, 4);
        assert_eq!(header.encoded_len(), 21 + 2 * 12);
    }

    #[test]
    fn test_stage_range() {
        let stage = Stage::new(3, 4, 8);
        assert_eq!(stage.span(), 4);
        assert!(stage.covers(4));
        assert!(stage.covers(7));
        assert!(!stage.covers(8));

        let inverted = Stage::new(3, 8, 4);
        assert_eq!(inverted.span(), 0);
    }

    #[test]
    fn test_age_saturates() {
        let header = Header::from_parts(MsgType::Prompt, 0, 1, Vec::new());
        assert!(header.is_older_than(1));

        let future = Header::from_parts(MsgType::Prompt, u64::MAX, 1, Vec::new());
        assert_eq!(future.age_ns(), 0);
    }

    #[test]
    fn test_display() {
        let header = Header::from_parts(MsgType::Prompt, 0, 7, vec![Stage::new(1, 0, 2)]);
        assert_eq!(header.to_string(), "prompt req=7 route=[1[0..2)]");
    }
}
