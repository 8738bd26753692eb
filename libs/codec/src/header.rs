//! # Header Codec
//!
//! Binary layout of [`Header`], little-endian throughout:
//!
//! ```text
//! offset  size  field
//! 0       1     msg_type
//! 1       8     creation_time
//! 9       8     request_id
//! 17      4     stage_count
//! 21      12×N  stages: [stage_id u32][range_start u32][range_end u32]
//! ```
//!
//! Every read is preceded by a bounds check against the declared length, and
//! bytes beyond `21 + 12 × stage_count` are never touched.

use crate::constants::{PREAMBLE_SIZE, STAGE_RECORD_SIZE};
use crate::error::{DecodeError, DecodeResult};
use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};
use types::{Header, MsgType, Stage};

/// Encode a header into a fresh buffer
pub fn encode_header(header: &Header) -> Bytes {
    let mut buf = BytesMut::with_capacity(header.encoded_len());
    encode_header_into(header, &mut buf);
    buf.freeze()
}

/// Append the encoded header to an existing buffer
pub fn encode_header_into(header: &Header, buf: &mut impl BufMut) {
    buf.put_u8(header.msg_type().tag());
    buf.put_u64_le(header.creation_time());
    buf.put_u64_le(header.request_id());
    buf.put_u32_le(header.stage_count() as u32);
    for stage in header.stages() {
        buf.put_u32_le(stage.stage_id);
        buf.put_u32_le(stage.range_start);
        buf.put_u32_le(stage.range_end);
    }
}

/// Decode a header, ignoring any bytes after its declared end
pub fn decode_header(data: &[u8]) -> DecodeResult<Header> {
    decode_header_prefix(data).map(|(header, _)| header)
}

/// Decode a header and report how many bytes it occupied
pub fn decode_header_prefix(data: &[u8]) -> DecodeResult<(Header, usize)> {
    let preamble = data
        .get(..PREAMBLE_SIZE)
        .ok_or_else(|| DecodeError::truncated(PREAMBLE_SIZE, data.len()))?;

    let stage_count = LittleEndian::read_u32(&preamble[17..21]) as usize;
    let needed = encoded_len_for(stage_count)
        .ok_or_else(|| DecodeError::truncated(usize::MAX, data.len()))?;
    let stage_bytes = data
        .get(PREAMBLE_SIZE..needed)
        .ok_or_else(|| DecodeError::truncated(needed, data.len()))?;

    let tag = preamble[0];
    let msg_type = MsgType::try_from(tag).map_err(|_| DecodeError::UnknownType { tag })?;
    let creation_time = LittleEndian::read_u64(&preamble[1..9]);
    let request_id = LittleEndian::read_u64(&preamble[9..17]);

    let stages = stage_bytes
        .chunks_exact(STAGE_RECORD_SIZE)
        .map(|record| {
            Stage::new(
                LittleEndian::read_u32(&record[0..4]),
                LittleEndian::read_u32(&record[4..8]),
                LittleEndian::read_u32(&record[8..12]),
            )
        })
        .collect();

    Ok((
        Header::from_parts(msg_type, creation_time, request_id, stages),
        needed,
    ))
}

/// Encoded length for a header with `stage_count` stages, `None` on overflow
pub fn encoded_len_for(stage_count: usize) -> Option<usize> {
    stage_count
        .checked_mul(STAGE_RECORD_SIZE)
        .and_then(|stages| stages.checked_add(PREAMBLE_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        let mut header = Header::from_parts(MsgType::Prompt, 1_700_000_000_000_000_000, 7, Vec::new());
        header.add_stage(1, 0, 2);
        header.add_stage(2, 2, 4);
        header
    }

    #[test]
    fn test_prompt_route_roundtrip() {
        let header = sample();
        let encoded = encode_header(&header);
        assert_eq!(encoded.len(), 45);

        let decoded = decode_header(&encoded).unwrap();
        assert_eq!(decoded.request_id(), 7);
        assert_eq!(
            decoded.stages(),
            &[Stage::new(1, 0, 2), Stage::new(2, 2, 4)]
        );
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_byte_layout_is_little_endian() {
        let header = Header::from_parts(MsgType::Decode, 0x0102030405060708, 0x0A, vec![Stage::new(0x11, 0x22, 0x33)]);
        let encoded = encode_header(&header);

        assert_eq!(encoded[0], 1);
        assert_eq!(&encoded[1..9], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&encoded[9..17], &[0x0A, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&encoded[17..21], &[1, 0, 0, 0]);
        assert_eq!(&encoded[21..25], &[0x11, 0, 0, 0]);
        assert_eq!(&encoded[25..29], &[0x22, 0, 0, 0]);
        assert_eq!(&encoded[29..33], &[0x33, 0, 0, 0]);
    }

    #[test]
    fn test_empty_stage_list() {
        let header = Header::from_parts(MsgType::Terminate, 5, 9, Vec::new());
        let encoded = encode_header(&header);
        assert_eq!(encoded.len(), PREAMBLE_SIZE);
        assert_eq!(decode_header(&encoded).unwrap(), header);
    }

    #[test]
    fn test_truncated_preamble() {
        let encoded = encode_header(&sample());
        let err = decode_header(&encoded[..10]).unwrap_err();
        assert_eq!(err, DecodeError::truncated(PREAMBLE_SIZE, 10));
    }

    #[test]
    fn test_truncated_stage_list() {
        let encoded = encode_header(&sample());
        let err = decode_header(&encoded[..40]).unwrap_err();
        assert_eq!(err, DecodeError::truncated(45, 40));
    }

    #[test]
    fn test_unknown_type() {
        let mut encoded = encode_header(&sample()).to_vec();
        encoded[0] = 42;
        assert_eq!(
            decode_header(&encoded).unwrap_err(),
            DecodeError::UnknownType { tag: 42 }
        );
    }

    #[test]
    fn test_trailing_bytes_are_not_consumed() {
        let header = sample();
        let mut encoded = encode_header(&header).to_vec();
        encoded.extend_from_slice(&[0xFF; 32]);

        let (decoded, consumed) = decode_header_prefix(&encoded).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(consumed, 45);
    }

    #[test]
    fn test_huge_stage_count_does_not_allocate() {
        let mut encoded = encode_header(&sample()).to_vec();
        encoded[17..21].copy_from_slice(&u32::MAX.to_le_bytes());

        match decode_header(&encoded).unwrap_err() {
            DecodeError::Truncated { needed, available } => {
                assert!(needed > available);
                assert_eq!(available, 45);
            }
            other => panic!("Expected Truncated, got {other:?}"),
        }
    }
}
