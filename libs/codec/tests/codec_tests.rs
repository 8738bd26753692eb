//! # Codec Integration Tests
//!
//! Exercises the public codec API the way the transport uses it:
//! - header round trip over arbitrary headers
//! - truncation safety on every proper prefix
//! - framing across arbitrary read boundaries

use codec::{
    decode_header, decode_header_prefix, encode_frame, encode_header, DecodeError, FrameDecoder,
    FrameLimits, PREAMBLE_SIZE,
};
use proptest::prelude::*;
use types::{Envelope, Header, MsgType, Stage};

fn msg_type_strategy() -> impl Strategy<Value = MsgType> {
    prop_oneof![
        Just(MsgType::Prompt),
        Just(MsgType::Decode),
        Just(MsgType::Terminate),
    ]
}

fn stage_strategy() -> impl Strategy<Value = Stage> {
    (any::<u32>(), any::<u32>(), any::<u32>()).prop_map(|(id, start, end)| Stage::new(id, start, end))
}

prop_compose! {
    fn header_strategy()(
        msg_type in msg_type_strategy(),
        creation_time in any::<u64>(),
        request_id in any::<u64>(),
        stages in prop::collection::vec(stage_strategy(), 0..16),
    ) -> Header {
        Header::from_parts(msg_type, creation_time, request_id, stages)
    }
}

proptest! {
    #[test]
    fn prop_header_roundtrip(header in header_strategy()) {
        let encoded = encode_header(&header);
        prop_assert_eq!(encoded.len(), header.encoded_len());
        prop_assert_eq!(decode_header(&encoded).unwrap(), header);
    }

    #[test]
    fn prop_every_prefix_is_truncated(header in header_strategy()) {
        let encoded = encode_header(&header);
        for cut in 0..encoded.len() {
            match decode_header(&encoded[..cut]) {
                Err(DecodeError::Truncated { needed, available }) => {
                    prop_assert_eq!(available, cut);
                    prop_assert!(needed > cut);
                }
                other => prop_assert!(false, "prefix {} decoded as {:?}", cut, other),
            }
        }
    }

    #[test]
    fn prop_garbage_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
        if let Ok((header, consumed)) = decode_header_prefix(&data) {
            prop_assert!(consumed <= data.len());
            prop_assert_eq!(consumed, header.encoded_len());
        }
    }

    #[test]
    fn prop_frames_survive_arbitrary_chunking(
        headers in prop::collection::vec(header_strategy(), 1..6),
        chunk in 1usize..97,
    ) {
        let limits = FrameLimits::default();
        let mut stream = Vec::new();
        let mut expected = Vec::new();
        for (i, header) in headers.into_iter().enumerate() {
            let envelope = Envelope::new(header, vec![i as u8; i * 31]);
            stream.extend_from_slice(&encode_frame(envelope.clone(), &limits).unwrap());
            expected.push(envelope);
        }

        let mut decoder = FrameDecoder::new(limits);
        let mut received = Vec::new();
        for piece in stream.chunks(chunk) {
            decoder.extend_from_slice(piece);
            while let Some(raw) = decoder.next_frame().unwrap() {
                received.push(raw.decode().unwrap());
            }
        }

        prop_assert_eq!(received, expected);
        prop_assert!(decoder.is_empty());
    }
}

#[test]
fn test_prompt_scenario() {
    let mut header = Header::new(MsgType::Prompt, 7);
    header.add_stage(1, 0, 2);
    header.add_stage(2, 2, 4);

    let encoded = encode_header(&header);
    assert_eq!(encoded.len(), PREAMBLE_SIZE + 2 * 12);

    let decoded = decode_header(&encoded).unwrap();
    assert_eq!(decoded.msg_type(), MsgType::Prompt);
    assert_eq!(decoded.request_id(), 7);
    assert_eq!(decoded.creation_time(), header.creation_time());
    assert_eq!(
        decoded.stages(),
        &[Stage::new(1, 0, 2), Stage::new(2, 2, 4)]
    );
}

#[test]
fn test_sixteen_kib_payload_frame() {
    let header = Header::new(MsgType::Prompt, 7)
        .with_stage(1, 0, 2)
        .with_stage(2, 2, 4);
    let envelope = Envelope::new(header, vec![b'a'; 16 * 1024]);
    let frame = encode_frame(envelope.clone(), &FrameLimits::default()).unwrap();

    let mut decoder = FrameDecoder::new(FrameLimits::default());
    decoder.extend_from_slice(&frame);
    let received = decoder.next_frame().unwrap().unwrap().decode().unwrap();

    assert_eq!(received.payload_len(), 16 * 1024);
    assert!(received.payload.iter().all(|b| *b == b'a'));
    assert_eq!(received, envelope);
}
