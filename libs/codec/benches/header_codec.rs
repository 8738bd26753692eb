//! Header and frame encoding throughput
//!
//! The happy path should stay allocation-light: one buffer per encode,
//! zero copies of the payload on decode.

use codec::{decode_header, encode_frame, encode_header, FrameDecoder, FrameLimits};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use types::{Envelope, Header, MsgType};

fn route(stages: u32) -> Header {
    let mut header = Header::from_parts(MsgType::Prompt, 1_700_000_000_000_000_000, 7, Vec::new());
    for i in 0..stages {
        header.add_stage(i + 1, i * 2, i * 2 + 2);
    }
    header
}

fn bench_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("header");
    for stages in [0u32, 2, 16, 128] {
        let header = route(stages);
        let encoded = encode_header(&header);
        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", stages), &header, |b, h| {
            b.iter(|| encode_header(black_box(h)))
        });
        group.bench_with_input(BenchmarkId::new("decode", stages), &encoded, |b, bytes| {
            b.iter(|| decode_header(black_box(bytes)).unwrap())
        });
    }
    group.finish();
}

fn bench_frame(c: &mut Criterion) {
    let limits = FrameLimits::default();
    let envelope = Envelope::new(route(2), vec![b'a'; 16 * 1024]);
    let frame = encode_frame(envelope.clone(), &limits).unwrap();

    let mut group = c.benchmark_group("frame");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("encode_16k", |b| {
        b.iter(|| encode_frame(black_box(envelope.clone()), &limits).unwrap())
    });
    group.bench_function("split_and_decode_16k", |b| {
        let mut decoder = FrameDecoder::new(limits);
        b.iter(|| {
            decoder.extend_from_slice(black_box(&frame));
            decoder.next_frame().unwrap().unwrap().decode().unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_header, bench_frame);
criterion_main!(benches);
