//! Performance benchmarks for transfer framing.
//!
//! These benchmarks measure the hot path of a streaming export:
//! - Encoding a `data` event with its chunk into a frame
//! - Decoding it back on the controller side
//! - Compressible versus incompressible chunks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use protocol::{Envelope, Frame, FrameBuffer, FrameCodec, Message, TransferEvent};

const SESSION: &str = "6f1c2a5e-93b4-4d0e-8c1a-2b7f9e4d3c11";

fn data_event(chunk: Vec<u8>) -> Envelope {
    Envelope::push(Message::Transfer(TransferEvent::data(SESSION))).with_attachment(chunk)
}

/// Incompressible bytes from a small xorshift generator.
fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

/// Benchmark encoding a data event into a frame.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_data_event");

    for size in [4 * 1024, 64 * 1024, 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));

        let zeros = data_event(vec![0u8; size]);
        let random = data_event(noise(size));

        group.bench_with_input(BenchmarkId::new("compressible", size), &zeros, |b, env| {
            let codec = FrameCodec::new();
            b.iter(|| {
                let payload = black_box(env).to_msgpack().unwrap();
                codec.encode(&Frame::new(payload)).unwrap()
            });
        });

        group.bench_with_input(BenchmarkId::new("incompressible", size), &random, |b, env| {
            let codec = FrameCodec::new();
            b.iter(|| {
                let payload = black_box(env).to_msgpack().unwrap();
                codec.encode(&Frame::new(payload)).unwrap()
            });
        });

        group.bench_with_input(BenchmarkId::new("uncompressed", size), &random, |b, env| {
            let codec = FrameCodec::without_compression();
            b.iter(|| {
                let payload = black_box(env).to_msgpack().unwrap();
                codec.encode(&Frame::new(payload)).unwrap()
            });
        });
    }

    group.finish();
}

/// Benchmark decoding a stream of framed data events.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_data_events");

    let codec = FrameCodec::new();
    let chunk = 64 * 1024;
    let count = 16;
    let mut stream = Vec::new();
    for _ in 0..count {
        let payload = data_event(noise(chunk)).to_msgpack().unwrap();
        stream.extend(codec.encode(&Frame::new(payload)).unwrap());
    }

    group.throughput(Throughput::Bytes((chunk * count) as u64));
    group.bench_function("frame_buffer_16x64KB", |b| {
        b.iter(|| {
            let mut frames = FrameBuffer::new(FrameCodec::new());
            frames.extend(black_box(&stream));
            let mut total = 0usize;
            while let Some(frame) = frames.next_frame().unwrap() {
                let envelope = Envelope::from_msgpack(&frame.payload).unwrap();
                total += envelope.attachment.map_or(0, |a| a.len());
            }
            total
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
