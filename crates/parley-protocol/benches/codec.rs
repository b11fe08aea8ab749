//! Codec benchmarks for parley-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parley_protocol::{codec, InboundEvent, RawEvent};
use serde_json::json;

fn new_message(body_len: usize) -> RawEvent {
    RawEvent::new(
        "new_message",
        json!({
            "_id": "65f0c0ffee00000000000001",
            "username": "alice",
            "message": "x".repeat(body_len),
            "timestamp": "2024-03-01T10:15:30.123456"
        }),
    )
}

fn bench_decode_json(c: &mut Criterion) {
    let text = codec::encode_json(&new_message(64)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("json_64B", |b| b.iter(|| codec::decode_json(black_box(&text))));
    group.finish();
}

fn bench_decode_msgpack(c: &mut Criterion) {
    let data = codec::encode_msgpack(&new_message(64)).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::decode_msgpack(black_box(&data)))
    });
    group.finish();
}

fn bench_interpret(c: &mut Criterion) {
    let raw = new_message(256);

    c.bench_function("interpret_new_message_256B", |b| {
        b.iter(|| InboundEvent::from_raw(black_box(&raw)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_decode_json,
    bench_decode_msgpack,
    bench_interpret
);
criterion_main!(benches);
