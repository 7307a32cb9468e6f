//! Codec benchmarks for tether-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tether_protocol::{codec, Command, Envelope, Op, Params};

fn direct_message(len: usize) -> Envelope {
    Envelope::new(Command::Direct, "alice", "bench-app").with_params(
        Params::new()
            .with_msg("x".repeat(len))
            .with_to_peer_ids(vec!["bob".into(), "carol".into()]),
    )
}

fn bench_encode_small(c: &mut Criterion) {
    let envelope = direct_message(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("direct_64B", |b| {
        b.iter(|| codec::encode(black_box(&envelope)))
    });
    group.finish();
}

fn bench_decode_reply(c: &mut Criterion) {
    let frame = r#"{"cmd":"session","op":"opened","onlineSessionPeerIds":["bob","carol","dave"]}"#;

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("session_opened", |b| {
        b.iter(|| codec::decode(black_box(frame)))
    });
    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let envelope = Envelope::new(Command::Room, "alice", "bench-app")
        .with_op(Some(Op::Invite))
        .with_params(Params::new().with_room_id("lobby"));

    c.bench_function("delivery_classify", |b| {
        b.iter(|| black_box(&envelope).delivery())
    });
}

criterion_group!(benches, bench_encode_small, bench_decode_reply, bench_classify);
criterion_main!(benches);
