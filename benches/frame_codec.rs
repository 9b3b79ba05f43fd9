/// Benchmarks for the Socket.IO frame codec on the reader and writer hot paths.
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use socketio_client::protocol::Frame;

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame/decode");

    let frames = [
        ("pong", "3"),
        ("event", r#"42["message",{"text":"hello","room":"general"}]"#),
        (
            "event_with_namespace_and_ack",
            r#"42/chat,17["message",{"text":"hello","room":"general"}]"#,
        ),
        ("ack", r#"43/chat,17[{"ok":true}]"#),
        (
            "handshake",
            r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":5000}"#,
        ),
    ];

    for (name, text) in frames {
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), text, |b, text| {
            b.iter(|| Frame::decode(std::hint::black_box(*text)).expect("Decoding should succeed"));
        });
    }

    group.finish();
}

fn bench_event_parts(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame/event_parts");

    let frame = Frame::decode(r#"42["update",{"id":1,"values":[1,2,3,4,5,6,7,8]}]"#)
        .expect("Decoding should succeed");
    group.bench_function("single_argument", |b| {
        b.iter(|| {
            std::hint::black_box(&frame)
                .event_parts()
                .expect("Event should split")
        });
    });

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame/encode");

    let data = json!({"text": "hello", "room": "general"});
    group.bench_function("event", |b| {
        b.iter(|| Frame::event("/chat", "message", std::hint::black_box(&data), None).encode());
    });

    let ping = Frame::ping();
    group.bench_function("ping", |b| {
        b.iter(|| std::hint::black_box(&ping).encode());
    });

    group.finish();
}

criterion_group!(frame_benches, bench_decode, bench_event_parts, bench_encode);
criterion_main!(frame_benches);
