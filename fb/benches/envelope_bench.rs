//! Benchmark: envelope encode/decode and rendering
//!
//! Every hop on the bus encodes or decodes one envelope, and TRACE logging renders it.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fleetbus::{Envelope, Kwargs, Params};
use serde_json::json;

fn sample(args: usize) -> Envelope {
    let mut kwargs = Kwargs::new();
    kwargs.insert("scale".to_string(), json!(2.5));
    let params = Params {
        args: (0..args).map(|i| json!(i)).collect(),
        kwargs,
    };
    let mut envelope = Envelope::request("worker1", "add", params);
    envelope.origin_server = Some("main".to_string());
    envelope.id = Some(42);
    for _ in 0..4 {
        envelope.stamp();
    }
    envelope
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_codec");

    for args in [2usize, 64, 1024] {
        let envelope = sample(args);
        let encoded = envelope.encode().unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", args), &envelope, |b, env| {
            b.iter(|| black_box(env.encode().unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("decode", args), &encoded, |b, text| {
            b.iter(|| black_box(Envelope::decode(text).unwrap()));
        });
    }

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_render");

    let plain = sample(64);
    group.bench_function("plain", |b| {
        b.iter(|| black_box(plain.to_string()));
    });

    let mut redacted = sample(64);
    redacted.redact_args = true;
    redacted.redact_result = true;
    group.bench_function("redacted", |b| {
        b.iter(|| black_box(redacted.to_string()));
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_render);
criterion_main!(benches);
