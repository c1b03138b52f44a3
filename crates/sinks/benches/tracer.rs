//! Tracer benchmark suite
//!
//! Run with: `cargo bench -p pstrace-sinks --bench tracer`
//!
//! # What we measure
//!
//! - Producer hot path (push + coalesced wake) under no contention
//! - Batch framing for the remote wire
//! - Per-event encoders used by file tracers
//! - End-to-end file tracer throughput including the write loop

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use pstrace_sinks::{Delimited, EventEncoder, FileTracer, JsonLines, TraceBuffer, encode_batch};
use serde::Serialize;
use tempfile::TempDir;
use tokio::runtime::Runtime;

#[derive(Clone, PartialEq, prost::Message, Serialize)]
struct BenchEvent {
    #[prost(string, tag = "1")]
    topic: String,
    #[prost(bytes = "vec", tag = "2")]
    payload: Vec<u8>,
    #[prost(uint64, tag = "3")]
    seq: u64,
}

fn event(seq: u64, payload_size: usize) -> BenchEvent {
    BenchEvent {
        topic: "/bench/topic".into(),
        payload: vec![0x42; payload_size],
        seq,
    }
}

// =============================================================================
// Buffer Benchmarks
// =============================================================================

fn bench_buffer_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracer_buffer");
    group.throughput(Throughput::Elements(1));

    // Nobody drains the wake channel, so every push after the first takes the
    // coalesced path.
    group.bench_function("push_coalesced", |b| {
        let (buffer, _wakeup) = TraceBuffer::new();
        let mut scratch = Vec::with_capacity(1024);
        b.iter(|| {
            buffer.push(black_box(7u64));
            if buffer.len() >= 1024 {
                buffer.swap(&mut scratch);
            }
        });
    });

    group.finish();
}

// =============================================================================
// Encoding Benchmarks
// =============================================================================

fn bench_encode_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracer_encode_batch");

    for count in [10usize, 100, 1000] {
        let events: Vec<_> = (0..count as u64).map(|i| event(i, 128)).collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &events, |b, events| {
            let mut out = Vec::with_capacity(count * 160);
            b.iter(|| {
                out.clear();
                encode_batch(black_box(events), &mut out).unwrap();
                black_box(out.len())
            });
        });
    }

    group.finish();
}

fn bench_encoders(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracer_encoder");
    group.throughput(Throughput::Elements(1));
    let sample = event(42, 128);

    group.bench_function("json_lines", |b| {
        let mut out = Vec::with_capacity(512);
        b.iter(|| {
            out.clear();
            JsonLines.encode(black_box(&sample), &mut out).unwrap();
        });
    });

    group.bench_function("delimited", |b| {
        let mut out = Vec::with_capacity(256);
        b.iter(|| {
            out.clear();
            Delimited.encode(black_box(&sample), &mut out).unwrap();
        });
    });

    group.finish();
}

// =============================================================================
// File Tracer Benchmarks
// =============================================================================

fn bench_file_tracer(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("tracer_file");
    group.sample_size(20);

    const EVENTS: u64 = 10_000;
    group.throughput(Throughput::Elements(EVENTS));

    let dir = TempDir::new().unwrap();
    let events: Arc<Vec<_>> = Arc::new((0..EVENTS).map(|i| event(i, 128)).collect());

    group.bench_function("protobuf_10k", |b| {
        b.iter(|| {
            rt.block_on(async {
                let tracer = FileTracer::create_protobuf(dir.path().join("bench.pb")).unwrap();
                for ev in events.iter() {
                    tracer.trace(ev.clone());
                }
                black_box(tracer.shutdown().await)
            })
        });
    });

    group.bench_function("json_10k", |b| {
        b.iter(|| {
            rt.block_on(async {
                let tracer = FileTracer::create_json(dir.path().join("bench.json")).unwrap();
                for ev in events.iter() {
                    tracer.trace(ev.clone());
                }
                black_box(tracer.shutdown().await)
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_buffer_push,
    bench_encode_batch,
    bench_encoders,
    bench_file_tracer
);
criterion_main!(benches);
