//! Multiplexing core benchmarks
//!
//! This benchmark suite measures:
//! - Exchange registration, completion and retrieval
//! - Response assembly from fragmented frame events
//! - Request header encoding (HPACK + HEADERS/CONTINUATION framing)
//!
//! Run with: cargo bench --bench exchange_table

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use h2mux::http::h2::{
    codec::FrameCodec, CorrelationKey, FrameHandler, Multiplexer, PutRequest, DEFAULT_MAX_FRAME_SIZE,
};
use h2mux::http::Headers;
use std::time::Duration;

fn status_block() -> Headers {
    let mut headers = Headers::new();
    headers.insert(":status", "200");
    headers.insert("server", "bench");
    headers
}

// ========== Exchange Table Benchmarks ==========

fn bench_exchange_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("exchange_round_trip");

    for live in [0usize, 100, 1000] {
        let mux = Multiplexer::new();
        mux.on_settings_received();
        mux.on_settings_acknowledged();

        // Background exchanges that stay pending for the whole run
        let _pending: Vec<_> = (0..live)
            .map(|i| {
                let key = CorrelationKey::new("idle", format!("obj{}", i));
                let summary = request(&key, 0).summary();
                mux.exchanges().register(key, summary).unwrap()
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("live_exchanges", live), &live, |b, _| {
            b.iter(|| {
                let key = CorrelationKey::new("bucket", "obj");
                let summary = request(&key, 0).summary();
                let handle = mux.exchanges().register(key, summary).unwrap();

                mux.on_stream_opened(1, handle.exchange().clone());
                mux.on_headers(1, status_block(), false);
                mux.on_data(1, Bytes::new(), true);

                black_box(handle.wait(Duration::from_secs(1)).unwrap());
            });
        });
    }

    group.finish();
}

// ========== Response Assembly Benchmarks ==========

fn bench_fragmented_body(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmented_body");
    let chunk = Bytes::from(vec![0u8; 16384]);

    for chunks in [1usize, 16, 64] {
        group.throughput(Throughput::Bytes((chunks * chunk.len()) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunks), &chunks, |b, &chunks| {
            let mux = Multiplexer::new();
            b.iter(|| {
                let key = CorrelationKey::new("bucket", "large");
                let summary = request(&key, 0).summary();
                let handle = mux.exchanges().register(key, summary).unwrap();

                mux.on_stream_opened(1, handle.exchange().clone());
                mux.on_headers(1, status_block(), false);
                for _ in 0..chunks {
                    mux.on_data(1, chunk.clone(), false);
                }
                mux.on_data(1, Bytes::new(), true);

                black_box(handle.wait(Duration::from_secs(1)).unwrap());
            });
        });
    }

    group.finish();
}

// ========== Request Encoding Benchmarks ==========

fn bench_request_headers(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_headers");
    let key = CorrelationKey::new("dummy-bucket", "dummy-key");
    let req = request(&key, 1024);

    group.bench_function("hpack_encode_fresh", |b| {
        b.iter(|| {
            let mut encoder = hpack::Encoder::new();
            let block = encoder.encode(req.headers().as_hpack_pairs());
            black_box(FrameCodec::encode_header_block(
                1,
                Bytes::from(block),
                false,
                DEFAULT_MAX_FRAME_SIZE as usize,
            ));
        });
    });

    group.bench_function("hpack_encode_warm", |b| {
        let mut encoder = hpack::Encoder::new();
        b.iter(|| {
            let block = encoder.encode(req.headers().as_hpack_pairs());
            black_box(block);
        });
    });

    group.finish();
}

fn request(key: &CorrelationKey, len: usize) -> PutRequest {
    PutRequest::new(
        key.clone(),
        "localhost:9021",
        "https",
        131_072,
        Bytes::from(vec![0u8; len]),
        len,
    )
    .unwrap()
}

criterion_group!(
    benches,
    bench_exchange_round_trip,
    bench_fragmented_body,
    bench_request_headers
);
criterion_main!(benches);
