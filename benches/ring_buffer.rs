//! Criterion benchmarks for the ring drain hot paths.
//!
//! A 1 ms producer period with 256-sample blocks needs 256k samples/sec; these numbers
//! show how much headroom the consumer has at each stage.
//!
//! Key metrics:
//! - Engine drain throughput (samples/sec) across block sizes
//! - Raw slot reads from the shared ring
//! - Chunk appends to the raw file sink
//!
//! Run with: cargo bench --bench ring_buffer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ring_ingest::data::{FileSink, NullSink, Sink};
use ring_ingest::engine::{EngineConfig, IngestionEngine, PollBackoff};
use ring_ingest::ring::{RingGeometry, RingSource, SharedRing};
use ring_ingest::sim::StepProducer;

const TARGET_SAMPLES: u32 = 64 * 1024;

/// Full engine runs against a producer that always has one block ready.
///
/// Covers continuity checking, chunk assembly and flushing, with the sink cost removed.
fn engine_drain_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_drain");
    group.throughput(Throughput::Elements(u64::from(TARGET_SAMPLES)));

    for block_size in [64u32, 256, 1024] {
        group.bench_with_input(
            BenchmarkId::new("block_size", block_size),
            &block_size,
            |b, &block_size| {
                b.iter(|| {
                    let producer =
                        StepProducer::new(RingGeometry::default(), block_size).every_poll(1);
                    let config = EngineConfig::new(block_size, 4096, TARGET_SAMPLES)
                        .with_backoff(PollBackoff::Spin);
                    let mut engine = IngestionEngine::new(&producer, NullSink, config).unwrap();
                    black_box(engine.run().unwrap());
                });
            },
        );
    }

    group.finish();
}

/// Slot reads from the atomic ring used by the software producer.
fn shared_ring_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("shared_ring_read");

    let geometry = RingGeometry::default();
    let ring = SharedRing::new(geometry);
    for n in 0..geometry.capacity() {
        ring.write_sample(n, n);
    }

    group.throughput(Throughput::Elements(u64::from(geometry.capacity())));
    group.bench_function("full_lap", |b| {
        b.iter(|| {
            let mut acc = 0u32;
            for n in 0..geometry.capacity() {
                acc = acc.wrapping_add(ring.read_sample(black_box(n)));
            }
            black_box(acc)
        });
    });

    group.finish();
}

/// Chunk appends to the little-endian raw file sink.
fn file_sink_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_sink_append");

    for chunk in [1024usize, 4096, 16 * 1024] {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(temp_dir.path().join("bench.bin")).unwrap();
        let data: Vec<u32> = (0..chunk as u32).collect();

        group.throughput(Throughput::Bytes((chunk * 4) as u64));
        group.bench_with_input(BenchmarkId::new("chunk", chunk), &chunk, |b, _| {
            b.iter(|| {
                sink.append(black_box(&data)).unwrap();
            });
        });
        sink.finish().unwrap();
    }

    group.finish();
}

criterion_group!(
    benches,
    engine_drain_throughput,
    shared_ring_read,
    file_sink_append
);
criterion_main!(benches);
