//! Ring allocator benchmarks.

use cmdring::ring::RingAllocator;
use cmdring::stream::CommandStream;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_steady_state_alloc_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("steady_state_alloc_release");

    for record_size in [16usize, 64, 256, 1024] {
        let mut ring = RingAllocator::with_capacity(64 * 1024).unwrap();
        group.throughput(Throughput::Bytes(record_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(record_size),
            &record_size,
            |b, &size| {
                b.iter(|| {
                    let bytes = ring.allocate(size);
                    std::hint::black_box(bytes.as_ptr());
                    let cp = ring.release_checkpoint();
                    ring.release(cp);
                });
            },
        );
    }

    group.finish();
}

fn bench_wraparound_heavy(c: &mut Criterion) {
    let mut group = c.benchmark_group("wraparound_heavy");

    // One frame in flight forces constant fragment turnover.
    let mut ring = RingAllocator::with_capacity(4096).unwrap();
    let mut pending = None;

    group.throughput(Throughput::Elements(1));
    group.bench_function("one_frame_in_flight", |b| {
        b.iter(|| {
            ring.allocate(1500);
            let cp = ring.release_checkpoint();
            if let Some(previous) = pending.replace(cp) {
                ring.release(previous);
            }
        });
    });

    group.finish();
}

fn bench_stream_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_push");

    let payload = [0xA5u8; 60];
    let mut stream = CommandStream::new(64 * 1024).unwrap();
    let mut pending = None;

    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("push_and_rotate_blocks", |b| {
        let mut id = 0u16;
        b.iter(|| {
            id = id.wrapping_add(1).max(1);
            stream.push(id, &payload).unwrap();
            let cp = stream.finish_block();
            if let Some(previous) = pending.replace(cp) {
                stream.release(previous);
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_steady_state_alloc_release,
    bench_wraparound_heavy,
    bench_stream_push
);
criterion_main!(benches);
