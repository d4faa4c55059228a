//! GC Performance Benchmarks
//!
//! Measures collection pause times and allocation throughput.
//!
//! Run with: `cargo bench -p choco-gc`

use choco_gc::{BlockAllocator, Collector, HeapConfig, Memory, Pointer, Tag};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

const HEAP_BYTES: u32 = 1024 * 1024;

fn create_collector() -> Collector<BlockAllocator<Vec<u8>>> {
    let config = HeapConfig::new(1024, 1024 + HEAP_BYTES);
    let memory = vec![0u8; (1024 + HEAP_BYTES + HEAP_BYTES / 2) as usize];
    Collector::new(BlockAllocator::new(memory, config).unwrap())
}

/// Benchmark GC pause time for various heap sizes
fn gc_pause_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("gc_pause");

    for num_objects in [100u32, 1000, 5000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::new("objects", num_objects),
            num_objects,
            |b, &n| {
                b.iter_custom(|iters| {
                    let mut total_duration = std::time::Duration::ZERO;

                    for _ in 0..iters {
                        let mut gc = create_collector();
                        gc.roots_mut().push_frame();

                        // Keep even-indexed objects alive, the rest become garbage
                        for i in 0..n {
                            let ptr = gc.gcalloc(Tag::CLASS, 16).unwrap();
                            if i % 2 == 0 {
                                gc.roots_mut().add_local(i, ptr).unwrap();
                            }
                        }

                        let start = std::time::Instant::now();
                        black_box(gc.collect().unwrap());
                        total_duration += start.elapsed();
                    }

                    total_duration
                });
            },
        );
    }

    group.finish();
}

/// Benchmark marking through a long linked list
fn deep_graph_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("gc_deep_graph");

    group.bench_function("ref_chain_10000", |b| {
        b.iter_custom(|iters| {
            let mut total_duration = std::time::Duration::ZERO;

            for _ in 0..iters {
                let mut gc = create_collector();
                gc.roots_mut().push_frame();

                let mut head = Pointer::NULL;
                for _ in 0..10_000 {
                    let cell = gc.gcalloc(Tag::REF, 4).unwrap();
                    gc.heap_mut()
                        .memory_mut()
                        .store_u32(cell.addr(), head.addr())
                        .unwrap();
                    head = cell;
                    gc.roots_mut().add_local(0, head).unwrap();
                }

                let start = std::time::Instant::now();
                black_box(gc.collect().unwrap());
                total_duration += start.elapsed();
            }

            total_duration
        });
    });

    group.finish();
}

/// Benchmark allocation throughput, including collections on exhaustion
fn allocation_throughput_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation_throughput");

    group.bench_function("short_lived_objects_100000", |b| {
        b.iter(|| {
            let mut gc = create_collector();
            gc.roots_mut().push_frame();
            for i in 0..100_000u32 {
                let ptr = gc.gcalloc(Tag::STRING, 8 + (i % 4) * 8).unwrap();
                gc.roots_mut().add_local(i % 16, ptr).unwrap();
            }
            black_box(gc.stats().collections);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    gc_pause_benchmark,
    deep_graph_benchmark,
    allocation_throughput_benchmark
);
criterion_main!(benches);
