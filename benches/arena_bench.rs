//! Criterion benchmark for Arena
//!
//! Run with: cargo bench --bench arena_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use edgeio::core::Arena;

#[derive(Clone, Copy)]
struct Slot {
    _key: u64,
    _value: u64,
}

fn bench_small(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_small");

    for count in [16usize, 256, 4096].iter() {
        group.throughput(Throughput::Elements(*count as u64));

        group.bench_function(format!("arena_{}", count), |b| {
            b.iter(|| {
                let arena = Arena::new();
                for i in 0..*count {
                    black_box(arena.alloc_copy(Slot {
                        _key: i as u64,
                        _value: i as u64,
                    }));
                }
            });
        });

        // Baseline: one heap allocation per object
        group.bench_function(format!("box_{}", count), |b| {
            b.iter(|| {
                let boxes: Vec<Box<Slot>> = (0..*count)
                    .map(|i| {
                        Box::new(Slot {
                            _key: i as u64,
                            _value: i as u64,
                        })
                    })
                    .collect();
                black_box(boxes);
            });
        });
    }

    group.finish();
}

fn bench_large(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_large");
    group.throughput(Throughput::Elements(1));

    group.bench_function("bytes_8k", |b| {
        b.iter(|| {
            let arena = Arena::new();
            black_box(arena.alloc_bytes(8192).len());
        });
    });

    group.bench_function("with_destructor", |b| {
        b.iter(|| {
            let arena = Arena::new();
            black_box(arena.alloc(String::from("owned")).len());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_small, bench_large);
criterion_main!(benches);
