//! Criterion benchmarks for block arena allocation and reset.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use snail_rt::Arena;

fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("arena_allocate");
    for &count in &[1_000usize, 100_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut arena = Arena::new(count * 2).expect("reserve arena");
            b.iter(|| {
                arena.reset().expect("fresh generation");
                for i in 0..count {
                    black_box(arena.alloc(i as u64).expect("within capacity"));
                }
            });
        });
    }
    group.finish();
}

fn bench_alloc_slice(c: &mut Criterion) {
    let values: Vec<u64> = (0..8).collect();
    c.bench_function("arena_alloc_slice_8", |b| {
        let mut arena = Arena::new(1 << 16).expect("reserve arena");
        b.iter(|| {
            if arena.remaining_blocks() < 4 {
                arena.reset().expect("fresh generation");
            }
            black_box(arena.alloc_slice(black_box(&values)).expect("within capacity"));
        });
    });
}

criterion_group!(benches, bench_allocate, bench_alloc_slice);
criterion_main!(benches);
