//! Criterion micro-benchmarks for allocation, publication, and iteration.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use silt_bench::{large_region, populate, reference_region};

/// Allocation throughput at several request sizes.
fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");
    for &size in &[8u32, 64, 1024] {
        group.throughput(Throughput::Bytes(u64::from(size)));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                large_region,
                |(_mem, arena)| {
                    // Fill a fixed slice of the region per iteration.
                    for i in 0..1000u32 {
                        black_box(arena.allocate(size, 100 + i % 16));
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

/// Publication cost when every block lands at the tail via the hint.
fn bench_make_iterable(c: &mut Criterion) {
    c.bench_function("make_iterable/append_1000", |b| {
        b.iter_batched(
            || {
                let (mem, arena) = large_region();
                let refs: Vec<_> = (0..1000)
                    .map(|i| arena.allocate(64, 100 + i % 16).unwrap())
                    .collect();
                (mem, arena, refs)
            },
            |(_mem, arena, refs)| {
                for r in refs {
                    arena.make_iterable(r);
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });
}

/// Full-list walk over a populated region.
fn bench_iterate(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");
    for &count in &[100usize, 1000] {
        let (_mem, arena) = reference_region();
        let refs = populate(&arena, count, 48);
        assert_eq!(refs.len(), count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &arena, |b, arena| {
            b.iter(|| black_box(arena.iterables().count()));
        });
    }
    group.finish();
}

/// Validated typed lookup of a known block.
fn bench_get_object(c: &mut Criterion) {
    let (_mem, arena) = reference_region();
    let r = arena.allocate(64, 7).unwrap();
    c.bench_function("get_object/hit", |b| {
        b.iter(|| black_box(arena.get_object::<[u8; 64]>(black_box(r), 7)));
    });
    c.bench_function("get_object/type_miss", |b| {
        b.iter(|| black_box(arena.get_object::<[u8; 64]>(black_box(r), 8)));
    });
}

criterion_group!(
    benches,
    bench_allocate,
    bench_make_iterable,
    bench_iterate,
    bench_get_object
);
criterion_main!(benches);
