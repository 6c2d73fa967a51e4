//! Benchmarks for the freshness primitives.
//!
//! Tests the hot paths of the analysis:
//! - Range insertion with coalescing
//! - Coverage queries against fragmented range sets
//! - Store merging across control-flow paths

extern crate specguard;

use criterion::{criterion_group, criterion_main, Criterion};
use specguard::analysis::{FreshnessStore, RangeSet, StoreArena, StoreMerger};
use specguard::program::ObjectId;
use std::hint::black_box;

/// Benchmark inserting many disjoint ranges.
fn bench_rangeset_insert_disjoint(c: &mut Criterion) {
    c.bench_function("rangeset_insert_disjoint", |b| {
        b.iter(|| {
            let mut set = RangeSet::new();
            for i in 0..128u64 {
                set.insert(black_box(i * 16), black_box(i * 16 + 8));
            }
            black_box(set)
        });
    });
}

/// Benchmark inserting ranges that coalesce into one.
fn bench_rangeset_insert_coalescing(c: &mut Criterion) {
    c.bench_function("rangeset_insert_coalescing", |b| {
        b.iter(|| {
            let mut set = RangeSet::new();
            for i in 0..128u64 {
                set.insert(black_box(i * 8), black_box(i * 8 + 8));
            }
            black_box(set)
        });
    });
}

/// Benchmark coverage queries against a fragmented set.
fn bench_rangeset_covers(c: &mut Criterion) {
    let mut set = RangeSet::new();
    for i in 0..128u64 {
        set.insert(i * 16, i * 16 + 8);
    }

    c.bench_function("rangeset_covers", |b| {
        b.iter(|| {
            let mut hits = 0u32;
            for i in 0..128u64 {
                if set.covers(black_box(i * 16), black_box(i * 16 + 4)) {
                    hits += 1;
                }
            }
            black_box(hits)
        });
    });
}

/// Benchmark a two-way store merge over many tracked objects.
fn bench_store_merge(c: &mut Criterion) {
    c.bench_function("store_merge_two_way", |b| {
        b.iter(|| {
            let mut arena = StoreArena::new();

            let mut left = FreshnessStore::new();
            left.mark_all_tentative();
            let mut right = FreshnessStore::new();
            right.mark_all_tentative();
            for i in 0..64u32 {
                let object = ObjectId::new(i);
                left.mark_fresh(object, 0, 64);
                right.mark_fresh(object, 32, 96);
            }

            let mut merger = StoreMerger::new();
            merger.add_input(arena.alloc(left));
            merger.add_input(arena.alloc(right));
            let merged = merger.merge(&mut arena).unwrap().unwrap();
            black_box(arena.get(merged).unwrap().is_fresh(ObjectId::new(0), 32, 64))
        });
    });
}

criterion_group!(
    benches,
    bench_rangeset_insert_disjoint,
    bench_rangeset_insert_coalescing,
    bench_rangeset_covers,
    bench_store_merge
);
criterion_main!(benches);
