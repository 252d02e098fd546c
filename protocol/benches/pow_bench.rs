// Proof-of-work benchmarks.
//
// Covers the target check on the hot path of validation, a full nonce
// search at a few low difficulties, and the retarget computation.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use murmur_protocol::consensus::{meets_target, mine, next_difficulty, MiningSignal};
use murmur_protocol::crypto::hash::{blake3_hash, Hash256};
use murmur_protocol::storage::Block;

fn bench_meets_target(c: &mut Criterion) {
    let hash = Hash256(blake3_hash(b"murmur"));

    c.bench_function("pow/meets_target", |b| {
        b.iter(|| meets_target(&hash, 1 << 20));
    });
}

fn bench_mine(c: &mut Criterion) {
    let genesis = Block::genesis(0, 1, &[]);
    let mut group = c.benchmark_group("pow/mine");

    for difficulty in [1u64 << 4, 1 << 8, 1 << 12] {
        group.throughput(Throughput::Elements(difficulty));
        group.bench_with_input(
            BenchmarkId::from_parameter(difficulty),
            &difficulty,
            |b, &d| {
                let signal = MiningSignal::new();
                let mut timestamp = 1u64;
                b.iter_with_setup(
                    || {
                        timestamp += 1;
                        Block::template(&genesis.header, vec![], "00".repeat(32), timestamp, d)
                    },
                    |template| mine(template, &signal.ticket(), 4_096).unwrap(),
                );
            },
        );
    }

    group.finish();
}

fn bench_next_difficulty(c: &mut Criterion) {
    let timestamps: Vec<u64> = (0..=10).map(|i| i * 45_000).collect();

    c.bench_function("pow/next_difficulty", |b| {
        b.iter(|| next_difficulty(1 << 16, &timestamps, 60_000, 4));
    });
}

criterion_group!(benches, bench_meets_target, bench_mine, bench_next_difficulty);
criterion_main!(benches);
