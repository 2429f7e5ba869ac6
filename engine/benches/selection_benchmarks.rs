//! Selection Benchmarks
//!
//! Benchmarks for the selection strategies and the occupancy bitmap:
//! - Bitmap: free-bit scans and counts at chunk scale
//! - Selection: one benchmark per strategy, each on a pool shaped to trigger it
//!
//! Run with: `cargo bench --bench selection_benchmarks`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use raffle_inventory_core::bitmap::OccupancyBitmap;
use raffle_inventory_core::environment::Clock;
use raffle_inventory_core::{NumberRange, OwnerId};
use raffle_inventory_engine::{EngineConfig, InventoryEngine, PartitionConfig};
use raffle_inventory_testing::fixtures::{numbers, seed_sold, small_range};
use raffle_inventory_testing::{InMemoryInventoryStore, test_clock};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Benchmark bitmap primitives on a full 65,536-bit chunk
fn benchmark_bitmap(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitmap");
    group.throughput(Throughput::Elements(1));

    let mut bitmap = OccupancyBitmap::new(65_536);
    for bit in (0..65_000).step_by(2) {
        bitmap.set(bit);
    }

    group.bench_function("count_ones", |b| {
        b.iter(|| black_box(bitmap.count_ones()));
    });

    group.bench_function("next_clear_sparse", |b| {
        b.iter(|| black_box(bitmap.next_clear(black_box(0), 65_536)));
    });

    group.bench_function("next_clear_dense_tail", |b| {
        b.iter(|| black_box(bitmap.next_clear(black_box(64_999), 65_536)));
    });

    group.finish();
}

/// Seed a campaign where every `stride`-th number is free.
fn campaign(
    runtime: &Runtime,
    engine: &InventoryEngine<InMemoryInventoryStore>,
    range: &NumberRange,
    sold: Vec<u64>,
) {
    runtime.block_on(async {
        engine
            .initialize_campaign(range.clone())
            .await
            .expect("initialize campaign");
        for batch in sold.chunks(50_000) {
            seed_sold(
                engine.store().as_ref(),
                range,
                &numbers(batch.iter().copied()),
                OwnerId::new(),
                test_clock().now(),
            )
            .await
            .expect("seed sold numbers");
        }
    });
}

fn engine(config: EngineConfig) -> InventoryEngine<InMemoryInventoryStore> {
    InventoryEngine::new(
        Arc::new(InMemoryInventoryStore::new()),
        Arc::new(test_clock()),
        config,
    )
}

/// Benchmark `select` for each strategy
fn benchmark_selection(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("select");

    // (label, pool size, sell every n-th number or all but every n-th, partitioned)
    let shapes: [(&str, u64, u64, bool, bool); 4] = [
        ("sampling", 100_000, 20, true, false),
        ("batched", 100_000, 3, false, false),
        ("pre_selection", 100_000, 50, false, false),
        ("partition", 200_000, 10, true, true),
    ];

    for (label, size, stride, sell_stride, partitioned) in shapes {
        let config = if partitioned {
            EngineConfig::builder()
                .partition(
                    PartitionConfig::default()
                        .with_large_pool_threshold(size)
                        .with_partition_size(10_000),
                )
                .build()
        } else {
            EngineConfig::default()
        };
        let engine = engine(config);
        let range = small_range(1, size);
        let sold: Vec<u64> = (1..=size)
            .filter(|n| (n % stride == 0) == sell_stride)
            .collect();
        campaign(&runtime, &engine, &range, sold);

        for count in [1usize, 10, 100] {
            group.throughput(Throughput::Elements(count as u64));
            group.bench_with_input(BenchmarkId::new(label, count), &count, |b, &count| {
                b.to_async(&runtime).iter(|| async {
                    black_box(
                        engine
                            .select(range.campaign_id, count)
                            .await
                            .expect("select"),
                    )
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, benchmark_bitmap, benchmark_selection);
criterion_main!(benches);
