//! Integration tests for strategy dispatch and advisory selection.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use common::Harness;
use raffle_inventory_core::environment::Clock;
use raffle_inventory_core::store::InventoryStore;
use raffle_inventory_core::stats::StatsCache;
use raffle_inventory_core::{AvailabilityStats, CampaignId, InventoryError, OwnerId, StatsSource};
use raffle_inventory_engine::{EngineConfig, SelectionConfig, Strategy};
use raffle_inventory_testing::InMemoryStatsCache;
use raffle_inventory_testing::fixtures::{numbers, seed_reserved, seed_sold, small_range};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Strategy dispatch
// ============================================================================

#[tokio::test]
async fn test_high_availability_uses_sampling() {
    let h = Harness::with_defaults();
    let range = small_range(1, 100_000);
    h.engine.initialize_campaign(range.clone()).await.unwrap();
    let sold = numbers((1..=100_000).step_by(20));
    assert_eq!(sold.len(), 5_000);
    seed_sold(h.store.as_ref(), &range, &sold, OwnerId::new(), h.clock.now())
        .await
        .unwrap();

    let outcome = h.engine.select(range.campaign_id, 10).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.strategy, Strategy::Sampling);
    assert_eq!(outcome.numbers.len(), 10);
    assert_eq!(outcome.available, 95_000);
    let unique: BTreeSet<_> = outcome.numbers.iter().collect();
    assert_eq!(unique.len(), 10);
    let taken = h
        .store
        .occupied_among(range.campaign_id, &outcome.numbers)
        .await
        .unwrap();
    assert!(taken.is_empty());
}

#[tokio::test]
async fn test_scarce_pool_uses_preselection_and_reports_shortfall() {
    let h = Harness::with_defaults();
    let range = small_range(1, 1_000);
    h.engine.initialize_campaign(range.clone()).await.unwrap();
    let free = numbers([17, 230, 499, 501, 999]);
    let sold: Vec<_> = numbers(1..=1_000)
        .into_iter()
        .filter(|n| !free.contains(n))
        .collect();
    seed_sold(h.store.as_ref(), &range, &sold, OwnerId::new(), h.clock.now())
        .await
        .unwrap();

    let outcome = h.engine.select(range.campaign_id, 10).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.strategy, Strategy::PreSelection);
    assert_eq!(outcome.numbers, free);
    assert!(outcome.is_partial());
    assert_eq!(outcome.requested, 10);
}

#[tokio::test]
async fn test_medium_availability_uses_batched() {
    let h = Harness::with_defaults();
    let range = small_range(1, 1_000);
    h.engine.initialize_campaign(range.clone()).await.unwrap();
    seed_sold(h.store.as_ref(), &range, &numbers(1..=700), OwnerId::new(), h.clock.now())
        .await
        .unwrap();

    let outcome = h.engine.select(range.campaign_id, 10).await.unwrap();

    assert_eq!(outcome.strategy, Strategy::Batched);
    assert_eq!(outcome.numbers.len(), 10);
    assert!(outcome.numbers.iter().all(|n| n.get() > 700));
}

#[tokio::test]
async fn test_stalled_batched_search_escalates_to_preselection() {
    let selection = SelectionConfig::builder()
        .sampling_ratio(0.99)
        .batched_ratio(0.0)
        .batch_size(10)
        .max_empty_rounds(2)
        .build();
    let h = Harness::new(EngineConfig::builder().selection(selection).build());
    let range = small_range(1, 10_000);
    h.engine.initialize_campaign(range.clone()).await.unwrap();
    seed_sold(h.store.as_ref(), &range, &numbers(1..=9_995), OwnerId::new(), h.clock.now())
        .await
        .unwrap();

    let outcome = h.engine.select(range.campaign_id, 5).await.unwrap();

    assert_eq!(outcome.strategy, Strategy::PreSelection);
    assert_eq!(outcome.numbers, numbers(9_996..=10_000));
}

#[tokio::test]
async fn test_large_pool_uses_partition_index() {
    let h = Harness::partitioned(1_000, 1_000);
    let range = small_range(1, 10_000);
    h.engine.initialize_campaign(range.clone()).await.unwrap();
    assert_eq!(h.store.partitions(range.campaign_id).await.unwrap().len(), 10);
    seed_sold(h.store.as_ref(), &range, &numbers(1..=2_000), OwnerId::new(), h.clock.now())
        .await
        .unwrap();

    let outcome = h.engine.select(range.campaign_id, 25).await.unwrap();

    assert_eq!(outcome.strategy, Strategy::Partition);
    assert_eq!(outcome.numbers.len(), 25);
    assert!(outcome.numbers.iter().all(|n| n.get() > 2_000));
}

#[tokio::test]
async fn test_partition_sampling_finds_last_free_numbers() {
    let h = Harness::partitioned(1_000, 1_000);
    let range = small_range(1, 10_000);
    h.engine.initialize_campaign(range.clone()).await.unwrap();
    let free = numbers([42, 5_555, 9_999]);
    let sold: Vec<_> = numbers(1..=10_000)
        .into_iter()
        .filter(|n| !free.contains(n))
        .collect();
    seed_sold(h.store.as_ref(), &range, &sold, OwnerId::new(), h.clock.now())
        .await
        .unwrap();

    let outcome = h.engine.select(range.campaign_id, 10).await.unwrap();

    assert_eq!(outcome.strategy, Strategy::Partition);
    assert_eq!(outcome.numbers, free);
}

// ============================================================================
// Edge cases
// ============================================================================

#[tokio::test]
async fn test_sold_out_campaign_returns_empty_selection() {
    let h = Harness::with_defaults();
    let range = small_range(1, 50);
    h.engine.initialize_campaign(range.clone()).await.unwrap();
    seed_reserved(
        h.store.as_ref(),
        &range,
        &numbers(1..=50),
        OwnerId::new(),
        h.clock.now(),
        h.clock.now() + chrono::Duration::minutes(5),
    )
    .await
    .unwrap();

    let outcome = h.engine.select(range.campaign_id, 3).await.unwrap();

    assert!(outcome.success);
    assert!(outcome.numbers.is_empty());
    assert_eq!(outcome.available, 0);
    assert!(outcome.message.contains("sold out"));
}

#[tokio::test]
async fn test_instant_prizes_are_never_selected() {
    let h = Harness::with_defaults();
    let range = small_range(1, 20).with_instant_prizes([3, 7, 11]);
    h.engine.initialize_campaign(range.clone()).await.unwrap();

    let outcome = h.engine.select(range.campaign_id, 20).await.unwrap();

    assert_eq!(outcome.available, 17);
    assert!(!outcome.numbers.is_empty());
    assert!(outcome.numbers.iter().all(|n| !range.is_instant_prize(*n)));
}

#[tokio::test]
async fn test_count_out_of_bounds_is_rejected() {
    let h = Harness::with_defaults();
    let range = small_range(1, 100);
    h.engine.initialize_campaign(range.clone()).await.unwrap();

    let zero = h.engine.select(range.campaign_id, 0).await;
    let too_many = h.engine.select(range.campaign_id, 101).await;

    assert!(matches!(zero, Err(InventoryError::Validation(_))));
    assert!(matches!(too_many, Err(InventoryError::Validation(_))));
}

#[tokio::test]
async fn test_unknown_campaign_is_not_found() {
    let h = Harness::with_defaults();
    let result = h.engine.select(CampaignId::new(), 5).await;
    assert!(matches!(result, Err(InventoryError::CampaignNotFound(_))));
}

#[tokio::test]
async fn test_storage_outage_reports_failed_outcome() {
    let h = Harness::with_defaults();
    let range = small_range(1, 100);
    h.engine.initialize_campaign(range.clone()).await.unwrap();
    h.store.set_unavailable(true);

    let outcome = h.engine.select(range.campaign_id, 5).await.unwrap();

    assert!(!outcome.success);
    assert!(outcome.numbers.is_empty());
    assert!(!outcome.is_partial());
}

// ============================================================================
// Stats snapshot cache
// ============================================================================

#[tokio::test]
async fn test_snapshot_is_reused_and_invalidated_by_writes() {
    let h = Harness::with_defaults();
    let cache = Arc::new(InMemoryStatsCache::new(Arc::new(h.clock.clone())));
    let engine = raffle_inventory_engine::InventoryEngine::new(
        Arc::clone(&h.store),
        Arc::new(h.clock.clone()),
        EngineConfig::default(),
    )
    .with_stats_cache(cache.clone());
    let range = small_range(1, 100);
    engine.initialize_campaign(range.clone()).await.unwrap();

    engine.select(range.campaign_id, 2).await.unwrap();
    assert!(cache.contains(range.campaign_id));
    let stats = engine.stats(range.campaign_id).await.unwrap();
    assert_eq!(stats.source, StatsSource::Snapshot);
    assert_eq!(cache.hits(), 1);

    engine
        .reserve(range.campaign_id, &numbers([5]), OwnerId::new(), None)
        .await
        .unwrap();
    assert!(!cache.contains(range.campaign_id));
    let stats = engine.stats(range.campaign_id).await.unwrap();
    assert_eq!(stats.source, StatsSource::Ledger);
    assert_eq!(stats.available, 99);
}

#[tokio::test]
async fn test_snapshot_expires_after_ttl() {
    let h = Harness::with_defaults();
    let cache = Arc::new(InMemoryStatsCache::new(Arc::new(h.clock.clone())));
    let engine = raffle_inventory_engine::InventoryEngine::new(
        Arc::clone(&h.store),
        Arc::new(h.clock.clone()),
        EngineConfig::default(),
    )
    .with_stats_cache(cache.clone());
    let range = small_range(1, 100);
    engine.initialize_campaign(range.clone()).await.unwrap();

    engine.stats(range.campaign_id).await.unwrap();
    h.clock.advance(chrono::Duration::seconds(6));
    let stats = engine.stats(range.campaign_id).await.unwrap();

    assert_eq!(stats.source, StatsSource::Ledger);
    assert_eq!(cache.hits(), 0);
}

#[tokio::test]
async fn test_stale_sold_out_snapshot_is_rechecked() {
    let h = Harness::with_defaults();
    let cache = Arc::new(InMemoryStatsCache::new(Arc::new(h.clock.clone())));
    let engine = raffle_inventory_engine::InventoryEngine::new(
        Arc::clone(&h.store),
        Arc::new(h.clock.clone()),
        EngineConfig::default(),
    )
    .with_stats_cache(cache.clone());
    let range = small_range(1, 100);
    engine.initialize_campaign(range.clone()).await.unwrap();
    let stale = AvailabilityStats {
        occupied: 100,
        available: 0,
        source: StatsSource::Snapshot,
        ..AvailabilityStats::from_ledger(&range, 100)
    };
    cache.put(stale, Duration::from_secs(60)).await.unwrap();

    let outcome = engine.select(range.campaign_id, 4).await.unwrap();

    assert_eq!(outcome.numbers.len(), 4);
    assert_eq!(outcome.available, 100);
}
