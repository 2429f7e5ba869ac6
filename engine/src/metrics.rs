//! Inventory metrics.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `raffle_selection_total{strategy,result}` - Selections by strategy and result
//! - `raffle_numbers_sold_total` - Numbers sold
//! - `raffle_numbers_reserved_total` - Numbers reserved
//! - `raffle_numbers_released_total` - Numbers returned to the pool by `release`
//! - `raffle_occupation_conflicts_total{operation}` - Numbers that lost an occupation race
//! - `raffle_purchase_replays_total` - Purchases answered from a stored receipt
//! - `raffle_reclaimer_released_total` - Expired numbers reclaimed
//! - `raffle_reclaimer_failed_batches_total` - Reclaim batches rolled back
//! - `raffle_partition_drift_total` - Partitions corrected by a recount
//!
//! ## Histograms
//! - `raffle_selection_duration_seconds{strategy}` - Selection latency
//! - `raffle_reclaimer_run_duration_seconds` - Duration of a reclaimer pass

use crate::outcome::Strategy;
use metrics::{describe_counter, describe_histogram};
use std::time::Duration;

/// Register metric descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_inventory_metrics() {
    describe_counter!(
        "raffle_selection_total",
        "Number selections by strategy and result (success, partial, failure)"
    );
    describe_histogram!(
        "raffle_selection_duration_seconds",
        "Time taken to select numbers"
    );

    describe_counter!("raffle_numbers_sold_total", "Total numbers sold");
    describe_counter!("raffle_numbers_reserved_total", "Total numbers reserved");
    describe_counter!(
        "raffle_numbers_released_total",
        "Total numbers returned to the pool by explicit release"
    );
    describe_counter!(
        "raffle_occupation_conflicts_total",
        "Numbers already occupied at write time"
    );
    describe_counter!(
        "raffle_purchase_replays_total",
        "Purchases answered from a stored idempotency receipt"
    );

    describe_counter!(
        "raffle_reclaimer_released_total",
        "Expired reservations returned to the pool"
    );
    describe_counter!(
        "raffle_reclaimer_failed_batches_total",
        "Reclaim batches that failed and were left for the next scan"
    );
    describe_histogram!(
        "raffle_reclaimer_run_duration_seconds",
        "Duration of one reclaimer pass"
    );

    describe_counter!(
        "raffle_partition_drift_total",
        "Partitions whose cached counts were corrected by a recount"
    );

    tracing::info!("Inventory metrics registered");
}

/// Record a finished selection.
pub fn record_selection(strategy: Strategy, result: &'static str, elapsed: Duration) {
    metrics::counter!(
        "raffle_selection_total",
        "strategy" => strategy.as_str(),
        "result" => result
    )
    .increment(1);
    metrics::histogram!("raffle_selection_duration_seconds", "strategy" => strategy.as_str())
        .record(elapsed.as_secs_f64());
}

/// Record numbers sold.
pub fn record_sold(count: usize) {
    metrics::counter!("raffle_numbers_sold_total").increment(count as u64);
}

/// Record numbers reserved.
pub fn record_reserved(count: usize) {
    metrics::counter!("raffle_numbers_reserved_total").increment(count as u64);
}

/// Record numbers released.
pub fn record_released(count: usize) {
    metrics::counter!("raffle_numbers_released_total").increment(count as u64);
}

/// Record numbers that lost an occupation race.
pub fn record_conflicts(operation: &'static str, count: usize) {
    if count > 0 {
        metrics::counter!("raffle_occupation_conflicts_total", "operation" => operation)
            .increment(count as u64);
    }
}

/// Record a replayed purchase.
pub fn record_replay() {
    metrics::counter!("raffle_purchase_replays_total").increment(1);
}

/// Record a reclaimer pass.
pub fn record_reclaim(released: usize, failed_batches: usize, elapsed: Duration) {
    metrics::counter!("raffle_reclaimer_released_total").increment(released as u64);
    metrics::counter!("raffle_reclaimer_failed_batches_total").increment(failed_batches as u64);
    metrics::histogram!("raffle_reclaimer_run_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record corrected partitions.
pub fn record_partition_drift(count: usize) {
    if count > 0 {
        metrics::counter!("raffle_partition_drift_total").increment(count as u64);
    }
}
