//! Selection strategy engine.
//!
//! Picks advisory numbers without writing anything. The strategy depends on pool
//! size and availability:
//!
//! | condition                                      | strategy      |
//! |------------------------------------------------|---------------|
//! | pool ≥ large-pool threshold, partitions exist  | Partition     |
//! | ratio > `sampling_ratio`                       | Sampling      |
//! | ratio > `batched_ratio`                        | Batched       |
//! | available ≤ `preselect_max_available`          | Pre-selection |
//! | otherwise                                      | Batched       |
//!
//! A Batched search that stalls on consecutive all-occupied rounds escalates to
//! Pre-selection when the absolute gate allows it.

mod batched;
mod preselect;
mod sampling;

use crate::config::EngineConfig;
use crate::outcome::{SelectionOutcome, Strategy, elapsed_ms};
use crate::{InventoryEngine, metrics, partition_index};
use rand::SeedableRng;
use rand::rngs::StdRng;
use raffle_inventory_core::store::InventoryStore;
use raffle_inventory_core::{
    AvailabilityStats, CampaignId, InventoryError, NumberRange, Partition, StatsSource,
    StoreError, TicketNumber,
};
use std::time::Instant;

/// Strategy for a pool, given its stats and whether it has a partition index.
#[must_use]
pub fn choose_strategy(
    config: &EngineConfig,
    range_size: u64,
    has_partitions: bool,
    stats: &AvailabilityStats,
) -> Strategy {
    let selection = &config.selection;
    let ratio = stats.ratio();
    if config.partition.is_large(range_size) && has_partitions {
        Strategy::Partition
    } else if ratio > selection.sampling_ratio {
        Strategy::Sampling
    } else if ratio > selection.batched_ratio {
        Strategy::Batched
    } else if selection.preselect_allowed(stats.available) {
        Strategy::PreSelection
    } else {
        Strategy::Batched
    }
}

impl<S: InventoryStore> InventoryEngine<S> {
    /// Pick up to `count` random available numbers.
    ///
    /// The result is advisory: nothing is reserved, and a number may be taken by
    /// someone else before the caller reserves or buys it. A shortfall is reported in
    /// the outcome, not as an error.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Validation`] if `count` is outside the configured bounds
    /// - [`InventoryError::CampaignNotFound`] for an unknown campaign
    ///
    /// Storage failures produce an outcome with `success == false`.
    #[tracing::instrument(skip(self), fields(strategy))]
    pub async fn select(
        &self,
        campaign_id: CampaignId,
        count: usize,
    ) -> Result<SelectionOutcome, InventoryError> {
        let started = Instant::now();
        let bounds = &self.config.selection;
        if count < bounds.min_count || count > bounds.max_count {
            return Err(InventoryError::validation(format!(
                "count must be between {} and {}",
                bounds.min_count, bounds.max_count
            )));
        }

        let range = match self.number_range(campaign_id).await {
            Ok(range) => range,
            Err(InventoryError::Store(e)) => {
                return Ok(failed(campaign_id, count, Strategy::Sampling, &e, started));
            }
            Err(e) => return Err(e),
        };

        let mut strategy = Strategy::Sampling;
        match self.run_selection(&range, count, &mut strategy).await {
            Ok((numbers, stats)) => {
                tracing::Span::current().record("strategy", strategy.as_str());
                let outcome = found(&range, count, strategy, numbers, &stats, started);
                let result = if outcome.is_partial() { "partial" } else { "success" };
                metrics::record_selection(strategy, result, started.elapsed());
                tracing::debug!(
                    found = outcome.numbers.len(),
                    available = stats.available,
                    elapsed_ms = outcome.elapsed_ms,
                    "Selection finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(error = %e, strategy = %strategy, "Selection failed");
                metrics::record_selection(strategy, "failure", started.elapsed());
                Ok(failed(campaign_id, count, strategy, &e, started))
            }
        }
    }

    async fn run_selection(
        &self,
        range: &NumberRange,
        count: usize,
        strategy: &mut Strategy,
    ) -> Result<(Vec<TicketNumber>, AvailabilityStats), StoreError> {
        let mut stats = self.availability(range).await?;
        if stats.available == 0 && stats.source == StatsSource::Snapshot {
            // A stale snapshot must not report a sold-out pool that has numbers again.
            let ledger_count = self.store.ledger_count(range.campaign_id).await?;
            stats = AvailabilityStats::from_ledger(range, ledger_count);
        }
        if stats.available == 0 {
            *strategy = choose_strategy(&self.config, range.size(), false, &stats);
            return Ok((Vec::new(), stats));
        }

        let partitions: Vec<Partition> = if self.config.partition.is_large(range.size()) {
            self.store.partitions(range.campaign_id).await?
        } else {
            Vec::new()
        };
        *strategy = choose_strategy(&self.config, range.size(), !partitions.is_empty(), &stats);

        let selection = &self.config.selection;
        let store = self.store.as_ref();
        let mut rng = StdRng::from_entropy();
        let numbers = match *strategy {
            Strategy::Partition => {
                let attempts = count * self.config.partition.sample_attempts_factor;
                partition_index::sample(store, range, &partitions, count, attempts, &mut rng).await?
            }
            Strategy::Sampling => {
                let attempts = count * selection.sampling_attempts_factor;
                sampling::sample(store, range, count, attempts, &mut rng).await?
            }
            Strategy::Batched => {
                let search = batched::search(store, range, count, selection, &mut rng).await?;
                if search.stalled
                    && search.numbers.len() < count
                    && selection.preselect_allowed(stats.available)
                {
                    tracing::info!(
                        found = search.numbers.len(),
                        "Batched search stalled, escalating to pre-selection"
                    );
                    *strategy = Strategy::PreSelection;
                    preselect::preselect(store, range, count, &mut rng).await?
                } else {
                    search.numbers
                }
            }
            Strategy::PreSelection => preselect::preselect(store, range, count, &mut rng).await?,
        };
        Ok((numbers, stats))
    }
}

fn found(
    range: &NumberRange,
    requested: usize,
    strategy: Strategy,
    numbers: Vec<TicketNumber>,
    stats: &AvailabilityStats,
    started: Instant,
) -> SelectionOutcome {
    let message = if numbers.is_empty() && stats.available == 0 {
        "No numbers available: campaign is sold out".to_string()
    } else if numbers.len() < requested {
        format!(
            "Only {} of {requested} requested numbers found ({} available)",
            numbers.len(),
            stats.available
        )
    } else {
        format!("Selected {} numbers", numbers.len())
    };
    SelectionOutcome {
        campaign_id: range.campaign_id,
        numbers,
        strategy,
        elapsed_ms: elapsed_ms(started),
        success: true,
        message,
        requested,
        available: stats.available,
    }
}

fn failed(
    campaign_id: CampaignId,
    requested: usize,
    strategy: Strategy,
    error: &StoreError,
    started: Instant,
) -> SelectionOutcome {
    SelectionOutcome {
        campaign_id,
        numbers: Vec::new(),
        strategy,
        elapsed_ms: elapsed_ms(started),
        success: false,
        message: format!("Selection failed: {error}"),
        requested,
        available: 0,
    }
}
