//! # Raffle Inventory Engine
//!
//! Allocation and reservation engine for raffle ticket numbers.
//!
//! ## Operations
//!
//! - [`InventoryEngine::select`]: advisory random numbers, strategy picked by scale
//!   and availability
//! - [`InventoryEngine::purchase`]: authoritative, idempotent conversion to SOLD
//! - [`InventoryEngine::reserve`]: time-bounded lease
//! - [`InventoryEngine::release`]: idempotent return of reserved numbers to the pool
//! - [`reclaimer::Reclaimer`]: scheduled release of expired leases
//!
//! Selection never writes. Every write opens one storage transaction that changes the
//! occupancy bits, the ledger and the partition counts together.
//!
//! ## Example
//!
//! ```ignore
//! use raffle_inventory_engine::{InventoryEngine, config::EngineConfig};
//!
//! let engine = InventoryEngine::new(store, clock, EngineConfig::default());
//! let selection = engine.select(campaign_id, 5).await?;
//! let outcome = engine
//!     .purchase(campaign_id, &selection.numbers, buyer, PaymentMeta::default())
//!     .await?;
//! ```

pub mod config;
pub mod metrics;
pub mod outcome;
pub mod partition_index;
pub mod purchase;
pub mod reclaimer;
pub mod reservation;
pub mod selection;

pub use config::{EngineConfig, PartitionConfig, ReservationConfig, SelectionConfig};
pub use outcome::{
    AuditReport, PurchaseOutcome, ReleaseOutcome, ReservationOutcome, SelectionOutcome,
    Strategy, WritePath,
};
pub use reclaimer::{ReclaimReport, Reclaimer, ReclaimerConfig};

use raffle_inventory_core::environment::Clock;
use raffle_inventory_core::partition::plan_partitions;
use raffle_inventory_core::stats::StatsCache;
use raffle_inventory_core::store::{InventoryStore, InventoryTx};
use raffle_inventory_core::{
    AvailabilityStats, CampaignId, InventoryError, NumberRange, StatsSource, StoreError,
    TicketNumber,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// The number allocation and reservation engine.
///
/// Holds no inventory state of its own; everything lives in the store so several
/// engine instances can serve the same campaigns.
pub struct InventoryEngine<S: InventoryStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    stats: Option<Arc<dyn StatsCache>>,
    config: EngineConfig,
}

impl<S: InventoryStore> InventoryEngine<S> {
    /// Create an engine over `store`.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            stats: None,
            config,
        }
    }

    /// Use a snapshot cache for availability stats.
    #[must_use]
    pub fn with_stats_cache(mut self, cache: Arc<dyn StatsCache>) -> Self {
        self.stats = Some(cache);
        self
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Set up the inventory of a new campaign.
    ///
    /// Creates the occupancy bitmap and, for pools of at least the large-pool threshold,
    /// the partition index. Returns `false` if the campaign already exists with the same
    /// range.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Validation`] if the range is malformed or larger than
    ///   [`PartitionConfig::max_range_size`]
    /// - [`InventoryError::Store`] with [`StoreError::Conflict`] if the campaign exists
    ///   with a different range
    #[tracing::instrument(skip(self, range), fields(campaign_id = %range.campaign_id))]
    pub async fn initialize_campaign(&self, range: NumberRange) -> Result<bool, InventoryError> {
        range.validate()?;
        let max = self.config.partition.max_range_size;
        if range.size() > max {
            return Err(InventoryError::validation(format!(
                "Range of {} numbers exceeds the maximum of {max}",
                range.size()
            )));
        }
        if let Some(outside) = range.instant_prize_numbers.iter().find(|n| !range.contains(**n)) {
            return Err(InventoryError::validation(format!(
                "Instant-prize number {outside} is outside the range"
            )));
        }

        if let Some(existing) = self.store.number_range(range.campaign_id).await? {
            if existing == range {
                tracing::debug!("Campaign inventory already initialised");
                return Ok(false);
            }
            return Err(StoreError::Conflict(format!(
                "Campaign {} already has a different number range",
                range.campaign_id
            ))
            .into());
        }

        let partitions = if self.config.partition.is_large(range.size()) {
            plan_partitions(&range, self.config.partition.partition_size)
        } else {
            Vec::new()
        };

        let mut tx = self.store.begin().await?;
        tx.create_campaign(&range, &partitions).await?;
        tx.commit().await?;

        tracing::info!(
            size = range.size(),
            partitions = partitions.len(),
            instant_prizes = range.instant_prize_numbers.len(),
            "Campaign inventory initialised"
        );
        Ok(true)
    }

    /// Availability stats of a campaign, preferring a fresh cached snapshot.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::CampaignNotFound`] for an unknown campaign
    /// - [`InventoryError::Store`] if storage fails
    pub async fn stats(&self, campaign_id: CampaignId) -> Result<AvailabilityStats, InventoryError> {
        let range = self.number_range(campaign_id).await?;
        Ok(self.availability(&range).await?)
    }

    pub(crate) async fn number_range(
        &self,
        campaign_id: CampaignId,
    ) -> Result<NumberRange, InventoryError> {
        self.store
            .number_range(campaign_id)
            .await?
            .ok_or(InventoryError::CampaignNotFound(campaign_id))
    }

    pub(crate) async fn availability(
        &self,
        range: &NumberRange,
    ) -> Result<AvailabilityStats, StoreError> {
        if let Some(cache) = &self.stats {
            match cache.get(range.campaign_id).await {
                Ok(Some(snapshot)) => return Ok(snapshot),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Stats cache read failed"),
            }
        }

        let ledger_count = self.store.ledger_count(range.campaign_id).await?;
        let stats = AvailabilityStats::from_ledger(range, ledger_count);

        if let Some(cache) = &self.stats {
            let snapshot = AvailabilityStats {
                source: StatsSource::Snapshot,
                ..stats.clone()
            };
            if let Err(e) = cache.put(snapshot, self.config.stats_ttl).await {
                tracing::warn!(error = %e, "Stats cache write failed");
            }
        }
        Ok(stats)
    }

    pub(crate) async fn invalidate_stats(&self, campaign_id: CampaignId) {
        if let Some(cache) = &self.stats {
            if let Err(e) = cache.invalidate(campaign_id).await {
                tracing::warn!(campaign_id = %campaign_id, error = %e, "Stats cache invalidation failed");
            }
        }
    }

    /// Deduplicate `numbers` and check them against the range and request bounds.
    pub(crate) fn validate_numbers(
        &self,
        range: &NumberRange,
        numbers: &[TicketNumber],
    ) -> Result<Vec<TicketNumber>, InventoryError> {
        if numbers.is_empty() {
            return Err(InventoryError::validation("At least one number is required"));
        }
        let max = self.config.reservation.max_numbers;
        if numbers.len() > max {
            return Err(InventoryError::validation(format!(
                "At most {max} numbers per request"
            )));
        }
        let unique: BTreeSet<TicketNumber> = numbers.iter().copied().collect();
        if let Some(bad) = unique.iter().find(|n| !range.contains(**n)) {
            return Err(InventoryError::validation(format!(
                "Number {bad} is outside the campaign range {}..={}",
                range.start, range.end
            )));
        }
        if let Some(prize) = unique.iter().find(|n| range.is_instant_prize(**n)) {
            return Err(InventoryError::validation(format!(
                "Number {prize} is reserved for an instant prize"
            )));
        }
        Ok(unique.into_iter().collect())
    }

    /// Roll back after a failed write; the original error is what the caller reports.
    pub(crate) async fn abort(tx: S::Tx, cause: &StoreError) {
        tracing::warn!(error = %cause, "Rolling back inventory transaction");
        if let Err(e) = tx.rollback().await {
            tracing::error!(error = %e, "Rollback failed");
        }
    }
}

/// Numbers of `requested` that are not in `granted`; both ascending.
pub(crate) fn difference(requested: &[TicketNumber], granted: &[TicketNumber]) -> Vec<TicketNumber> {
    let granted: BTreeSet<_> = granted.iter().collect();
    requested
        .iter()
        .filter(|n| !granted.contains(n))
        .copied()
        .collect()
}
