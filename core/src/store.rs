//! Storage seams for the inventory.
//!
//! The store is split into a read side ([`InventoryStore`]) used by selection and the
//! reclaimer scan, and a transaction ([`InventoryTx`]) that carries every write. The
//! occupancy bit, the ledger entry and the partition counts of a number are only ever
//! changed together inside one transaction; dropping a transaction without calling
//! [`InventoryTx::commit`] discards its writes.
//!
//! # Implementations
//!
//! - `PostgresInventoryStore` (in `raffle-inventory-postgres`): production implementation
//! - `InMemoryInventoryStore` (in `raffle-inventory-testing`): deterministic testing
//!
//! # Example
//!
//! ```no_run
//! use raffle_inventory_core::store::{InventoryStore, InventoryTx};
//! use raffle_inventory_core::types::{NumberRange, TicketNumber};
//! use raffle_inventory_core::error::StoreError;
//!
//! async fn occupy<S: InventoryStore>(store: &S, range: &NumberRange) -> Result<(), StoreError> {
//!     let mut tx = store.begin().await?;
//!     let won = tx.try_occupy(range, &[TicketNumber::new(7)]).await?;
//!     // ... write ledger entries for `won` ...
//!     tx.commit().await
//! }
//! ```

use crate::error::StoreError;
use crate::types::{
    CampaignId, ExpiredReservations, IdempotencyKey, LedgerEntry, NumberRange, OwnerId,
    Partition, PartitionId, PurchaseReceipt, StateDelta, TicketNumber,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;

/// Result of a full partition recount.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionRecount {
    /// Cached counts before the recount
    pub before: Partition,
    /// Counts rebuilt from the ledger
    pub after: Partition,
    /// Occupancy bits set inside the partition
    pub occupied_bits: u64,
}

impl PartitionRecount {
    /// Whether the cached counts were wrong.
    #[must_use]
    pub fn drifted(&self) -> bool {
        self.before != self.after
    }

    /// Whether the bitmap disagrees with the ledger for this partition.
    #[must_use]
    pub const fn bitmap_mismatch(&self) -> bool {
        self.occupied_bits != self.after.reserved_count + self.after.sold_count
    }
}

/// Read side of the inventory.
///
/// Reads never take locks and may observe state that is stale by the time the caller
/// acts on it; only [`InventoryTx`] writes are authoritative.
pub trait InventoryStore: Send + Sync + 'static {
    /// Transaction type produced by [`Self::begin`].
    type Tx: InventoryTx;

    /// Open a write transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;

    /// Number range of a campaign, `None` if the campaign was never initialised.
    fn number_range(
        &self,
        campaign_id: CampaignId,
    ) -> impl Future<Output = Result<Option<NumberRange>, StoreError>> + Send;

    /// Partition index of a campaign, ordered by start (empty for small pools).
    fn partitions(
        &self,
        campaign_id: CampaignId,
    ) -> impl Future<Output = Result<Vec<Partition>, StoreError>> + Send;

    /// Number of ledger entries (reserved + sold).
    fn ledger_count(
        &self,
        campaign_id: CampaignId,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Subset of `numbers` that currently have a ledger entry.
    fn occupied_among(
        &self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
    ) -> impl Future<Output = Result<HashSet<TicketNumber>, StoreError>> + Send;

    /// Every number with a ledger entry, ascending.
    fn occupied_numbers(
        &self,
        campaign_id: CampaignId,
    ) -> impl Future<Output = Result<Vec<TicketNumber>, StoreError>> + Send;

    /// Up to `limit` numbers whose occupancy bit is clear inside `partition`.
    ///
    /// The scan starts `offset` numbers into the partition and wraps. Instant-prize
    /// numbers are never returned.
    fn free_in_partition(
        &self,
        range: &NumberRange,
        partition: &Partition,
        offset: u64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<TicketNumber>, StoreError>> + Send;

    /// Reservations expired at `now`, grouped by campaign.
    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<ExpiredReservations>, StoreError>> + Send;

    /// Stored receipt of an idempotent purchase.
    fn purchase_receipt(
        &self,
        campaign_id: CampaignId,
        key: &IdempotencyKey,
    ) -> impl Future<Output = Result<Option<PurchaseReceipt>, StoreError>> + Send;

    /// Ledger entry of a single number.
    fn ledger_entry(
        &self,
        campaign_id: CampaignId,
        number: TicketNumber,
    ) -> impl Future<Output = Result<Option<LedgerEntry>, StoreError>> + Send;
}

/// A write transaction.
///
/// Implementations lock what they touch (occupancy chunks, partition rows, ledger rows)
/// in a fixed order, so concurrent transactions serialise per number and the first to
/// commit wins.
pub trait InventoryTx: Send {
    /// Persist a new campaign: its range, an all-clear bitmap and its partitions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the campaign already exists.
    fn create_campaign(
        &mut self,
        range: &NumberRange,
        partitions: &[Partition],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Set the occupancy bits of `numbers` that are clear; returns the transitioned subset.
    fn try_occupy(
        &mut self,
        range: &NumberRange,
        numbers: &[TicketNumber],
    ) -> impl Future<Output = Result<Vec<TicketNumber>, StoreError>> + Send;

    /// Clear the occupancy bits of `numbers`; returns the subset that was set.
    fn release(
        &mut self,
        range: &NumberRange,
        numbers: &[TicketNumber],
    ) -> impl Future<Output = Result<Vec<TicketNumber>, StoreError>> + Send;

    /// Apply every delta to the partition counts; no-op for campaigns without partitions.
    ///
    /// All touched partitions are updated in one pass in ascending partition order, so
    /// a write should pass all of its deltas in a single call, after its occupancy
    /// changes.
    fn apply_delta(
        &mut self,
        campaign_id: CampaignId,
        deltas: &[StateDelta<'_>],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Recount one partition from the ledger and overwrite its cached counts.
    fn recalculate_partition(
        &mut self,
        range: &NumberRange,
        partition_id: PartitionId,
    ) -> impl Future<Output = Result<Option<PartitionRecount>, StoreError>> + Send;

    /// Insert ledger entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if an entry already exists.
    fn insert_entries(
        &mut self,
        entries: &[LedgerEntry],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Numbers among `numbers` reserved by `owner` and not expired at `now`, locked.
    fn held_by_owner(
        &mut self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
        owner: OwnerId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<TicketNumber>, StoreError>> + Send;

    /// Turn reserved entries into sold ones.
    fn mark_sold(
        &mut self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
        payment_ref: Option<&str>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete reserved entries; returns the numbers actually deleted.
    ///
    /// With `owner` only that holder's entries are removed; with `expired_at` only
    /// entries whose lease ran out at that instant. Sold entries are never touched.
    fn delete_reserved(
        &mut self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
        owner: Option<OwnerId>,
        expired_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<Vec<TicketNumber>, StoreError>> + Send;

    /// Claim an idempotency key; `false` if another purchase already holds it.
    fn claim_receipt(
        &mut self,
        receipt: &PurchaseReceipt,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Record the numbers sold under a claimed key.
    fn complete_receipt(
        &mut self,
        campaign_id: CampaignId,
        key: &IdempotencyKey,
        numbers: &[TicketNumber],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Make every write of the transaction visible.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Discard every write of the transaction.
    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
