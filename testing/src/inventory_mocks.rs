//! In-memory inventory store.
//!
//! A single async mutex guards the whole inventory and a transaction holds it from
//! `begin` until commit or rollback, so transactions are fully serialised: the first
//! one to commit wins, exactly as with row locks in PostgreSQL. Every campaign a
//! transaction touches is snapshotted on first write and restored if the transaction
//! is rolled back, dropped, or fails to commit.
//!
//! Faults can be injected to exercise the rollback paths.

use raffle_inventory_core::bitmap::ChunkedOccupancy;
use raffle_inventory_core::partition::count_by_partition;
use raffle_inventory_core::store::{InventoryStore, InventoryTx, PartitionRecount};
use raffle_inventory_core::{
    CampaignId, EntryStatus, ExpiredReservations, IdempotencyKey, LedgerEntry, NumberRange,
    OwnerId, Partition, PartitionId, PurchaseReceipt, StateDelta, StoreError, TicketNumber,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug)]
struct CampaignInventory {
    range: NumberRange,
    occupancy: ChunkedOccupancy,
    partitions: Vec<Partition>,
    ledger: BTreeMap<TicketNumber, LedgerEntry>,
    receipts: HashMap<IdempotencyKey, PurchaseReceipt>,
}

#[derive(Debug, Default)]
struct Inventory {
    campaigns: HashMap<CampaignId, CampaignInventory>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_commits: AtomicUsize,
    unavailable: AtomicBool,
    commits: AtomicUsize,
}

/// In-memory [`InventoryStore`] with real rollback semantics.
///
/// # Example
///
/// ```
/// use raffle_inventory_testing::InMemoryInventoryStore;
/// use raffle_inventory_core::store::{InventoryStore, InventoryTx};
/// use raffle_inventory_core::{CampaignId, NumberRange, TicketNumber};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryInventoryStore::new();
/// let range = NumberRange::new(CampaignId::new(), 1, 100);
///
/// let mut tx = store.begin().await?;
/// tx.create_campaign(&range, &[]).await?;
/// tx.commit().await?;
///
/// let mut tx = store.begin().await?;
/// tx.try_occupy(&range, &[TicketNumber::new(5)]).await?;
/// tx.rollback().await?;
///
/// assert_eq!(store.occupied_bits(range.campaign_id).await, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryInventoryStore {
    inventory: Arc<Mutex<Inventory>>,
    faults: Arc<Faults>,
}

impl InMemoryInventoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with [`StoreError::Unavailable`].
    pub fn fail_next_commits(&self, n: usize) {
        self.faults.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Make every read and `begin` fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.faults.commits.load(Ordering::SeqCst)
    }

    /// All ledger entries of a campaign, ascending by number.
    pub async fn ledger_entries(&self, campaign_id: CampaignId) -> Vec<LedgerEntry> {
        let inventory = self.inventory.lock().await;
        inventory
            .campaigns
            .get(&campaign_id)
            .map(|c| c.ledger.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Set occupancy bits of a campaign.
    pub async fn occupied_bits(&self, campaign_id: CampaignId) -> u64 {
        let inventory = self.inventory.lock().await;
        inventory
            .campaigns
            .get(&campaign_id)
            .and_then(|c| c.occupancy.count_occupied(c.range.start, c.range.end).ok())
            .unwrap_or(0)
    }

    /// Overwrite the cached counts of a partition without touching anything else.
    ///
    /// Simulates drift for recount tests.
    pub async fn corrupt_partition(
        &self,
        campaign_id: CampaignId,
        partition_id: PartitionId,
        available: u64,
        reserved: u64,
        sold: u64,
    ) {
        let mut inventory = self.inventory.lock().await;
        if let Some(partition) = inventory
            .campaigns
            .get_mut(&campaign_id)
            .and_then(|c| c.partitions.iter_mut().find(|p| p.partition_id == partition_id))
        {
            partition.available_count = available;
            partition.reserved_count = reserved;
            partition.sold_count = sold;
        }
    }

    /// Check every cross-structure invariant of a campaign.
    ///
    /// - each partition's counts add up to its size
    /// - each partition's reserved/sold counts match the ledger
    /// - a ledger entry exists if and only if the occupancy bit is set
    /// - no instant-prize number is occupied
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub async fn check_consistency(&self, campaign_id: CampaignId) -> Result<(), String> {
        let inventory = self.inventory.lock().await;
        let campaign = inventory
            .campaigns
            .get(&campaign_id)
            .ok_or_else(|| format!("unknown campaign {campaign_id}"))?;

        let bits = campaign
            .occupancy
            .count_occupied(campaign.range.start, campaign.range.end)
            .map_err(|e| e.to_string())?;
        if bits != campaign.ledger.len() as u64 {
            return Err(format!(
                "{bits} occupancy bits but {} ledger entries",
                campaign.ledger.len()
            ));
        }
        for number in campaign.ledger.keys() {
            if !campaign.occupancy.is_occupied(*number).map_err(|e| e.to_string())? {
                return Err(format!("ledger entry {number} without occupancy bit"));
            }
            if campaign.range.is_instant_prize(*number) {
                return Err(format!("instant-prize number {number} is occupied"));
            }
        }

        for partition in &campaign.partitions {
            if !partition.is_consistent() {
                return Err(format!("partition {} counts do not add up", partition.partition_id));
            }
            let (reserved, sold) = ledger_counts(campaign, partition);
            if partition.reserved_count != reserved || partition.sold_count != sold {
                return Err(format!(
                    "partition {} caches reserved={} sold={}, ledger has reserved={reserved} sold={sold}",
                    partition.partition_id, partition.reserved_count, partition.sold_count
                ));
            }
        }
        Ok(())
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".into()));
        }
        Ok(())
    }

    async fn read<T>(
        &self,
        campaign_id: CampaignId,
        f: impl FnOnce(&CampaignInventory) -> T + Send,
    ) -> Result<Option<T>, StoreError> {
        self.ensure_available()?;
        let inventory = self.inventory.lock().await;
        Ok(inventory.campaigns.get(&campaign_id).map(f))
    }
}

fn ledger_counts(campaign: &CampaignInventory, partition: &Partition) -> (u64, u64) {
    campaign
        .ledger
        .range(partition.start..=partition.end)
        .fold((0, 0), |(reserved, sold), (_, entry)| match entry.status {
            EntryStatus::Reserved => (reserved + 1, sold),
            EntryStatus::Sold => (reserved, sold + 1),
        })
}

impl InventoryStore for InMemoryInventoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        self.ensure_available()?;
        let guard = Arc::clone(&self.inventory).lock_owned().await;
        Ok(InMemoryTx {
            guard,
            undo: HashMap::new(),
            faults: Arc::clone(&self.faults),
            committed: false,
        })
    }

    async fn number_range(&self, campaign_id: CampaignId) -> Result<Option<NumberRange>, StoreError> {
        self.read(campaign_id, |c| c.range.clone()).await
    }

    async fn partitions(&self, campaign_id: CampaignId) -> Result<Vec<Partition>, StoreError> {
        Ok(self
            .read(campaign_id, |c| c.partitions.clone())
            .await?
            .unwrap_or_default())
    }

    async fn ledger_count(&self, campaign_id: CampaignId) -> Result<u64, StoreError> {
        Ok(self
            .read(campaign_id, |c| c.ledger.len() as u64)
            .await?
            .unwrap_or(0))
    }

    async fn occupied_among(
        &self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
    ) -> Result<HashSet<TicketNumber>, StoreError> {
        Ok(self
            .read(campaign_id, |c| {
                numbers
                    .iter()
                    .filter(|n| c.ledger.contains_key(n))
                    .copied()
                    .collect()
            })
            .await?
            .unwrap_or_default())
    }

    async fn occupied_numbers(&self, campaign_id: CampaignId) -> Result<Vec<TicketNumber>, StoreError> {
        Ok(self
            .read(campaign_id, |c| c.ledger.keys().copied().collect())
            .await?
            .unwrap_or_default())
    }

    async fn free_in_partition(
        &self,
        range: &NumberRange,
        partition: &Partition,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        self.read(range.campaign_id, |c| {
            c.occupancy
                .free_in(partition.start, partition.end, offset, limit, &c.range.instant_prize_numbers)
        })
        .await?
        .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredReservations>, StoreError> {
        self.ensure_available()?;
        let inventory = self.inventory.lock().await;
        let mut groups: Vec<ExpiredReservations> = inventory
            .campaigns
            .iter()
            .filter_map(|(campaign_id, campaign)| {
                let numbers: Vec<TicketNumber> = campaign
                    .ledger
                    .values()
                    .filter(|entry| entry.is_expired_at(now))
                    .map(|entry| entry.number)
                    .collect();
                (!numbers.is_empty()).then_some(ExpiredReservations {
                    campaign_id: *campaign_id,
                    numbers,
                })
            })
            .collect();
        groups.sort_by_key(|g| g.campaign_id);
        Ok(groups)
    }

    async fn purchase_receipt(
        &self,
        campaign_id: CampaignId,
        key: &IdempotencyKey,
    ) -> Result<Option<PurchaseReceipt>, StoreError> {
        Ok(self
            .read(campaign_id, |c| c.receipts.get(key).cloned())
            .await?
            .flatten())
    }

    async fn ledger_entry(
        &self,
        campaign_id: CampaignId,
        number: TicketNumber,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self
            .read(campaign_id, |c| c.ledger.get(&number).cloned())
            .await?
            .flatten())
    }
}

/// Transaction over [`InMemoryInventoryStore`]; holds the store lock until it ends.
#[derive(Debug)]
pub struct InMemoryTx {
    guard: OwnedMutexGuard<Inventory>,
    undo: HashMap<CampaignId, Option<CampaignInventory>>,
    faults: Arc<Faults>,
    committed: bool,
}

impl InMemoryTx {
    fn snapshot(&mut self, campaign_id: CampaignId) {
        if !self.undo.contains_key(&campaign_id) {
            let before = self.guard.campaigns.get(&campaign_id).cloned();
            self.undo.insert(campaign_id, before);
        }
    }

    fn campaign_mut(&mut self, campaign_id: CampaignId) -> Result<&mut CampaignInventory, StoreError> {
        self.snapshot(campaign_id);
        self.guard
            .campaigns
            .get_mut(&campaign_id)
            .ok_or(StoreError::NotFound(campaign_id))
    }

    fn restore(&mut self) {
        for (campaign_id, before) in self.undo.drain() {
            match before {
                Some(campaign) => {
                    self.guard.campaigns.insert(campaign_id, campaign);
                }
                None => {
                    self.guard.campaigns.remove(&campaign_id);
                }
            }
        }
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if !self.committed {
            self.restore();
        }
    }
}

impl InventoryTx for InMemoryTx {
    async fn create_campaign(
        &mut self,
        range: &NumberRange,
        partitions: &[Partition],
    ) -> Result<(), StoreError> {
        if self.guard.campaigns.contains_key(&range.campaign_id) {
            return Err(StoreError::Conflict(format!(
                "Campaign {} already exists",
                range.campaign_id
            )));
        }
        let occupancy = ChunkedOccupancy::empty(range)?;
        self.snapshot(range.campaign_id);
        self.guard.campaigns.insert(
            range.campaign_id,
            CampaignInventory {
                range: range.clone(),
                occupancy,
                partitions: partitions.to_vec(),
                ledger: BTreeMap::new(),
                receipts: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn try_occupy(
        &mut self,
        range: &NumberRange,
        numbers: &[TicketNumber],
    ) -> Result<Vec<TicketNumber>, StoreError> {
        self.campaign_mut(range.campaign_id)?
            .occupancy
            .try_occupy(numbers)
    }

    async fn release(
        &mut self,
        range: &NumberRange,
        numbers: &[TicketNumber],
    ) -> Result<Vec<TicketNumber>, StoreError> {
        self.campaign_mut(range.campaign_id)?.occupancy.release(numbers)
    }

    async fn apply_delta(
        &mut self,
        campaign_id: CampaignId,
        deltas: &[StateDelta<'_>],
    ) -> Result<(), StoreError> {
        let campaign = self.campaign_mut(campaign_id)?;
        for delta in deltas {
            let counts = count_by_partition(&campaign.partitions, delta.numbers);
            for partition in &mut campaign.partitions {
                if let Some(n) = counts.get(&partition.partition_id) {
                    partition.shift(delta.from, delta.to, *n);
                }
            }
        }
        Ok(())
    }

    async fn recalculate_partition(
        &mut self,
        range: &NumberRange,
        partition_id: PartitionId,
    ) -> Result<Option<PartitionRecount>, StoreError> {
        let campaign = self.campaign_mut(range.campaign_id)?;
        let Some(index) = campaign
            .partitions
            .iter()
            .position(|p| p.partition_id == partition_id)
        else {
            return Ok(None);
        };
        let before = campaign.partitions[index].clone();
        let (reserved, sold) = ledger_counts(campaign, &before);
        let occupied_bits = campaign.occupancy.count_occupied(before.start, before.end)?;
        let after = Partition {
            available_count: before.size().saturating_sub(reserved + sold),
            reserved_count: reserved,
            sold_count: sold,
            ..before.clone()
        };
        campaign.partitions[index] = after.clone();
        Ok(Some(PartitionRecount {
            before,
            after,
            occupied_bits,
        }))
    }

    async fn insert_entries(&mut self, entries: &[LedgerEntry]) -> Result<(), StoreError> {
        for entry in entries {
            let campaign = self.campaign_mut(entry.campaign_id)?;
            if campaign.ledger.contains_key(&entry.number) {
                return Err(StoreError::Conflict(format!(
                    "Ledger entry for number {} already exists",
                    entry.number
                )));
            }
            campaign.ledger.insert(entry.number, entry.clone());
        }
        Ok(())
    }

    async fn held_by_owner(
        &mut self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
        owner: OwnerId,
        now: DateTime<Utc>,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        let Some(campaign) = self.guard.campaigns.get(&campaign_id) else {
            return Err(StoreError::NotFound(campaign_id));
        };
        Ok(numbers
            .iter()
            .filter(|n| {
                campaign.ledger.get(n).is_some_and(|entry| {
                    entry.status == EntryStatus::Reserved
                        && entry.owner_id == owner
                        && !entry.is_expired_at(now)
                })
            })
            .copied()
            .collect())
    }

    async fn mark_sold(
        &mut self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
        payment_ref: Option<&str>,
    ) -> Result<(), StoreError> {
        let campaign = self.campaign_mut(campaign_id)?;
        for number in numbers {
            if let Some(entry) = campaign.ledger.get_mut(number) {
                entry.status = EntryStatus::Sold;
                entry.expires_at = None;
                if let Some(payment_ref) = payment_ref {
                    entry.payment_ref = Some(payment_ref.to_string());
                }
            }
        }
        Ok(())
    }

    async fn delete_reserved(
        &mut self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
        owner: Option<OwnerId>,
        expired_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        let campaign = self.campaign_mut(campaign_id)?;
        let mut deleted = Vec::new();
        for number in numbers {
            let matches = campaign.ledger.get(number).is_some_and(|entry| {
                entry.status == EntryStatus::Reserved
                    && owner.is_none_or(|o| o == entry.owner_id)
                    && expired_at.is_none_or(|at| entry.is_expired_at(at))
            });
            if matches {
                campaign.ledger.remove(number);
                deleted.push(*number);
            }
        }
        deleted.sort_unstable();
        Ok(deleted)
    }

    async fn claim_receipt(&mut self, receipt: &PurchaseReceipt) -> Result<bool, StoreError> {
        let campaign = self.campaign_mut(receipt.campaign_id)?;
        if campaign.receipts.contains_key(&receipt.idempotency_key) {
            return Ok(false);
        }
        campaign
            .receipts
            .insert(receipt.idempotency_key.clone(), receipt.clone());
        Ok(true)
    }

    async fn complete_receipt(
        &mut self,
        campaign_id: CampaignId,
        key: &IdempotencyKey,
        numbers: &[TicketNumber],
    ) -> Result<(), StoreError> {
        let campaign = self.campaign_mut(campaign_id)?;
        if let Some(receipt) = campaign.receipts.get_mut(key) {
            receipt.numbers = numbers.to_vec();
        }
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let injected = self
            .faults
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            // Drop restores the snapshots.
            return Err(StoreError::Unavailable("injected commit failure".into()));
        }
        self.committed = true;
        self.faults.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
