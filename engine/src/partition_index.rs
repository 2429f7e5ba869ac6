//! Partition index: weighted sampling and recounts.
//!
//! Sampling picks a partition with probability proportional to its cached
//! `available_count`, then scans that partition's bitmap from a random offset. A
//! partition that yields nothing new drops out of the draw, so a nearly exhausted
//! pool still terminates within the attempt budget.

use crate::outcome::AuditReport;
use crate::{InventoryEngine, metrics};
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use raffle_inventory_core::store::{InventoryStore, InventoryTx, PartitionRecount};
use raffle_inventory_core::{
    CampaignId, InventoryError, NumberRange, Partition, PartitionId, StoreError, TicketNumber,
};
use std::collections::BTreeSet;

pub(crate) async fn sample<S: InventoryStore>(
    store: &S,
    range: &NumberRange,
    partitions: &[Partition],
    count: usize,
    max_attempts: usize,
    rng: &mut StdRng,
) -> Result<Vec<TicketNumber>, StoreError> {
    let weights: Vec<u64> = partitions.iter().map(|p| p.available_count).collect();
    let Ok(mut index) = WeightedIndex::new(&weights) else {
        // Every partition reports zero availability.
        return Ok(Vec::new());
    };

    let mut picked = BTreeSet::new();
    let mut attempts = 0;
    while picked.len() < count && attempts < max_attempts {
        attempts += 1;
        let chosen = index.sample(rng);
        let partition = &partitions[chosen];
        let already_here = picked.iter().filter(|n| partition.contains(**n)).count();
        let wanted = count - picked.len();
        let limit = wanted + already_here;
        let offset = rng.gen_range(0..partition.span());

        let free = store
            .free_in_partition(range, partition, offset, limit)
            .await?;
        let exhausted = free.len() < limit;
        let mut added = 0;
        for number in free {
            if picked.len() >= count {
                break;
            }
            if picked.insert(number) {
                added += 1;
            }
        }

        if added == 0 || exhausted {
            tracing::trace!(partition = %partition.partition_id, "Partition exhausted");
            if index.update_weights(&[(chosen, &0)]).is_err() {
                break;
            }
        }
    }
    tracing::trace!(attempts, found = picked.len(), "Partition sampling finished");
    Ok(picked.into_iter().collect())
}

impl<S: InventoryStore> InventoryEngine<S> {
    /// Rebuild one partition's counts from the ledger.
    ///
    /// Meant for drift correction, never for the request path. Returns `None` if the
    /// partition does not exist.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::CampaignNotFound`] for an unknown campaign
    /// - [`InventoryError::Store`] if the recount transaction fails
    #[tracing::instrument(skip(self))]
    pub async fn recalculate(
        &self,
        campaign_id: CampaignId,
        partition_id: PartitionId,
    ) -> Result<Option<PartitionRecount>, InventoryError> {
        let range = self.number_range(campaign_id).await?;
        let recount = self.recount(&range, partition_id).await?;
        if let Some(recount) = &recount {
            report_recount(recount);
            if recount.drifted() {
                metrics::record_partition_drift(1);
                self.invalidate_stats(campaign_id).await;
            }
        }
        Ok(recount)
    }

    /// Recount every partition of a campaign, one transaction per partition.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::CampaignNotFound`] for an unknown campaign
    /// - [`InventoryError::Store`] if a recount fails; earlier partitions stay corrected
    #[tracing::instrument(skip(self))]
    pub async fn audit(&self, campaign_id: CampaignId) -> Result<AuditReport, InventoryError> {
        let range = self.number_range(campaign_id).await?;
        let partitions = self.store.partitions(campaign_id).await?;
        let mut report = AuditReport::default();

        for partition in &partitions {
            let Some(recount) = self.recount(&range, partition.partition_id).await? else {
                continue;
            };
            report.partitions += 1;
            report_recount(&recount);
            if recount.drifted() {
                report.corrected += 1;
            }
            if recount.bitmap_mismatch() {
                report.bitmap_mismatches += 1;
            }
        }

        metrics::record_partition_drift(report.corrected);
        if report.corrected > 0 {
            self.invalidate_stats(campaign_id).await;
        }
        tracing::info!(
            partitions = report.partitions,
            corrected = report.corrected,
            bitmap_mismatches = report.bitmap_mismatches,
            "Partition audit finished"
        );
        Ok(report)
    }

    async fn recount(
        &self,
        range: &NumberRange,
        partition_id: PartitionId,
    ) -> Result<Option<PartitionRecount>, StoreError> {
        let mut tx = self.store.begin().await?;
        match tx.recalculate_partition(range, partition_id).await {
            Ok(recount) => {
                tx.commit().await?;
                Ok(recount)
            }
            Err(e) => {
                Self::abort(tx, &e).await;
                Err(e)
            }
        }
    }
}

fn report_recount(recount: &PartitionRecount) {
    let partition = &recount.after;
    if recount.drifted() {
        tracing::warn!(
            partition_id = %partition.partition_id,
            before_available = recount.before.available_count,
            before_reserved = recount.before.reserved_count,
            before_sold = recount.before.sold_count,
            available = partition.available_count,
            reserved = partition.reserved_count,
            sold = partition.sold_count,
            "Partition counts drifted, corrected from ledger"
        );
    }
    if recount.bitmap_mismatch() {
        tracing::error!(
            partition_id = %partition.partition_id,
            occupied_bits = recount.occupied_bits,
            ledger_entries = partition.reserved_count + partition.sold_count,
            "Occupancy bitmap disagrees with ledger"
        );
    }
}
