//! Write transactions against the `PostgreSQL` inventory.

use crate::codec::{
    chunk_to_sql, count_to_sql, db_error, load_chunks, number_to_sql, numbers_from_sql,
    numbers_to_sql, partition_from_row,
};
use chrono::{DateTime, Utc};
use raffle_inventory_core::bitmap::{ChunkedOccupancy, chunk_of, chunks_between};
use raffle_inventory_core::partition::shifts_by_partition;
use raffle_inventory_core::store::{InventoryTx, PartitionRecount};
use raffle_inventory_core::{
    CampaignId, IdempotencyKey, LedgerEntry, NumberRange, OwnerId, Partition, PartitionId,
    PurchaseReceipt, StateDelta, StoreError, TicketNumber,
};
use sqlx::{Postgres, Transaction};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// A `PostgreSQL` transaction.
///
/// Dropping it without [`InventoryTx::commit`] rolls everything back.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
    layouts: HashMap<CampaignId, Vec<Partition>>,
}

impl PostgresTx {
    pub(crate) fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            tx,
            layouts: HashMap::new(),
        }
    }

    /// Partition boundaries of a campaign; fixed at creation, so cached per transaction.
    async fn layout(&mut self, campaign_id: CampaignId) -> Result<&[Partition], StoreError> {
        if !self.layouts.contains_key(&campaign_id) {
            let rows = sqlx::query(
                "SELECT partition_id, start_number, end_number, excluded_count, \
                        available_count, reserved_count, sold_count \
                 FROM inventory_partitions WHERE campaign_id = $1 ORDER BY start_number",
            )
            .bind(*campaign_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
            let layout = rows
                .iter()
                .map(|row| partition_from_row(campaign_id, row))
                .collect::<Result<Vec<_>, _>>()?;
            self.layouts.insert(campaign_id, layout);
        }
        Ok(self.layouts.get(&campaign_id).map_or(&[], Vec::as_slice))
    }

    /// Lock the chunks holding `numbers`.
    async fn lock_chunks(
        &mut self,
        range: &NumberRange,
        numbers: &[TicketNumber],
    ) -> Result<ChunkedOccupancy, StoreError> {
        let chunk_nos: Vec<u32> = numbers
            .iter()
            .filter(|n| range.contains(**n))
            .map(|n| chunk_of(range, *n))
            .collect::<Result<BTreeSet<_>, _>>()?
            .into_iter()
            .collect();
        load_chunks(&mut self.tx, range, &chunk_nos, true).await
    }

    async fn write_chunks(
        &mut self,
        campaign_id: CampaignId,
        occupancy: &mut ChunkedOccupancy,
    ) -> Result<(), StoreError> {
        for (chunk_no, bits) in occupancy.take_dirty() {
            sqlx::query(
                "UPDATE occupancy_chunks SET bits = $3, updated_at = now() \
                 WHERE campaign_id = $1 AND chunk_no = $2",
            )
            .bind(*campaign_id.as_uuid())
            .bind(chunk_to_sql(chunk_no)?)
            .bind(bits)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        }
        Ok(())
    }

    async fn ledger_counts(
        &mut self,
        campaign_id: CampaignId,
        partition: &Partition,
    ) -> Result<(u64, u64), StoreError> {
        let (reserved, sold): (i64, i64) = sqlx::query_as(
            "SELECT count(*) FILTER (WHERE status = 'reserved'), \
                    count(*) FILTER (WHERE status = 'sold') \
             FROM ledger_entries \
             WHERE campaign_id = $1 AND number BETWEEN $2 AND $3",
        )
        .bind(*campaign_id.as_uuid())
        .bind(number_to_sql(partition.start)?)
        .bind(number_to_sql(partition.end)?)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)?;
        let to_count = |v: i64| {
            u64::try_from(v).map_err(|_| StoreError::Corrupted(format!("Negative count {v}")))
        };
        Ok((to_count(reserved)?, to_count(sold)?))
    }
}

impl InventoryTx for PostgresTx {
    async fn create_campaign(
        &mut self,
        range: &NumberRange,
        partitions: &[Partition],
    ) -> Result<(), StoreError> {
        let campaign = *range.campaign_id.as_uuid();
        let prizes: Vec<TicketNumber> = range.instant_prize_numbers.iter().copied().collect();
        sqlx::query(
            "INSERT INTO campaign_ranges (campaign_id, start_number, end_number, instant_prize_numbers) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(campaign)
        .bind(number_to_sql(range.start)?)
        .bind(number_to_sql(range.end)?)
        .bind(numbers_to_sql(&prizes)?)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        for (chunk_no, bitmap) in ChunkedOccupancy::empty(range)?.chunks() {
            sqlx::query("INSERT INTO occupancy_chunks (campaign_id, chunk_no, bits) VALUES ($1, $2, $3)")
                .bind(campaign)
                .bind(chunk_to_sql(chunk_no)?)
                .bind(bitmap.to_bytes())
                .execute(&mut *self.tx)
                .await
                .map_err(db_error)?;
        }

        if !partitions.is_empty() {
            let mut ids = Vec::with_capacity(partitions.len());
            let mut starts = Vec::with_capacity(partitions.len());
            let mut ends = Vec::with_capacity(partitions.len());
            let mut excluded = Vec::with_capacity(partitions.len());
            let mut available = Vec::with_capacity(partitions.len());
            for partition in partitions {
                ids.push(
                    i32::try_from(partition.partition_id.get()).map_err(|_| {
                        StoreError::Corrupted(format!(
                            "Partition id {} exceeds INTEGER",
                            partition.partition_id
                        ))
                    })?,
                );
                starts.push(number_to_sql(partition.start)?);
                ends.push(number_to_sql(partition.end)?);
                excluded.push(count_to_sql(partition.excluded_count)?);
                available.push(count_to_sql(partition.available_count)?);
            }
            sqlx::query(
                "INSERT INTO inventory_partitions \
                    (campaign_id, partition_id, start_number, end_number, excluded_count, available_count) \
                 SELECT $1, * FROM UNNEST($2::int[], $3::bigint[], $4::bigint[], $5::bigint[], $6::bigint[])",
            )
            .bind(campaign)
            .bind(&ids)
            .bind(&starts)
            .bind(&ends)
            .bind(&excluded)
            .bind(&available)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        }

        tracing::debug!(
            campaign_id = %range.campaign_id,
            partitions = partitions.len(),
            "Campaign rows inserted"
        );
        Ok(())
    }

    async fn try_occupy(
        &mut self,
        range: &NumberRange,
        numbers: &[TicketNumber],
    ) -> Result<Vec<TicketNumber>, StoreError> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let mut occupancy = self.lock_chunks(range, numbers).await?;
        let won = occupancy.try_occupy(numbers)?;
        self.write_chunks(range.campaign_id, &mut occupancy).await?;
        Ok(won)
    }

    async fn release(
        &mut self,
        range: &NumberRange,
        numbers: &[TicketNumber],
    ) -> Result<Vec<TicketNumber>, StoreError> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let mut occupancy = self.lock_chunks(range, numbers).await?;
        let cleared = occupancy.release(numbers)?;
        self.write_chunks(range.campaign_id, &mut occupancy).await?;
        Ok(cleared)
    }

    async fn apply_delta(
        &mut self,
        campaign_id: CampaignId,
        deltas: &[StateDelta<'_>],
    ) -> Result<(), StoreError> {
        if deltas.iter().all(StateDelta::is_noop) {
            return Ok(());
        }
        let shifts = shifts_by_partition(self.layout(campaign_id).await?, deltas);
        // BTreeMap iteration keeps partition locks in ascending order.
        for (partition_id, shift) in shifts {
            sqlx::query(
                "UPDATE inventory_partitions \
                 SET available_count = available_count + $3, \
                     reserved_count = reserved_count + $4, \
                     sold_count = sold_count + $5, updated_at = now() \
                 WHERE campaign_id = $1 AND partition_id = $2",
            )
            .bind(*campaign_id.as_uuid())
            .bind(i32::try_from(partition_id.get()).map_err(|_| {
                StoreError::Corrupted(format!("Partition id {partition_id} exceeds INTEGER"))
            })?)
            .bind(shift.available)
            .bind(shift.reserved)
            .bind(shift.sold)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        }
        Ok(())
    }

    async fn recalculate_partition(
        &mut self,
        range: &NumberRange,
        partition_id: PartitionId,
    ) -> Result<Option<PartitionRecount>, StoreError> {
        let campaign_id = range.campaign_id;
        let pid = i32::try_from(partition_id.get())
            .map_err(|_| StoreError::Corrupted(format!("Partition id {partition_id} exceeds INTEGER")))?;
        let row = sqlx::query(
            "SELECT partition_id, start_number, end_number, excluded_count, \
                    available_count, reserved_count, sold_count \
             FROM inventory_partitions WHERE campaign_id = $1 AND partition_id = $2 FOR UPDATE",
        )
        .bind(*campaign_id.as_uuid())
        .bind(pid)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let before = partition_from_row(campaign_id, &row)?;

        let (reserved, sold) = self.ledger_counts(campaign_id, &before).await?;
        let chunk_nos = chunks_between(range, before.start, before.end)?;
        let occupancy = load_chunks(&mut self.tx, range, &chunk_nos, false).await?;
        let occupied_bits = occupancy.count_occupied(before.start, before.end)?;

        let after = Partition {
            available_count: before.size().saturating_sub(reserved + sold),
            reserved_count: reserved,
            sold_count: sold,
            ..before.clone()
        };
        sqlx::query(
            "UPDATE inventory_partitions \
             SET available_count = $3, reserved_count = $4, sold_count = $5, updated_at = now() \
             WHERE campaign_id = $1 AND partition_id = $2",
        )
        .bind(*campaign_id.as_uuid())
        .bind(pid)
        .bind(count_to_sql(after.available_count)?)
        .bind(count_to_sql(after.reserved_count)?)
        .bind(count_to_sql(after.sold_count)?)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(Some(PartitionRecount {
            before,
            after,
            occupied_bits,
        }))
    }

    async fn insert_entries(&mut self, entries: &[LedgerEntry]) -> Result<(), StoreError> {
        let Some(first) = entries.first() else {
            return Ok(());
        };
        let campaign_id = first.campaign_id;
        if entries.iter().any(|e| e.campaign_id != campaign_id) {
            return Err(StoreError::Conflict(
                "Ledger batch spans several campaigns".to_string(),
            ));
        }

        let numbers: Vec<TicketNumber> = entries.iter().map(|e| e.number).collect();
        let statuses: Vec<&str> = entries.iter().map(|e| e.status.as_str()).collect();
        let owners: Vec<Uuid> = entries.iter().map(|e| *e.owner_id.as_uuid()).collect();
        let reserved_at: Vec<DateTime<Utc>> = entries.iter().map(|e| e.reserved_at).collect();
        let expires_at: Vec<Option<DateTime<Utc>>> = entries.iter().map(|e| e.expires_at).collect();
        let payment_refs: Vec<Option<String>> =
            entries.iter().map(|e| e.payment_ref.clone()).collect();

        sqlx::query(
            "INSERT INTO ledger_entries \
                (campaign_id, number, status, owner_id, reserved_at, expires_at, payment_ref) \
             SELECT $1, * FROM UNNEST($2::bigint[], $3::text[], $4::uuid[], \
                                      $5::timestamptz[], $6::timestamptz[], $7::text[])",
        )
        .bind(*campaign_id.as_uuid())
        .bind(numbers_to_sql(&numbers)?)
        .bind(&statuses)
        .bind(&owners)
        .bind(&reserved_at)
        .bind(&expires_at)
        .bind(&payment_refs)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn held_by_owner(
        &mut self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
        owner: OwnerId,
        now: DateTime<Utc>,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let held: Vec<i64> = sqlx::query_scalar(
            "SELECT number FROM ledger_entries \
             WHERE campaign_id = $1 AND number = ANY($2) AND status = 'reserved' \
               AND owner_id = $3 AND expires_at > $4 \
             ORDER BY number FOR UPDATE",
        )
        .bind(*campaign_id.as_uuid())
        .bind(numbers_to_sql(numbers)?)
        .bind(*owner.as_uuid())
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;
        numbers_from_sql(held)
    }

    async fn mark_sold(
        &mut self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
        payment_ref: Option<&str>,
    ) -> Result<(), StoreError> {
        if numbers.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE ledger_entries \
             SET status = 'sold', expires_at = NULL, payment_ref = COALESCE($3, payment_ref) \
             WHERE campaign_id = $1 AND number = ANY($2) AND status = 'reserved'",
        )
        .bind(*campaign_id.as_uuid())
        .bind(numbers_to_sql(numbers)?)
        .bind(payment_ref)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete_reserved(
        &mut self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
        owner: Option<OwnerId>,
        expired_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let mut deleted: Vec<i64> = sqlx::query_scalar(
            "DELETE FROM ledger_entries \
             WHERE campaign_id = $1 AND number = ANY($2) AND status = 'reserved' \
               AND ($3::uuid IS NULL OR owner_id = $3) \
               AND ($4::timestamptz IS NULL OR expires_at <= $4) \
             RETURNING number",
        )
        .bind(*campaign_id.as_uuid())
        .bind(numbers_to_sql(numbers)?)
        .bind(owner.map(|o| *o.as_uuid()))
        .bind(expired_at)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;
        deleted.sort_unstable();
        numbers_from_sql(deleted)
    }

    async fn claim_receipt(&mut self, receipt: &PurchaseReceipt) -> Result<bool, StoreError> {
        let numbers = numbers_to_sql(&receipt.numbers)?;
        let inserted = sqlx::query(
            "INSERT INTO purchase_receipts (campaign_id, idempotency_key, buyer_id, numbers, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (campaign_id, idempotency_key) DO NOTHING",
        )
        .bind(*receipt.campaign_id.as_uuid())
        .bind(receipt.idempotency_key.as_str())
        .bind(*receipt.buyer_id.as_uuid())
        .bind(&numbers)
        .bind(receipt.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(inserted.rows_affected() == 1)
    }

    async fn complete_receipt(
        &mut self,
        campaign_id: CampaignId,
        key: &IdempotencyKey,
        numbers: &[TicketNumber],
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE purchase_receipts SET numbers = $3 \
             WHERE campaign_id = $1 AND idempotency_key = $2",
        )
        .bind(*campaign_id.as_uuid())
        .bind(key.as_str())
        .bind(numbers_to_sql(numbers)?)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(db_error)
    }
}
