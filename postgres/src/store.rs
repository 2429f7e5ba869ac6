//! Read side of the `PostgreSQL` inventory.

use crate::codec::{
    db_error, entry_from_row, load_chunks, number_from_sql, number_to_sql, numbers_from_sql,
    numbers_to_sql, partition_from_row, range_from_row,
};
use crate::tx::PostgresTx;
use chrono::{DateTime, Utc};
use raffle_inventory_core::bitmap::chunks_between;
use raffle_inventory_core::store::InventoryStore;
use raffle_inventory_core::{
    CampaignId, ExpiredReservations, IdempotencyKey, LedgerEntry, NumberRange, OwnerId,
    Partition, PurchaseReceipt, StoreError, TicketNumber,
};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashSet;
use uuid::Uuid;

/// PostgreSQL-backed inventory store.
///
/// Reads go straight to the pool and take no locks. Writes run through
/// [`PostgresTx`], which locks the occupancy chunks, partition rows and ledger rows it
/// touches until commit.
///
/// # Example
///
/// ```ignore
/// use raffle_inventory_postgres::PostgresInventoryStore;
/// use raffle_inventory_core::store::InventoryStore;
///
/// let store = PostgresInventoryStore::new(pool);
/// let range = store.number_range(campaign_id).await?;
/// ```
#[derive(Clone, Debug)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))
    }

    /// Get the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check that the database answers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the ping fails.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl InventoryStore for PostgresInventoryStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<PostgresTx, StoreError> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(PostgresTx::new(tx))
    }

    async fn number_range(&self, campaign_id: CampaignId) -> Result<Option<NumberRange>, StoreError> {
        let row = sqlx::query(
            "SELECT start_number, end_number, instant_prize_numbers \
             FROM campaign_ranges WHERE campaign_id = $1",
        )
        .bind(*campaign_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.map(|row| range_from_row(campaign_id, &row)).transpose()
    }

    async fn partitions(&self, campaign_id: CampaignId) -> Result<Vec<Partition>, StoreError> {
        let rows = sqlx::query(
            "SELECT partition_id, start_number, end_number, excluded_count, \
                    available_count, reserved_count, sold_count \
             FROM inventory_partitions WHERE campaign_id = $1 ORDER BY start_number",
        )
        .bind(*campaign_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter()
            .map(|row| partition_from_row(campaign_id, row))
            .collect()
    }

    async fn ledger_count(&self, campaign_id: CampaignId) -> Result<u64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM ledger_entries WHERE campaign_id = $1")
                .bind(*campaign_id.as_uuid())
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;
        u64::try_from(count).map_err(|_| StoreError::Corrupted(format!("Negative count {count}")))
    }

    async fn occupied_among(
        &self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
    ) -> Result<HashSet<TicketNumber>, StoreError> {
        if numbers.is_empty() {
            return Ok(HashSet::new());
        }
        let wanted = numbers_to_sql(numbers)?;
        let found: Vec<(i64,)> = sqlx::query_as(
            "SELECT number FROM ledger_entries WHERE campaign_id = $1 AND number = ANY($2)",
        )
        .bind(*campaign_id.as_uuid())
        .bind(&wanted)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        found.into_iter().map(|(n,)| number_from_sql(n)).collect()
    }

    async fn occupied_numbers(&self, campaign_id: CampaignId) -> Result<Vec<TicketNumber>, StoreError> {
        let found: Vec<(i64,)> = sqlx::query_as(
            "SELECT number FROM ledger_entries WHERE campaign_id = $1 ORDER BY number",
        )
        .bind(*campaign_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        found.into_iter().map(|(n,)| number_from_sql(n)).collect()
    }

    async fn free_in_partition(
        &self,
        range: &NumberRange,
        partition: &Partition,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let chunk_nos = chunks_between(range, partition.start, partition.end)?;
        let occupancy = load_chunks(&mut conn, range, &chunk_nos, false).await?;
        occupancy.free_in(
            partition.start,
            partition.end,
            offset,
            limit,
            &range.instant_prize_numbers,
        )
    }

    async fn expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredReservations>, StoreError> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            "SELECT campaign_id, number FROM ledger_entries \
             WHERE status = 'reserved' AND expires_at <= $1 \
             ORDER BY campaign_id, number",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut groups: Vec<ExpiredReservations> = Vec::new();
        for (campaign, number) in rows {
            let campaign_id = CampaignId::from_uuid(campaign);
            let number = number_from_sql(number)?;
            match groups.last_mut() {
                Some(group) if group.campaign_id == campaign_id => group.numbers.push(number),
                _ => groups.push(ExpiredReservations {
                    campaign_id,
                    numbers: vec![number],
                }),
            }
        }
        Ok(groups)
    }

    async fn purchase_receipt(
        &self,
        campaign_id: CampaignId,
        key: &IdempotencyKey,
    ) -> Result<Option<PurchaseReceipt>, StoreError> {
        let row = sqlx::query(
            "SELECT buyer_id, numbers, created_at FROM purchase_receipts \
             WHERE campaign_id = $1 AND idempotency_key = $2",
        )
        .bind(*campaign_id.as_uuid())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let buyer: Uuid = row.try_get("buyer_id").map_err(db_error)?;
        let numbers: Vec<i64> = row.try_get("numbers").map_err(db_error)?;
        Ok(Some(PurchaseReceipt {
            campaign_id,
            idempotency_key: key.clone(),
            buyer_id: OwnerId::from_uuid(buyer),
            numbers: numbers_from_sql(numbers)?,
            created_at: row.try_get("created_at").map_err(db_error)?,
        }))
    }

    async fn ledger_entry(
        &self,
        campaign_id: CampaignId,
        number: TicketNumber,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT number, status, owner_id, reserved_at, expires_at, payment_ref \
             FROM ledger_entries WHERE campaign_id = $1 AND number = $2",
        )
        .bind(*campaign_id.as_uuid())
        .bind(number_to_sql(number)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.map(|row| entry_from_row(campaign_id, &row)).transpose()
    }
}
