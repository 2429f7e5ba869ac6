//! Conversions between domain values and SQL columns.

use chrono::{DateTime, Utc};
use raffle_inventory_core::bitmap::ChunkedOccupancy;
use raffle_inventory_core::{
    CampaignId, EntryStatus, LedgerEntry, NumberRange, OwnerId, Partition, PartitionId,
    StoreError, TicketNumber,
};
use sqlx::error::ErrorKind;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

/// Map a sqlx error onto the storage error taxonomy.
pub(crate) fn db_error(e: sqlx::Error) -> StoreError {
    let mapped = match &e {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation | ErrorKind::CheckViolation => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Database(e.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        _ => StoreError::Database(e.to_string()),
    };
    let kind = match mapped {
        StoreError::Conflict(_) => "conflict",
        StoreError::Unavailable(_) => "unavailable",
        _ => "database",
    };
    metrics::counter!("raffle_inventory_store_errors_total", "kind" => kind).increment(1);
    mapped
}

pub(crate) fn number_to_sql(number: TicketNumber) -> Result<i64, StoreError> {
    i64::try_from(number.get())
        .map_err(|_| StoreError::Corrupted(format!("Number {number} exceeds BIGINT")))
}

pub(crate) fn numbers_to_sql(numbers: &[TicketNumber]) -> Result<Vec<i64>, StoreError> {
    numbers.iter().copied().map(number_to_sql).collect()
}

pub(crate) fn number_from_sql(value: i64) -> Result<TicketNumber, StoreError> {
    u64::try_from(value)
        .map(TicketNumber::new)
        .map_err(|_| StoreError::Corrupted(format!("Negative ticket number {value}")))
}

pub(crate) fn numbers_from_sql(values: Vec<i64>) -> Result<Vec<TicketNumber>, StoreError> {
    values.into_iter().map(number_from_sql).collect()
}

fn count_from_sql(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupted(format!("Negative count {value}")))
}

pub(crate) fn count_to_sql(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupted(format!("Count {value} exceeds BIGINT")))
}

pub(crate) fn chunk_to_sql(chunk_no: u32) -> Result<i32, StoreError> {
    i32::try_from(chunk_no)
        .map_err(|_| StoreError::Corrupted(format!("Chunk number {chunk_no} exceeds INTEGER")))
}

pub(crate) fn range_from_row(campaign_id: CampaignId, row: &PgRow) -> Result<NumberRange, StoreError> {
    let start: i64 = row.try_get("start_number").map_err(db_error)?;
    let end: i64 = row.try_get("end_number").map_err(db_error)?;
    let prizes: Vec<i64> = row.try_get("instant_prize_numbers").map_err(db_error)?;
    let prizes = numbers_from_sql(prizes)?;
    let mut range = NumberRange::new(
        campaign_id,
        number_from_sql(start)?.get(),
        number_from_sql(end)?.get(),
    );
    range.instant_prize_numbers = prizes.into_iter().collect();
    Ok(range)
}

pub(crate) fn partition_from_row(campaign_id: CampaignId, row: &PgRow) -> Result<Partition, StoreError> {
    let partition_id: i32 = row.try_get("partition_id").map_err(db_error)?;
    let partition_id = u32::try_from(partition_id)
        .map_err(|_| StoreError::Corrupted(format!("Negative partition id {partition_id}")))?;
    Ok(Partition {
        campaign_id,
        partition_id: PartitionId::new(partition_id),
        start: number_from_sql(row.try_get("start_number").map_err(db_error)?)?,
        end: number_from_sql(row.try_get("end_number").map_err(db_error)?)?,
        excluded_count: count_from_sql(row.try_get("excluded_count").map_err(db_error)?)?,
        available_count: count_from_sql(row.try_get("available_count").map_err(db_error)?)?,
        reserved_count: count_from_sql(row.try_get("reserved_count").map_err(db_error)?)?,
        sold_count: count_from_sql(row.try_get("sold_count").map_err(db_error)?)?,
    })
}

pub(crate) fn entry_from_row(campaign_id: CampaignId, row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let status = EntryStatus::parse(&status)
        .ok_or_else(|| StoreError::Corrupted(format!("Unknown ledger status {status}")))?;
    let owner: Uuid = row.try_get("owner_id").map_err(db_error)?;
    let reserved_at: DateTime<Utc> = row.try_get("reserved_at").map_err(db_error)?;
    Ok(LedgerEntry {
        campaign_id,
        number: number_from_sql(row.try_get("number").map_err(db_error)?)?,
        status,
        owner_id: OwnerId::from_uuid(owner),
        reserved_at,
        expires_at: row.try_get("expires_at").map_err(db_error)?,
        payment_ref: row.try_get("payment_ref").map_err(db_error)?,
    })
}

/// Load occupancy chunks of a campaign, optionally locking them.
///
/// Rows are locked in ascending `chunk_no` order so concurrent writers cannot
/// deadlock on the bitmap.
pub(crate) async fn load_chunks(
    conn: &mut PgConnection,
    range: &NumberRange,
    chunk_nos: &[u32],
    lock: bool,
) -> Result<ChunkedOccupancy, StoreError> {
    let mut occupancy = ChunkedOccupancy::partial(range)?;
    if chunk_nos.is_empty() {
        return Ok(occupancy);
    }
    let wanted: Vec<i32> = chunk_nos
        .iter()
        .copied()
        .map(chunk_to_sql)
        .collect::<Result<_, _>>()?;
    let sql = if lock {
        "SELECT chunk_no, bits FROM occupancy_chunks \
         WHERE campaign_id = $1 AND chunk_no = ANY($2) ORDER BY chunk_no FOR UPDATE"
    } else {
        "SELECT chunk_no, bits FROM occupancy_chunks \
         WHERE campaign_id = $1 AND chunk_no = ANY($2) ORDER BY chunk_no"
    };
    let rows = sqlx::query(sql)
        .bind(*range.campaign_id.as_uuid())
        .bind(&wanted)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_error)?;

    for row in rows {
        let chunk_no: i32 = row.try_get("chunk_no").map_err(db_error)?;
        let bits: Vec<u8> = row.try_get("bits").map_err(db_error)?;
        let chunk_no = u32::try_from(chunk_no)
            .map_err(|_| StoreError::Corrupted(format!("Negative chunk number {chunk_no}")))?;
        occupancy.insert_chunk(chunk_no, &bits)?;
    }
    Ok(occupancy)
}
