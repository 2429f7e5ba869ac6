//! Reservation leases and release.

use crate::outcome::{ReleaseOutcome, ReservationOutcome, WritePath, elapsed_ms};
use crate::{InventoryEngine, difference, metrics};
use chrono::{DateTime, Utc};
use raffle_inventory_core::store::{InventoryStore, InventoryTx};
use raffle_inventory_core::{
    CampaignId, InventoryError, LedgerEntry, NumberRange, NumberState, OwnerId, StateDelta,
    StoreError, TicketNumber,
};
use std::time::{Duration, Instant};

impl<S: InventoryStore> InventoryEngine<S> {
    /// Hold `numbers` for `owner` until `now + ttl`.
    ///
    /// Uses the same compare-and-set as a purchase; numbers already occupied are
    /// reported as unavailable. `ttl` defaults to the configured lease length.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Validation`] for a bad number list or a TTL that is zero or
    ///   above the configured maximum
    /// - [`InventoryError::CampaignNotFound`] for an unknown campaign
    ///
    /// Storage failures roll back and produce an outcome with `success == false`.
    #[tracing::instrument(skip(self, numbers), fields(count = numbers.len()))]
    pub async fn reserve(
        &self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
        owner: OwnerId,
        ttl: Option<Duration>,
    ) -> Result<ReservationOutcome, InventoryError> {
        let started = Instant::now();
        let ttl = ttl.unwrap_or(self.config.reservation.default_ttl);
        if ttl.is_zero() || ttl > self.config.reservation.max_ttl {
            return Err(InventoryError::validation(format!(
                "Reservation TTL must be between 1s and {}s",
                self.config.reservation.max_ttl.as_secs()
            )));
        }
        let lease = chrono::Duration::from_std(ttl)
            .map_err(|_| InventoryError::validation("Reservation TTL out of range"))?;

        let now = self.clock.now();
        let expires_at = now + lease;
        let range = match self.number_range(campaign_id).await {
            Ok(range) => range,
            Err(InventoryError::Store(e)) => {
                return Ok(reserve_failed(campaign_id, owner, numbers, expires_at, &e, started));
            }
            Err(e) => return Err(e),
        };
        let requested = self.validate_numbers(&range, numbers)?;

        match self.hold(&range, &requested, owner, now, expires_at).await {
            Ok(reserved) => {
                let unavailable = difference(&requested, &reserved);
                metrics::record_reserved(reserved.len());
                metrics::record_conflicts("reserve", unavailable.len());
                self.invalidate_stats(campaign_id).await;
                tracing::info!(
                    reserved = reserved.len(),
                    unavailable = unavailable.len(),
                    %expires_at,
                    "Reservation committed"
                );
                let message = if unavailable.is_empty() {
                    format!("Reserved {} numbers", reserved.len())
                } else {
                    format!(
                        "Reserved {} of {} numbers; {} no longer available",
                        reserved.len(),
                        requested.len(),
                        unavailable.len()
                    )
                };
                Ok(ReservationOutcome {
                    campaign_id,
                    owner_id: owner,
                    reserved,
                    unavailable,
                    expires_at,
                    elapsed_ms: elapsed_ms(started),
                    strategy: WritePath::Lease,
                    success: true,
                    message,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "Reservation failed");
                Ok(reserve_failed(campaign_id, owner, &requested, expires_at, &e, started))
            }
        }
    }

    /// Return reserved numbers to the pool.
    ///
    /// Only RESERVED entries are released (optionally only those held by `owner`);
    /// SOLD numbers never are. Releasing a number that is already free is a no-op, so
    /// the call is always safe to repeat.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Validation`] for an empty or oversized request
    /// - [`InventoryError::CampaignNotFound`] for an unknown campaign
    ///
    /// Storage failures roll back and produce an outcome with `success == false`.
    #[tracing::instrument(skip(self, numbers), fields(count = numbers.len()))]
    pub async fn release(
        &self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
        owner: Option<OwnerId>,
    ) -> Result<ReleaseOutcome, InventoryError> {
        let started = Instant::now();
        if numbers.is_empty() || numbers.len() > self.config.reservation.max_numbers {
            return Err(InventoryError::validation(format!(
                "Between 1 and {} numbers per release",
                self.config.reservation.max_numbers
            )));
        }
        let range = match self.number_range(campaign_id).await {
            Ok(range) => range,
            Err(InventoryError::Store(e)) => {
                return Ok(release_failed(campaign_id, &e, started));
            }
            Err(e) => return Err(e),
        };
        let mut requested: Vec<TicketNumber> =
            numbers.iter().copied().filter(|n| range.contains(*n)).collect();
        requested.sort_unstable();
        requested.dedup();

        match self.release_batch(&range, &requested, owner, None).await {
            Ok(released) => {
                metrics::record_released(released.len());
                if !released.is_empty() {
                    self.invalidate_stats(campaign_id).await;
                }
                tracing::info!(released = released.len(), "Release committed");
                Ok(ReleaseOutcome {
                    campaign_id,
                    message: format!("Released {} numbers", released.len()),
                    released,
                    elapsed_ms: elapsed_ms(started),
                    strategy: WritePath::Release,
                    success: true,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "Release failed");
                Ok(release_failed(campaign_id, &e, started))
            }
        }
    }

    async fn hold(
        &self,
        range: &NumberRange,
        requested: &[TicketNumber],
        owner: OwnerId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        let mut tx = self.store.begin().await?;
        match hold_in_tx(&mut tx, range, requested, owner, now, expires_at).await {
            Ok(reserved) => {
                tx.commit().await?;
                Ok(reserved)
            }
            Err(e) => {
                Self::abort(tx, &e).await;
                Err(e)
            }
        }
    }

    /// Release one batch in its own transaction.
    ///
    /// With `expired_at`, only leases that ran out at that instant are released; the
    /// reclaimer uses this so a lease renewed after the scan is left alone.
    pub(crate) async fn release_batch(
        &self,
        range: &NumberRange,
        numbers: &[TicketNumber],
        owner: Option<OwnerId>,
        expired_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        let mut tx = self.store.begin().await?;
        match release_in_tx(&mut tx, range, numbers, owner, expired_at).await {
            Ok(released) => {
                tx.commit().await?;
                Ok(released)
            }
            Err(e) => {
                Self::abort(tx, &e).await;
                Err(e)
            }
        }
    }
}

async fn hold_in_tx<T: InventoryTx>(
    tx: &mut T,
    range: &NumberRange,
    requested: &[TicketNumber],
    owner: OwnerId,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<Vec<TicketNumber>, StoreError> {
    let campaign_id = range.campaign_id;
    let won = tx.try_occupy(range, requested).await?;
    if !won.is_empty() {
        let entries: Vec<LedgerEntry> = won
            .iter()
            .map(|&number| LedgerEntry::reserved(campaign_id, number, owner, now, expires_at))
            .collect();
        tx.insert_entries(&entries).await?;
        tx.apply_delta(
            campaign_id,
            &[StateDelta::new(&won, NumberState::Available, NumberState::Reserved)],
        )
        .await?;
    }
    Ok(won)
}

async fn release_in_tx<T: InventoryTx>(
    tx: &mut T,
    range: &NumberRange,
    numbers: &[TicketNumber],
    owner: Option<OwnerId>,
    expired_at: Option<DateTime<Utc>>,
) -> Result<Vec<TicketNumber>, StoreError> {
    let campaign_id = range.campaign_id;
    let deleted = tx
        .delete_reserved(campaign_id, numbers, owner, expired_at)
        .await?;
    if deleted.is_empty() {
        return Ok(deleted);
    }
    let cleared = tx.release(range, &deleted).await?;
    if cleared.len() != deleted.len() {
        tracing::warn!(
            campaign_id = %campaign_id,
            deleted = deleted.len(),
            cleared = cleared.len(),
            "Ledger entries without occupancy bit"
        );
    }
    tx.apply_delta(
        campaign_id,
        &[StateDelta::new(&cleared, NumberState::Reserved, NumberState::Available)],
    )
    .await?;
    Ok(cleared)
}

fn reserve_failed(
    campaign_id: CampaignId,
    owner: OwnerId,
    requested: &[TicketNumber],
    expires_at: DateTime<Utc>,
    error: &StoreError,
    started: Instant,
) -> ReservationOutcome {
    ReservationOutcome {
        campaign_id,
        owner_id: owner,
        reserved: Vec::new(),
        unavailable: requested.to_vec(),
        expires_at,
        elapsed_ms: elapsed_ms(started),
        strategy: WritePath::Lease,
        success: false,
        message: format!("Reservation failed and was rolled back: {error}"),
    }
}

fn release_failed(campaign_id: CampaignId, error: &StoreError, started: Instant) -> ReleaseOutcome {
    ReleaseOutcome {
        campaign_id,
        released: Vec::new(),
        elapsed_ms: elapsed_ms(started),
        strategy: WritePath::Release,
        success: false,
        message: format!("Release failed and was rolled back: {error}"),
    }
}
