//! Purchase finalizer.
//!
//! The only path that makes numbers SOLD. Candidates are re-validated at write time:
//! numbers the buyer holds under a live reservation convert in place, everything else
//! must win the occupancy compare-and-set. Numbers that lost a race are reported, never
//! treated as an error.

use crate::outcome::{PurchaseOutcome, WritePath, elapsed_ms};
use crate::{InventoryEngine, difference, metrics};
use chrono::{DateTime, Utc};
use raffle_inventory_core::store::{InventoryStore, InventoryTx};
use raffle_inventory_core::{
    CampaignId, InventoryError, LedgerEntry, NumberRange, NumberState, OwnerId,
    PaymentMeta, PurchaseReceipt, StateDelta, StoreError, TicketNumber,
};
use std::time::Instant;

/// What a purchase transaction did.
enum Finalized {
    Sold(Vec<TicketNumber>),
    AlreadyClaimed,
}

impl<S: InventoryStore> InventoryEngine<S> {
    /// Sell `numbers` to `buyer`.
    ///
    /// Each number is sold at most once across all concurrent callers. With an
    /// idempotency key, a repeated call returns the original result instead of trying
    /// to occupy anything again.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::Validation`] for an empty or oversized request, numbers
    ///   outside the range, instant-prize numbers, or a key used by another buyer
    /// - [`InventoryError::CampaignNotFound`] for an unknown campaign
    ///
    /// Storage failures roll back and produce an outcome with `success == false`.
    #[tracing::instrument(skip(self, numbers, payment), fields(count = numbers.len()))]
    pub async fn purchase(
        &self,
        campaign_id: CampaignId,
        numbers: &[TicketNumber],
        buyer: OwnerId,
        payment: PaymentMeta,
    ) -> Result<PurchaseOutcome, InventoryError> {
        let started = Instant::now();
        let range = match self.number_range(campaign_id).await {
            Ok(range) => range,
            Err(InventoryError::Store(e)) => {
                return Ok(failed(campaign_id, buyer, numbers, &e, started));
            }
            Err(e) => return Err(e),
        };
        let requested = self.validate_numbers(&range, numbers)?;

        if let Some(key) = &payment.idempotency_key {
            match self.store.purchase_receipt(campaign_id, key).await {
                Ok(Some(receipt)) => return replay(&receipt, buyer, &requested, started),
                Ok(None) => {}
                Err(e) => return Ok(failed(campaign_id, buyer, &requested, &e, started)),
            }
        }

        let now = self.clock.now();
        match self.finalize(&range, &requested, buyer, &payment, now).await {
            Ok(Finalized::Sold(purchased)) => {
                let unavailable = difference(&requested, &purchased);
                metrics::record_sold(purchased.len());
                metrics::record_conflicts("purchase", unavailable.len());
                self.invalidate_stats(campaign_id).await;
                tracing::info!(
                    purchased = purchased.len(),
                    unavailable = unavailable.len(),
                    "Purchase committed"
                );
                let message = if unavailable.is_empty() {
                    format!("Purchased {} numbers", purchased.len())
                } else {
                    format!(
                        "Purchased {} of {} numbers; {} no longer available",
                        purchased.len(),
                        requested.len(),
                        unavailable.len()
                    )
                };
                Ok(PurchaseOutcome {
                    campaign_id,
                    buyer_id: buyer,
                    purchased,
                    unavailable,
                    replayed: false,
                    elapsed_ms: elapsed_ms(started),
                    strategy: WritePath::Finalizer,
                    success: true,
                    message,
                })
            }
            Ok(Finalized::AlreadyClaimed) => {
                let key = payment.idempotency_key.as_ref();
                let stored = match key {
                    Some(key) => self.store.purchase_receipt(campaign_id, key).await,
                    None => Ok(None),
                };
                match stored {
                    Ok(Some(receipt)) => replay(&receipt, buyer, &requested, started),
                    Ok(None) => Ok(failed(
                        campaign_id,
                        buyer,
                        &requested,
                        &StoreError::Conflict("Idempotency key claimed but receipt missing".into()),
                        started,
                    )),
                    Err(e) => Ok(failed(campaign_id, buyer, &requested, &e, started)),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Purchase failed");
                Ok(failed(campaign_id, buyer, &requested, &e, started))
            }
        }
    }

    async fn finalize(
        &self,
        range: &NumberRange,
        requested: &[TicketNumber],
        buyer: OwnerId,
        payment: &PaymentMeta,
        now: DateTime<Utc>,
    ) -> Result<Finalized, StoreError> {
        let mut tx = self.store.begin().await?;
        match sell_in_tx(&mut tx, range, requested, buyer, payment, now).await {
            Ok(Finalized::Sold(purchased)) => {
                tx.commit().await?;
                Ok(Finalized::Sold(purchased))
            }
            Ok(Finalized::AlreadyClaimed) => {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(error = %e, "Rollback after duplicate claim failed");
                }
                Ok(Finalized::AlreadyClaimed)
            }
            Err(e) => {
                Self::abort(tx, &e).await;
                Err(e)
            }
        }
    }
}

async fn sell_in_tx<T: InventoryTx>(
    tx: &mut T,
    range: &NumberRange,
    requested: &[TicketNumber],
    buyer: OwnerId,
    payment: &PaymentMeta,
    now: DateTime<Utc>,
) -> Result<Finalized, StoreError> {
    let campaign_id = range.campaign_id;
    if let Some(key) = &payment.idempotency_key {
        let receipt = PurchaseReceipt {
            campaign_id,
            idempotency_key: key.clone(),
            buyer_id: buyer,
            numbers: Vec::new(),
            created_at: now,
        };
        if !tx.claim_receipt(&receipt).await? {
            return Ok(Finalized::AlreadyClaimed);
        }
    }

    // Lock order: held ledger rows, then occupancy chunks, then partitions.
    let held = tx.held_by_owner(campaign_id, requested, buyer, now).await?;
    let free_candidates = difference(requested, &held);
    let won = tx.try_occupy(range, &free_candidates).await?;

    if !held.is_empty() {
        tx.mark_sold(campaign_id, &held, payment.payment_ref.as_deref())
            .await?;
    }
    if !won.is_empty() {
        let entries: Vec<LedgerEntry> = won
            .iter()
            .map(|&number| {
                LedgerEntry::sold(campaign_id, number, buyer, now, payment.payment_ref.clone())
            })
            .collect();
        tx.insert_entries(&entries).await?;
    }
    tx.apply_delta(
        campaign_id,
        &[
            StateDelta::new(&held, NumberState::Reserved, NumberState::Sold),
            StateDelta::new(&won, NumberState::Available, NumberState::Sold),
        ],
    )
    .await?;

    let mut purchased = held;
    purchased.extend(won);
    purchased.sort_unstable();

    if let Some(key) = &payment.idempotency_key {
        tx.complete_receipt(campaign_id, key, &purchased).await?;
    }
    Ok(Finalized::Sold(purchased))
}

fn replay(
    receipt: &PurchaseReceipt,
    buyer: OwnerId,
    requested: &[TicketNumber],
    started: Instant,
) -> Result<PurchaseOutcome, InventoryError> {
    if receipt.buyer_id != buyer {
        return Err(InventoryError::validation(
            "Idempotency key already used by another buyer",
        ));
    }
    metrics::record_replay();
    tracing::info!(
        key = %receipt.idempotency_key,
        purchased = receipt.numbers.len(),
        "Returning stored purchase result"
    );
    Ok(PurchaseOutcome {
        campaign_id: receipt.campaign_id,
        buyer_id: buyer,
        purchased: receipt.numbers.clone(),
        unavailable: difference(requested, &receipt.numbers),
        replayed: true,
        elapsed_ms: elapsed_ms(started),
        strategy: WritePath::Finalizer,
        success: true,
        message: format!(
            "Purchase already processed; {} numbers sold",
            receipt.numbers.len()
        ),
    })
}

fn failed(
    campaign_id: CampaignId,
    buyer: OwnerId,
    requested: &[TicketNumber],
    error: &StoreError,
    started: Instant,
) -> PurchaseOutcome {
    PurchaseOutcome {
        campaign_id,
        buyer_id: buyer,
        purchased: Vec::new(),
        unavailable: requested.to_vec(),
        replayed: false,
        elapsed_ms: elapsed_ms(started),
        strategy: WritePath::Finalizer,
        success: false,
        message: format!("Purchase failed and was rolled back: {error}"),
    }
}

