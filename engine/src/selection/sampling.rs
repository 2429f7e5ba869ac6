//! Uniform random draws checked against the ledger one at a time.
//!
//! Cheap while most of the pool is free: the expected number of draws per hit is
//! `1 / ratio`, and the attempt cap bounds the worst case.

use rand::Rng;
use rand::rngs::StdRng;
use raffle_inventory_core::store::InventoryStore;
use raffle_inventory_core::{NumberRange, StoreError, TicketNumber};
use std::collections::BTreeSet;

pub(crate) async fn sample<S: InventoryStore>(
    store: &S,
    range: &NumberRange,
    count: usize,
    max_attempts: usize,
    rng: &mut StdRng,
) -> Result<Vec<TicketNumber>, StoreError> {
    let mut picked = BTreeSet::new();
    let mut attempts = 0;
    while picked.len() < count && attempts < max_attempts {
        attempts += 1;
        let candidate = TicketNumber::new(rng.gen_range(range.start.get()..=range.end.get()));
        if range.is_instant_prize(candidate) || picked.contains(&candidate) {
            continue;
        }
        let occupied = store
            .occupied_among(range.campaign_id, &[candidate])
            .await?;
        if occupied.is_empty() {
            picked.insert(candidate);
        }
    }
    tracing::trace!(attempts, found = picked.len(), "Sampling finished");
    Ok(picked.into_iter().collect())
}
