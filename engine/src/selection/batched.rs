//! Rounds of random candidates checked against the ledger in bulk.
//!
//! A round that yields nothing new is bad luck rather than proof of exhaustion, so the
//! search only stops after several consecutive empty rounds. The caller decides what
//! to do with a stalled search.

use crate::config::SelectionConfig;
use rand::Rng;
use rand::rngs::StdRng;
use raffle_inventory_core::store::InventoryStore;
use raffle_inventory_core::{NumberRange, StoreError, TicketNumber};
use std::collections::BTreeSet;

/// Numbers found plus whether the search hit the empty-round limit.
pub(crate) struct BatchedSearch {
    pub numbers: Vec<TicketNumber>,
    pub stalled: bool,
}

pub(crate) async fn search<S: InventoryStore>(
    store: &S,
    range: &NumberRange,
    count: usize,
    config: &SelectionConfig,
    rng: &mut StdRng,
) -> Result<BatchedSearch, StoreError> {
    let mut picked = BTreeSet::new();
    let mut empty_rounds = 0;
    let mut stalled = false;

    for round in 0..config.max_rounds {
        if picked.len() >= count {
            break;
        }
        let mut candidates = BTreeSet::new();
        for _ in 0..config.batch_size {
            let candidate =
                TicketNumber::new(rng.gen_range(range.start.get()..=range.end.get()));
            if !range.is_instant_prize(candidate) && !picked.contains(&candidate) {
                candidates.insert(candidate);
            }
        }
        let candidates: Vec<_> = candidates.into_iter().collect();
        let occupied = store
            .occupied_among(range.campaign_id, &candidates)
            .await?;

        let before = picked.len();
        for candidate in candidates {
            if picked.len() >= count {
                break;
            }
            if !occupied.contains(&candidate) {
                picked.insert(candidate);
            }
        }

        if picked.len() == before {
            empty_rounds += 1;
            tracing::debug!(round, empty_rounds, "Batched round found no free number");
            if empty_rounds >= config.max_empty_rounds {
                stalled = true;
                break;
            }
        } else {
            empty_rounds = 0;
        }
    }

    Ok(BatchedSearch {
        numbers: picked.into_iter().collect(),
        stalled,
    })
}
