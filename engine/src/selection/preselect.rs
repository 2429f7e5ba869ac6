//! Enumerate every free number and shuffle.
//!
//! Linear in the range size, so it only runs when few numbers are left.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use raffle_inventory_core::store::InventoryStore;
use raffle_inventory_core::{NumberRange, StoreError, TicketNumber};

pub(crate) async fn preselect<S: InventoryStore>(
    store: &S,
    range: &NumberRange,
    count: usize,
    rng: &mut StdRng,
) -> Result<Vec<TicketNumber>, StoreError> {
    let mut occupied = store.occupied_numbers(range.campaign_id).await?;
    occupied.sort_unstable();
    let mut free = complement(range, &occupied);
    let (chosen, _) = free.partial_shuffle(rng, count);
    let mut chosen = chosen.to_vec();
    chosen.sort_unstable();
    Ok(chosen)
}

/// Numbers of `range` that are neither in `occupied` (ascending) nor instant prizes.
pub(crate) fn complement(range: &NumberRange, occupied: &[TicketNumber]) -> Vec<TicketNumber> {
    let mut blocked = occupied.iter().peekable();
    let mut prizes = range.instant_prize_numbers.iter().peekable();
    let mut free = Vec::new();
    for value in range.start.get()..=range.end.get() {
        let number = TicketNumber::new(value);
        while blocked.next_if(|n| **n < number).is_some() {}
        while prizes.next_if(|n| **n < number).is_some() {}
        let is_blocked = blocked.peek().is_some_and(|n| **n == number)
            || prizes.peek().is_some_and(|n| **n == number);
        if !is_blocked {
            free.push(number);
        }
    }
    free
}

#[cfg(test)]
mod tests {
    use super::*;
    use raffle_inventory_core::CampaignId;

    #[test]
    fn test_complement_skips_occupied_and_prizes() {
        let range = NumberRange::new(CampaignId::new(), 1, 10).with_instant_prizes([4]);
        let occupied: Vec<_> = [1, 2, 3, 9].into_iter().map(TicketNumber::new).collect();
        let free = complement(&range, &occupied);
        let expected: Vec<_> = [5, 6, 7, 8, 10].into_iter().map(TicketNumber::new).collect();
        assert_eq!(free, expected);
    }
}
