//! Partition layout helpers.
//!
//! Partitions are planned once when a campaign is set up and never re-split; these
//! helpers map numbers onto that fixed layout.

use crate::types::{NumberRange, NumberState, Partition, PartitionId, StateDelta, TicketNumber};
use std::collections::BTreeMap;

/// Split `range` into consecutive partitions of `partition_size` numbers.
///
/// The last partition absorbs the remainder. Every partition starts fully available;
/// instant-prize numbers are recorded as `excluded_count` and never counted.
#[must_use]
pub fn plan_partitions(range: &NumberRange, partition_size: u64) -> Vec<Partition> {
    let partition_size = partition_size.max(1);
    let mut partitions = Vec::new();
    let mut start = range.start.get();
    let mut index: u32 = 0;
    while start <= range.end.get() {
        let end = start.saturating_add(partition_size - 1).min(range.end.get());
        let (first, last) = (TicketNumber::new(start), TicketNumber::new(end));
        let excluded = range.excluded_between(first, last);
        partitions.push(Partition {
            campaign_id: range.campaign_id,
            partition_id: PartitionId::new(index),
            start: first,
            end: last,
            excluded_count: excluded,
            available_count: end - start + 1 - excluded,
            reserved_count: 0,
            sold_count: 0,
        });
        if end == u64::MAX {
            break;
        }
        start = end + 1;
        index += 1;
    }
    partitions
}

/// Index of the partition containing `number`; `partitions` must be sorted by start.
#[must_use]
pub fn locate(partitions: &[Partition], number: TicketNumber) -> Option<usize> {
    let index = partitions
        .partition_point(|p| p.start <= number)
        .checked_sub(1)?;
    partitions[index].contains(number).then_some(index)
}

/// How many of `numbers` fall into each partition.
///
/// Numbers outside every partition are ignored.
#[must_use]
pub fn count_by_partition(
    partitions: &[Partition],
    numbers: &[TicketNumber],
) -> BTreeMap<PartitionId, u64> {
    let mut counts = BTreeMap::new();
    for &number in numbers {
        if let Some(index) = locate(partitions, number) {
            *counts.entry(partitions[index].partition_id).or_insert(0) += 1;
        }
    }
    counts
}

/// Signed count changes for one partition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CountShift {
    /// Change to `available_count`
    pub available: i64,
    /// Change to `reserved_count`
    pub reserved: i64,
    /// Change to `sold_count`
    pub sold: i64,
}

impl CountShift {
    fn add(&mut self, state: NumberState, n: i64) {
        let count = match state {
            NumberState::Available => &mut self.available,
            NumberState::Reserved => &mut self.reserved,
            NumberState::Sold => &mut self.sold,
        };
        *count = count.saturating_add(n);
    }

    /// Whether no count changes.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.available == 0 && self.reserved == 0 && self.sold == 0
    }
}

/// Net count changes of all `deltas`, keyed in ascending partition order.
///
/// Partitions whose counts end up unchanged are left out.
#[must_use]
pub fn shifts_by_partition(
    partitions: &[Partition],
    deltas: &[StateDelta<'_>],
) -> BTreeMap<PartitionId, CountShift> {
    let mut shifts: BTreeMap<PartitionId, CountShift> = BTreeMap::new();
    for delta in deltas.iter().filter(|d| !d.is_noop()) {
        for (partition_id, n) in count_by_partition(partitions, delta.numbers) {
            let n = i64::try_from(n).unwrap_or(i64::MAX);
            let shift = shifts.entry(partition_id).or_default();
            shift.add(delta.from, -n);
            shift.add(delta.to, n);
        }
    }
    shifts.retain(|_, shift| !shift.is_zero());
    shifts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CampaignId;
    use proptest::prelude::*;

    #[test]
    fn test_plan_covers_range_with_remainder() {
        let range = NumberRange::new(CampaignId::new(), 1, 25).with_instant_prizes([3, 24]);
        let partitions = plan_partitions(&range, 10);
        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[0].start, TicketNumber::new(1));
        assert_eq!(partitions[0].end, TicketNumber::new(10));
        assert_eq!(partitions[0].excluded_count, 1);
        assert_eq!(partitions[2].span(), 5);
        assert_eq!(partitions[2].available_count, 4);
        assert!(partitions.iter().all(Partition::is_consistent));
    }

    #[test]
    fn test_locate_and_count() {
        let range = NumberRange::new(CampaignId::new(), 100, 129);
        let partitions = plan_partitions(&range, 10);
        assert_eq!(locate(&partitions, TicketNumber::new(99)), None);
        assert_eq!(locate(&partitions, TicketNumber::new(100)), Some(0));
        assert_eq!(locate(&partitions, TicketNumber::new(119)), Some(1));
        assert_eq!(locate(&partitions, TicketNumber::new(130)), None);

        let numbers: Vec<_> = [101, 102, 125, 500].into_iter().map(TicketNumber::new).collect();
        let counts = count_by_partition(&partitions, &numbers);
        assert_eq!(counts.get(&PartitionId::new(0)), Some(&2));
        assert_eq!(counts.get(&PartitionId::new(2)), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn test_shifts_merge_deltas_in_partition_order() {
        let range = NumberRange::new(CampaignId::new(), 1, 30);
        let partitions = plan_partitions(&range, 10);
        let held: Vec<_> = [25, 26].into_iter().map(TicketNumber::new).collect();
        let won: Vec<_> = [3, 27].into_iter().map(TicketNumber::new).collect();

        let shifts = shifts_by_partition(
            &partitions,
            &[
                StateDelta::new(&held, NumberState::Reserved, NumberState::Sold),
                StateDelta::new(&won, NumberState::Available, NumberState::Sold),
                StateDelta::new(&won, NumberState::Sold, NumberState::Sold),
            ],
        );

        let keys: Vec<_> = shifts.keys().copied().collect();
        assert_eq!(keys, vec![PartitionId::new(0), PartitionId::new(2)]);
        assert_eq!(
            shifts[&PartitionId::new(0)],
            CountShift { available: -1, reserved: 0, sold: 1 }
        );
        assert_eq!(
            shifts[&PartitionId::new(2)],
            CountShift { available: -1, reserved: -2, sold: 3 }
        );
    }

    #[test]
    fn test_shifts_drop_cancelled_partitions() {
        let range = NumberRange::new(CampaignId::new(), 1, 10);
        let partitions = plan_partitions(&range, 10);
        let numbers = [TicketNumber::new(4)];

        let shifts = shifts_by_partition(
            &partitions,
            &[
                StateDelta::new(&numbers, NumberState::Available, NumberState::Reserved),
                StateDelta::new(&numbers, NumberState::Reserved, NumberState::Available),
            ],
        );

        assert!(shifts.is_empty());
    }

    proptest! {
        #[test]
        fn prop_plan_sizes_sum_to_eligible(
            start in 0u64..1_000,
            len in 1u64..5_000,
            size in 1u64..700,
            prizes in proptest::collection::vec(0u64..6_000, 0..20),
        ) {
            let range = NumberRange::new(CampaignId::new(), start, start + len - 1)
                .with_instant_prizes(prizes);
            let partitions = plan_partitions(&range, size);
            let total: u64 = partitions.iter().map(Partition::size).sum();
            prop_assert_eq!(total, range.eligible_size());
            prop_assert!(partitions.iter().all(Partition::is_consistent));
            prop_assert_eq!(partitions.first().map(|p| p.start), Some(range.start));
            prop_assert_eq!(partitions.last().map(|p| p.end), Some(range.end));
        }
    }
}
