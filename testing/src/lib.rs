//! # Raffle Inventory Testing
//!
//! Testing utilities for the raffle inventory.
//!
//! This crate provides:
//! - [`InMemoryInventoryStore`]: serialised in-memory store with rollback and fault
//!   injection
//! - [`InMemoryStatsCache`]: TTL snapshot cache driven by an injected clock
//! - Deterministic clocks
//! - Fixtures that seed inventory through the regular transaction API
//! - proptest strategies for domain types
//!
//! ## Example
//!
//! ```ignore
//! use raffle_inventory_testing::{InMemoryInventoryStore, test_clock, fixtures};
//!
//! #[tokio::test]
//! async fn test_purchase() {
//!     let store = Arc::new(InMemoryInventoryStore::new());
//!     let engine = InventoryEngine::new(store.clone(), Arc::new(test_clock()), EngineConfig::default());
//!     let range = fixtures::small_range(1, 1000);
//!     engine.initialize_campaign(range.clone()).await?;
//!     // ...
//! }
//! ```

mod inventory_mocks;
mod stats_mocks;

pub use inventory_mocks::{InMemoryInventoryStore, InMemoryTx};
pub use stats_mocks::InMemoryStatsCache;

use chrono::{DateTime, Utc};
use raffle_inventory_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, PoisonError, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use raffle_inventory_testing::mocks::FixedClock;
    /// use raffle_inventory_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(epoch())
    }

    /// 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and give another to
    /// the engine.
    ///
    /// ```
    /// use raffle_inventory_testing::mocks::ManualClock;
    /// use raffle_inventory_core::environment::Clock;
    ///
    /// let clock = ManualClock::default();
    /// let start = clock.now();
    /// clock.advance(chrono::Duration::seconds(30));
    /// assert_eq!(clock.now() - start, chrono::Duration::seconds(30));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move forward by `by`.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(epoch())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }
}

/// Fixtures that set up inventory through the transaction API.
///
/// Seeding goes through [`InventoryTx`](raffle_inventory_core::store::InventoryTx), so
/// the seeded state satisfies the same invariants as state written by the engine and
/// the helpers work against any store.
pub mod fixtures {
    use chrono::{DateTime, Utc};
    use raffle_inventory_core::partition::plan_partitions;
    use raffle_inventory_core::store::{InventoryStore, InventoryTx};
    use raffle_inventory_core::{
        CampaignId, LedgerEntry, NumberRange, NumberState, OwnerId, StateDelta, StoreError,
        TicketNumber,
    };

    /// A fresh campaign range.
    #[must_use]
    pub fn small_range(start: u64, end: u64) -> NumberRange {
        NumberRange::new(CampaignId::new(), start, end)
    }

    /// Ticket numbers from plain integers.
    #[must_use]
    pub fn numbers(values: impl IntoIterator<Item = u64>) -> Vec<TicketNumber> {
        values.into_iter().map(TicketNumber::new).collect()
    }

    /// Create a campaign directly, partitioned with `partition_size` if given.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn create_campaign<S: InventoryStore>(
        store: &S,
        range: &NumberRange,
        partition_size: Option<u64>,
    ) -> Result<(), StoreError> {
        let partitions = partition_size
            .map(|size| plan_partitions(range, size))
            .unwrap_or_default();
        let mut tx = store.begin().await?;
        tx.create_campaign(range, &partitions).await?;
        tx.commit().await
    }

    /// Mark `numbers` sold to `owner` in one transaction.
    ///
    /// Returns the numbers that were free and are now sold.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn seed_sold<S: InventoryStore>(
        store: &S,
        range: &NumberRange,
        numbers: &[TicketNumber],
        owner: OwnerId,
        at: DateTime<Utc>,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        let mut tx = store.begin().await?;
        let won = tx.try_occupy(range, numbers).await?;
        let entries: Vec<_> = won
            .iter()
            .map(|&n| LedgerEntry::sold(range.campaign_id, n, owner, at, None))
            .collect();
        tx.insert_entries(&entries).await?;
        tx.apply_delta(
            range.campaign_id,
            &[StateDelta::new(&won, NumberState::Available, NumberState::Sold)],
        )
        .await?;
        tx.commit().await?;
        Ok(won)
    }

    /// Reserve `numbers` for `owner` until `expires_at` in one transaction.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn seed_reserved<S: InventoryStore>(
        store: &S,
        range: &NumberRange,
        numbers: &[TicketNumber],
        owner: OwnerId,
        at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Vec<TicketNumber>, StoreError> {
        let mut tx = store.begin().await?;
        let won = tx.try_occupy(range, numbers).await?;
        let entries: Vec<_> = won
            .iter()
            .map(|&n| LedgerEntry::reserved(range.campaign_id, n, owner, at, expires_at))
            .collect();
        tx.insert_entries(&entries).await?;
        tx.apply_delta(
            range.campaign_id,
            &[StateDelta::new(&won, NumberState::Available, NumberState::Reserved)],
        )
        .await?;
        tx.commit().await?;
        Ok(won)
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use raffle_inventory_core::{CampaignId, NumberRange};

    /// Ranges of 1..=`max_len` numbers with a few instant prizes inside.
    pub fn number_range(max_len: u64) -> impl Strategy<Value = NumberRange> {
        (0u64..10_000, 1u64..=max_len).prop_flat_map(|(start, len)| {
            let end = start + len - 1;
            proptest::collection::vec(start..=end, 0..4).prop_map(move |prizes| {
                NumberRange::new(CampaignId::new(), start, end).with_instant_prizes(prizes)
            })
        })
    }
}

pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::default();
        let handle = clock.clone();
        handle.advance(chrono::Duration::seconds(60));
        assert_eq!(clock.now(), mocks::epoch() + chrono::Duration::seconds(60));
    }
}
