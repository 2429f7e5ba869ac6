//! # Raffle Inventory Core
//!
//! Domain types and storage seams for the raffle ticket-number inventory.
//!
//! ## Core Concepts
//!
//! - **Number range**: the contiguous pool of a campaign, minus instant-prize numbers
//! - **Occupancy bitmap**: one bit per number, set while reserved or sold
//! - **Partition**: a sub-range with cached available/reserved/sold counts
//! - **Ledger**: authoritative record of every reserved or sold number
//!
//! A ledger entry exists if and only if the number's occupancy bit is set. Both change
//! in the same [`store::InventoryTx`], together with the partition counts.

pub mod bitmap;
pub mod error;
pub mod partition;
pub mod stats;
pub mod store;
pub mod types;

pub use error::{InventoryError, StoreError};
pub use types::{
    AvailabilityStats, CampaignId, EntryStatus, ExpiredReservations, IdempotencyKey,
    LedgerEntry, NumberRange, NumberState, OwnerId, Partition, PartitionId, PaymentMeta,
    PurchaseReceipt, StateDelta, StatsSource, TicketNumber,
};

/// Environment traits injected into the engine.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
