//! Operation results.
//!
//! Shortfalls, lost races and storage failures are reported here rather than as
//! errors; every outcome carries the elapsed time for observability.

use chrono::{DateTime, Utc};
use raffle_inventory_core::{CampaignId, OwnerId, TicketNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Selection algorithm that produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Weighted partition pick plus bitmap scan
    Partition,
    /// Uniform random draws checked one at a time
    Sampling,
    /// Rounds of random candidates checked in bulk
    Batched,
    /// Enumerate the free complement and shuffle
    PreSelection,
}

impl Strategy {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Partition => "partition",
            Self::Sampling => "sampling",
            Self::Batched => "batched",
            Self::PreSelection => "pre_selection",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write path that produced a purchase, reservation or release result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePath {
    /// Compare-and-set purchase with reservation conversion
    Finalizer,
    /// Compare-and-set lease
    Lease,
    /// Idempotent return to the pool
    Release,
}

impl WritePath {
    /// Label used in logs and responses.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Finalizer => "finalizer",
            Self::Lease => "lease",
            Self::Release => "release",
        }
    }
}

/// Result of `select`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionOutcome {
    /// Campaign
    pub campaign_id: CampaignId,
    /// Advisory numbers, unique, none sold at read time
    pub numbers: Vec<TicketNumber>,
    /// Strategy that produced `numbers`
    pub strategy: Strategy,
    /// Wall time spent
    pub elapsed_ms: u64,
    /// `false` only on infrastructure failure
    pub success: bool,
    /// Human-readable summary
    pub message: String,
    /// Numbers asked for
    pub requested: usize,
    /// Numbers available according to the stats used for dispatch
    pub available: u64,
}

impl SelectionOutcome {
    /// Whether fewer numbers were found than requested.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.success && self.numbers.len() < self.requested
    }
}

/// Result of `purchase`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOutcome {
    /// Campaign
    pub campaign_id: CampaignId,
    /// Buyer
    pub buyer_id: OwnerId,
    /// Numbers now sold to the buyer, ascending
    pub purchased: Vec<TicketNumber>,
    /// Requested numbers that were not sold to the buyer
    pub unavailable: Vec<TicketNumber>,
    /// Whether this is the stored result of an earlier call with the same key
    pub replayed: bool,
    /// Wall time spent
    pub elapsed_ms: u64,
    /// Write path taken
    pub strategy: WritePath,
    /// `false` when the transaction was rolled back
    pub success: bool,
    /// Human-readable summary
    pub message: String,
}

/// Result of `reserve`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationOutcome {
    /// Campaign
    pub campaign_id: CampaignId,
    /// Lease holder
    pub owner_id: OwnerId,
    /// Numbers now held, ascending
    pub reserved: Vec<TicketNumber>,
    /// Requested numbers that were already occupied
    pub unavailable: Vec<TicketNumber>,
    /// End of the lease
    pub expires_at: DateTime<Utc>,
    /// Wall time spent
    pub elapsed_ms: u64,
    /// Write path taken
    pub strategy: WritePath,
    /// `false` when the transaction was rolled back
    pub success: bool,
    /// Human-readable summary
    pub message: String,
}

/// Result of `release`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseOutcome {
    /// Campaign
    pub campaign_id: CampaignId,
    /// Numbers returned to the pool, ascending
    pub released: Vec<TicketNumber>,
    /// Wall time spent
    pub elapsed_ms: u64,
    /// Write path taken
    pub strategy: WritePath,
    /// `false` when the transaction was rolled back
    pub success: bool,
    /// Human-readable summary
    pub message: String,
}

/// Result of a partition audit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Partitions recounted
    pub partitions: usize,
    /// Partitions whose cached counts were corrected
    pub corrected: usize,
    /// Partitions where bitmap and ledger disagree
    pub bitmap_mismatches: usize,
}

#[allow(clippy::cast_possible_truncation)] // u64 millis covers 584 million years
pub(crate) fn elapsed_ms(started: std::time::Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
