//! Domain types for the raffle number inventory.
//!
//! This module contains the identifiers, value objects and records shared by every
//! layer: the number range of a campaign, its partitions, ledger entries and the
//! availability snapshot consumed by the selection engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::bitmap::MAX_RANGE_SIZE;
use crate::error::InventoryError;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a campaign (one raffle instance).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(Uuid);

impl CampaignId {
    /// Creates a new random `CampaignId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `CampaignId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CampaignId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a buyer or reservation holder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(Uuid);

impl OwnerId {
    /// Creates a new random `OwnerId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `OwnerId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ticket number inside a campaign's pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketNumber(u64);

impl TicketNumber {
    /// Creates a new `TicketNumber`
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TicketNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a partition within a campaign (0-based, ascending by start number).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(u32);

impl PartitionId {
    /// Creates a new `PartitionId`
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the numeric value
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Idempotency key supplied by the payment flow.
///
/// Keys are scoped per campaign and must be between 16 and 128 characters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Minimum accepted key length.
    pub const MIN_LEN: usize = 16;
    /// Maximum accepted key length.
    pub const MAX_LEN: usize = 128;

    /// Validate and wrap an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] if the key length is out of bounds.
    pub fn parse(key: impl Into<String>) -> Result<Self, InventoryError> {
        let key = key.into();
        if key.len() < Self::MIN_LEN || key.len() > Self::MAX_LEN {
            return Err(InventoryError::validation(format!(
                "Idempotency key must be between {} and {} characters",
                Self::MIN_LEN,
                Self::MAX_LEN
            )));
        }
        Ok(Self(key))
    }

    /// Borrow the key
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = InventoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Number range
// ============================================================================

/// The contiguous pool of numbers assigned to a campaign.
///
/// Immutable once the campaign is published. Instant-prize numbers are part of the
/// range but permanently excluded from general availability.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberRange {
    /// Campaign this range belongs to
    pub campaign_id: CampaignId,
    /// First number (inclusive)
    pub start: TicketNumber,
    /// Last number (inclusive)
    pub end: TicketNumber,
    /// Numbers reserved for instant prizes
    pub instant_prize_numbers: BTreeSet<TicketNumber>,
}

impl NumberRange {
    /// Creates a new range without instant-prize numbers.
    #[must_use]
    pub const fn new(campaign_id: CampaignId, start: u64, end: u64) -> Self {
        Self {
            campaign_id,
            start: TicketNumber::new(start),
            end: TicketNumber::new(end),
            instant_prize_numbers: BTreeSet::new(),
        }
    }

    /// Attach instant-prize numbers.
    #[must_use]
    pub fn with_instant_prizes(mut self, numbers: impl IntoIterator<Item = u64>) -> Self {
        self.instant_prize_numbers
            .extend(numbers.into_iter().map(TicketNumber::new));
        self
    }

    /// Total numbers in the range, instant prizes included.
    #[must_use]
    pub const fn size(&self) -> u64 {
        if self.end.get() < self.start.get() {
            return 0;
        }
        (self.end.get() - self.start.get()).saturating_add(1)
    }

    /// Whether `number` lies inside the range.
    #[must_use]
    pub const fn contains(&self, number: TicketNumber) -> bool {
        number.get() >= self.start.get() && number.get() <= self.end.get()
    }

    /// Whether `number` is an instant-prize number.
    #[must_use]
    pub fn is_instant_prize(&self, number: TicketNumber) -> bool {
        self.instant_prize_numbers.contains(&number)
    }

    /// Whether `number` can be reserved or sold.
    #[must_use]
    pub fn is_sellable(&self, number: TicketNumber) -> bool {
        self.contains(number) && !self.is_instant_prize(number)
    }

    /// Number of instant-prize numbers inside `[start, end]`.
    #[must_use]
    pub fn excluded_between(&self, start: TicketNumber, end: TicketNumber) -> u64 {
        if end < start {
            return 0;
        }
        self.instant_prize_numbers.range(start..=end).count() as u64
    }

    /// Size of the general-availability pool.
    #[must_use]
    pub fn eligible_size(&self) -> u64 {
        self.size() - self.excluded_between(self.start, self.end)
    }

    /// Offset of `number` from the start of the range.
    #[must_use]
    pub const fn offset_of(&self, number: TicketNumber) -> u64 {
        number.get() - self.start.get()
    }

    /// Check structural validity.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Validation`] if `end < start` or the range is larger
    /// than the occupancy bitmap can address ([`MAX_RANGE_SIZE`]).
    pub fn validate(&self) -> Result<(), InventoryError> {
        if self.end < self.start {
            return Err(InventoryError::validation(format!(
                "Range end {} is before start {}",
                self.end, self.start
            )));
        }
        if self.size() > MAX_RANGE_SIZE {
            return Err(InventoryError::validation(format!(
                "Range of {} numbers exceeds the maximum of {MAX_RANGE_SIZE}",
                self.size()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Partitions
// ============================================================================

/// A contiguous sub-range of a campaign with cached aggregate counts.
///
/// Invariant: `available_count + reserved_count + sold_count == size()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Campaign this partition belongs to
    pub campaign_id: CampaignId,
    /// Partition index
    pub partition_id: PartitionId,
    /// First number (inclusive)
    pub start: TicketNumber,
    /// Last number (inclusive)
    pub end: TicketNumber,
    /// Instant-prize numbers inside the partition (never counted)
    pub excluded_count: u64,
    /// Numbers whose occupancy bit is clear
    pub available_count: u64,
    /// Numbers currently held by a reservation
    pub reserved_count: u64,
    /// Numbers permanently sold
    pub sold_count: u64,
}

impl Partition {
    /// Numbers covered by the partition, instant prizes included.
    #[must_use]
    pub const fn span(&self) -> u64 {
        self.end.get() - self.start.get() + 1
    }

    /// Numbers that take part in availability accounting.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.span() - self.excluded_count
    }

    /// Whether `number` falls inside this partition.
    #[must_use]
    pub const fn contains(&self, number: TicketNumber) -> bool {
        number.get() >= self.start.get() && number.get() <= self.end.get()
    }

    /// Whether the cached counts add up.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.available_count + self.reserved_count + self.sold_count == self.size()
    }

    /// Adjust counts for `n` numbers moving from one state to another.
    ///
    /// Saturates instead of underflowing; a saturated move leaves the partition
    /// inconsistent, which `is_consistent` and the recount catch.
    pub fn shift(&mut self, from: NumberState, to: NumberState, n: u64) {
        if from == to || n == 0 {
            return;
        }
        let from_count = self.count_mut(from);
        *from_count = from_count.saturating_sub(n);
        *self.count_mut(to) += n;
    }

    fn count_mut(&mut self, state: NumberState) -> &mut u64 {
        match state {
            NumberState::Available => &mut self.available_count,
            NumberState::Reserved => &mut self.reserved_count,
            NumberState::Sold => &mut self.sold_count,
        }
    }
}

/// State of a number for partition accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberState {
    /// Occupancy bit clear
    Available,
    /// Held by a time-bounded lease
    Reserved,
    /// Permanently sold
    Sold,
}

/// Numbers moving from one state to another within a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateDelta<'a> {
    /// Numbers changing state
    pub numbers: &'a [TicketNumber],
    /// State they leave
    pub from: NumberState,
    /// State they enter
    pub to: NumberState,
}

impl<'a> StateDelta<'a> {
    /// Move `numbers` from `from` to `to`.
    #[must_use]
    pub const fn new(numbers: &'a [TicketNumber], from: NumberState, to: NumberState) -> Self {
        Self { numbers, from, to }
    }

    /// Whether applying this delta leaves every count unchanged.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.numbers.is_empty() || self.from == self.to
    }
}

impl From<EntryStatus> for NumberState {
    fn from(status: EntryStatus) -> Self {
        match status {
            EntryStatus::Reserved => Self::Reserved,
            EntryStatus::Sold => Self::Sold,
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// Status of a ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Held until `expires_at`
    Reserved,
    /// Sold; permanent history
    Sold,
}

impl EntryStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Sold => "sold",
        }
    }

    /// Parse status from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserved" => Some(Self::Reserved),
            "sold" => Some(Self::Sold),
            _ => None,
        }
    }
}

/// Authoritative record of a reserved or sold number.
///
/// An entry exists if and only if the number's occupancy bit is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Campaign
    pub campaign_id: CampaignId,
    /// Ticket number
    pub number: TicketNumber,
    /// Reserved or sold
    pub status: EntryStatus,
    /// Buyer or reservation holder
    pub owner_id: OwnerId,
    /// When the number was first occupied
    pub reserved_at: DateTime<Utc>,
    /// Lease expiry (`None` once sold)
    pub expires_at: Option<DateTime<Utc>>,
    /// Payment reference supplied by the payment flow
    pub payment_ref: Option<String>,
}

impl LedgerEntry {
    /// A reservation lease.
    #[must_use]
    pub const fn reserved(
        campaign_id: CampaignId,
        number: TicketNumber,
        owner_id: OwnerId,
        reserved_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            campaign_id,
            number,
            status: EntryStatus::Reserved,
            owner_id,
            reserved_at,
            expires_at: Some(expires_at),
            payment_ref: None,
        }
    }

    /// A direct sale.
    #[must_use]
    pub const fn sold(
        campaign_id: CampaignId,
        number: TicketNumber,
        owner_id: OwnerId,
        sold_at: DateTime<Utc>,
        payment_ref: Option<String>,
    ) -> Self {
        Self {
            campaign_id,
            number,
            status: EntryStatus::Sold,
            owner_id,
            reserved_at: sold_at,
            expires_at: None,
            payment_ref,
        }
    }

    /// Whether this is a reservation whose lease has run out at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == EntryStatus::Reserved && self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Payment metadata attached to a purchase.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMeta {
    /// Reference of the payment in the gateway
    pub payment_ref: Option<String>,
    /// Key owned by the payment flow that makes the purchase idempotent
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Stored result of an idempotent purchase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    /// Campaign
    pub campaign_id: CampaignId,
    /// Idempotency key
    pub idempotency_key: IdempotencyKey,
    /// Buyer
    pub buyer_id: OwnerId,
    /// Numbers actually sold by the original call
    pub numbers: Vec<TicketNumber>,
    /// When the receipt was claimed
    pub created_at: DateTime<Utc>,
}

/// Expired reservations of one campaign, as produced by the reclaimer scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpiredReservations {
    /// Campaign
    pub campaign_id: CampaignId,
    /// Numbers whose lease has run out, ascending
    pub numbers: Vec<TicketNumber>,
}

// ============================================================================
// Availability snapshot
// ============================================================================

/// Where an availability figure came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsSource {
    /// Cached aggregate snapshot (a hint)
    Snapshot,
    /// Computed from the ledger count
    Ledger,
}

/// Aggregate availability of a campaign.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityStats {
    /// Campaign
    pub campaign_id: CampaignId,
    /// Numbers in the range
    pub total_numbers: u64,
    /// Instant-prize numbers
    pub excluded: u64,
    /// Ledger entries (reserved + sold)
    pub occupied: u64,
    /// Numbers free for general sale
    pub available: u64,
    /// Origin of the figures
    pub source: StatsSource,
}

impl AvailabilityStats {
    /// Stats derived from the range and the current ledger count.
    #[must_use]
    pub fn from_ledger(range: &NumberRange, ledger_count: u64) -> Self {
        let excluded = range.size() - range.eligible_size();
        Self {
            campaign_id: range.campaign_id,
            total_numbers: range.size(),
            excluded,
            occupied: ledger_count,
            available: range.eligible_size().saturating_sub(ledger_count),
            source: StatsSource::Ledger,
        }
    }

    /// Numbers that take part in availability accounting.
    #[must_use]
    pub const fn eligible(&self) -> u64 {
        self.total_numbers - self.excluded
    }

    /// Fraction of the eligible pool still available (0.0 when the pool is empty).
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Pools stay far below 2^52
    pub fn ratio(&self) -> f64 {
        let eligible = self.eligible();
        if eligible == 0 {
            return 0.0;
        }
        self.available as f64 / eligible as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_size_and_eligibility() {
        let range = NumberRange::new(CampaignId::new(), 1, 1000).with_instant_prizes([7, 77, 2000]);
        assert_eq!(range.size(), 1000);
        assert_eq!(range.eligible_size(), 998);
        assert!(range.is_sellable(TicketNumber::new(8)));
        assert!(!range.is_sellable(TicketNumber::new(7)));
        assert!(!range.is_sellable(TicketNumber::new(1001)));
    }

    #[test]
    fn test_range_validation() {
        let range = NumberRange::new(CampaignId::new(), 10, 9);
        assert!(range.validate().is_err());
        assert_eq!(range.size(), 0);

        let whole_u64 = NumberRange::new(CampaignId::new(), 0, u64::MAX);
        assert_eq!(whole_u64.size(), u64::MAX);
        assert!(whole_u64.validate().is_err());

        let past_chunk_space = NumberRange::new(CampaignId::new(), 0, 1 << 48);
        assert!(matches!(
            past_chunk_space.validate(),
            Err(InventoryError::Validation(_))
        ));
    }

    #[test]
    fn test_partition_shift_keeps_total() {
        let mut partition = Partition {
            campaign_id: CampaignId::new(),
            partition_id: PartitionId::new(0),
            start: TicketNumber::new(0),
            end: TicketNumber::new(99),
            excluded_count: 1,
            available_count: 99,
            reserved_count: 0,
            sold_count: 0,
        };
        partition.shift(NumberState::Available, NumberState::Reserved, 5);
        partition.shift(NumberState::Reserved, NumberState::Sold, 2);
        assert_eq!(partition.available_count, 94);
        assert_eq!(partition.reserved_count, 3);
        assert_eq!(partition.sold_count, 2);
        assert!(partition.is_consistent());
    }

    #[test]
    fn test_idempotency_key_bounds() {
        assert!(IdempotencyKey::parse("short").is_err());
        assert!(IdempotencyKey::parse("x".repeat(129)).is_err());
        assert!(IdempotencyKey::parse("550e8400-e29b-41d4").is_ok());
    }

    #[test]
    fn test_idempotency_key_rejected_on_deserialize() {
        let parsed: Result<IdempotencyKey, _> = serde_json::from_str("\"tiny\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_stats_ratio() {
        let range = NumberRange::new(CampaignId::new(), 1, 1000);
        let stats = AvailabilityStats::from_ledger(&range, 995);
        assert_eq!(stats.available, 5);
        assert!((stats.ratio() - 0.005).abs() < f64::EPSILON);
    }

    #[test]
    fn test_expired_entry() {
        let now = Utc::now();
        let entry = LedgerEntry::reserved(
            CampaignId::new(),
            TicketNumber::new(1),
            OwnerId::new(),
            now,
            now + chrono::Duration::seconds(60),
        );
        assert!(!entry.is_expired_at(now));
        assert!(entry.is_expired_at(now + chrono::Duration::seconds(60)));
    }
}
