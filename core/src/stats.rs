//! Availability snapshot cache.
//!
//! The snapshot is an optimisation hint for strategy dispatch. It is never consulted
//! when deciding whether a number can be occupied.

use crate::error::StoreError;
use crate::types::{AvailabilityStats, CampaignId};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by [`StatsCache`] methods.
pub type StatsFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// TTL-scoped store for [`AvailabilityStats`].
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns so it can be held as
/// `Arc<dyn StatsCache>`.
pub trait StatsCache: Send + Sync {
    /// Fetch a fresh snapshot, `None` if absent or expired.
    fn get(&self, campaign_id: CampaignId) -> StatsFuture<'_, Option<AvailabilityStats>>;

    /// Store a snapshot for `ttl`.
    fn put(&self, stats: AvailabilityStats, ttl: Duration) -> StatsFuture<'_, ()>;

    /// Drop the snapshot of a campaign.
    fn invalidate(&self, campaign_id: CampaignId) -> StatsFuture<'_, ()>;
}
