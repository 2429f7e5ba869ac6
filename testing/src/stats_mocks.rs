//! In-memory availability snapshot cache.

use chrono::{DateTime, Utc};
use raffle_inventory_core::environment::Clock;
use raffle_inventory_core::stats::{StatsCache, StatsFuture};
use raffle_inventory_core::{AvailabilityStats, CampaignId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// [`StatsCache`] backed by a `HashMap`, expiring entries against an injected clock.
pub struct InMemoryStatsCache {
    entries: Mutex<HashMap<CampaignId, (AvailabilityStats, DateTime<Utc>)>>,
    clock: Arc<dyn Clock>,
    hits: AtomicUsize,
}

impl InMemoryStatsCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            hits: AtomicUsize::new(0),
        }
    }

    /// Number of `get` calls answered from the cache.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Whether a snapshot (fresh or not) is stored for `campaign_id`.
    #[must_use]
    pub fn contains(&self, campaign_id: CampaignId) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&campaign_id)
    }
}

impl StatsCache for InMemoryStatsCache {
    fn get(&self, campaign_id: CampaignId) -> StatsFuture<'_, Option<AvailabilityStats>> {
        Box::pin(async move {
            let now = self.clock.now();
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let fresh = entries
                .get(&campaign_id)
                .filter(|(_, expires_at)| *expires_at > now)
                .map(|(stats, _)| stats.clone());
            if fresh.is_some() {
                self.hits.fetch_add(1, Ordering::SeqCst);
            }
            Ok(fresh)
        })
    }

    fn put(&self, stats: AvailabilityStats, ttl: Duration) -> StatsFuture<'_, ()> {
        Box::pin(async move {
            let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
            let expires_at = self.clock.now() + ttl;
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(stats.campaign_id, (stats, expires_at));
            Ok(())
        })
    }

    fn invalidate(&self, campaign_id: CampaignId) -> StatsFuture<'_, ()> {
        Box::pin(async move {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&campaign_id);
            Ok(())
        })
    }
}
