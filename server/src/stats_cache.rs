//! Redis-backed availability snapshot cache.
//!
//! Snapshots are stored as JSON under `raffle:stats:{campaign_id}` with `SET … EX`, so
//! Redis expires them on its own. Any Redis failure surfaces as
//! [`StoreError::Unavailable`]; the engine treats the cache as a hint and falls back
//! to the ledger.

use raffle_inventory_core::stats::{StatsCache, StatsFuture};
use raffle_inventory_core::{AvailabilityStats, CampaignId, StatsSource, StoreError};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

/// Redis snapshot cache with connection pooling via `ConnectionManager`.
#[derive(Clone)]
pub struct RedisStatsCache {
    conn_manager: ConnectionManager,
}

impl RedisStatsCache {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if Redis cannot be reached.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis client: {e}")))?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
        })?;
        Ok(Self { conn_manager })
    }

    fn key(campaign_id: CampaignId) -> String {
        format!("raffle:stats:{campaign_id}")
    }
}

fn redis_error(e: &redis::RedisError) -> StoreError {
    StoreError::Unavailable(format!("Redis error: {e}"))
}

/// Seconds to pass to `EX`; Redis rejects zero.
fn expiry_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn decode(raw: &str) -> Result<AvailabilityStats, StoreError> {
    let mut stats: AvailabilityStats = serde_json::from_str(raw)
        .map_err(|e| StoreError::Corrupted(format!("Bad stats snapshot: {e}")))?;
    stats.source = StatsSource::Snapshot;
    Ok(stats)
}

impl StatsCache for RedisStatsCache {
    fn get(&self, campaign_id: CampaignId) -> StatsFuture<'_, Option<AvailabilityStats>> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let raw: Option<String> = conn
                .get(Self::key(campaign_id))
                .await
                .map_err(|e| redis_error(&e))?;
            raw.as_deref().map(decode).transpose()
        })
    }

    fn put(&self, stats: AvailabilityStats, ttl: Duration) -> StatsFuture<'_, ()> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let raw = serde_json::to_string(&stats)
                .map_err(|e| StoreError::Corrupted(format!("Unserialisable stats: {e}")))?;
            let () = conn
                .set_ex(Self::key(stats.campaign_id), raw, expiry_secs(ttl))
                .await
                .map_err(|e| redis_error(&e))?;
            Ok(())
        })
    }

    fn invalidate(&self, campaign_id: CampaignId) -> StatsFuture<'_, ()> {
        let mut conn = self.conn_manager.clone();
        Box::pin(async move {
            let _removed: u64 = conn
                .del(Self::key(campaign_id))
                .await
                .map_err(|e| redis_error(&e))?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use raffle_inventory_core::NumberRange;

    #[test]
    fn test_key_layout() {
        let id = CampaignId::new();
        assert_eq!(RedisStatsCache::key(id), format!("raffle:stats:{id}"));
    }

    #[test]
    fn test_sub_second_ttl_rounds_up() {
        assert_eq!(expiry_secs(Duration::from_millis(200)), 1);
        assert_eq!(expiry_secs(Duration::from_secs(5)), 5);
    }

    #[test]
    fn test_decoded_snapshot_is_marked_as_snapshot() {
        let range = NumberRange::new(CampaignId::new(), 1, 100);
        let stats = AvailabilityStats::from_ledger(&range, 10);
        let raw = serde_json::to_string(&stats).unwrap();

        let decoded = decode(&raw).unwrap();

        assert_eq!(decoded.source, StatsSource::Snapshot);
        assert_eq!(decoded.available, 90);
        assert!(matches!(decode("{"), Err(StoreError::Corrupted(_))));
    }
}
