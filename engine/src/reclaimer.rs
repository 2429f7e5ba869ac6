//! Reservation expiry reclaimer.
//!
//! A scheduled job that returns expired leases to the pool:
//!
//! ```text
//! idle ──tick──▶ scan ──▶ per campaign (bounded) ──▶ per batch: one transaction ──▶ idle
//! ```
//!
//! Every batch is its own transaction, so a failing campaign never blocks the others
//! and a failed batch is simply found again by the next scan. Releasing is idempotent,
//! so re-running a pass never double-counts.
//!
//! # Example
//!
//! ```ignore
//! let (reclaimer, shutdown) = Reclaimer::new(engine, ReclaimerConfig::default());
//!
//! tokio::spawn(async move { reclaimer.run().await });
//!
//! // Later, on SIGTERM:
//! shutdown.send(true).ok();
//! ```

use crate::outcome::elapsed_ms;
use crate::{InventoryEngine, metrics};
use chrono::{DateTime, Utc};
use raffle_inventory_core::store::InventoryStore;
use raffle_inventory_core::{ExpiredReservations, InventoryError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Reclaimer scheduling and batching.
///
/// # Default Values
///
/// - `interval`: 60 seconds
/// - `batch_size`: 5000 numbers per transaction
/// - `max_concurrent_campaigns`: 5
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimerConfig {
    /// Time between scans
    pub interval: Duration,
    /// Numbers released per transaction
    pub batch_size: usize,
    /// Campaigns processed in parallel
    pub max_concurrent_campaigns: usize,
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 5000,
            max_concurrent_campaigns: 5,
        }
    }
}

/// Summary of one reclaimer pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimReport {
    /// Campaigns with expired reservations
    pub campaigns: usize,
    /// Numbers returned to the pool
    pub released: usize,
    /// Batches rolled back and left for the next scan
    pub failed_batches: usize,
    /// Wall time spent
    pub elapsed_ms: u64,
}

#[derive(Default)]
struct CampaignReclaim {
    released: usize,
    failed_batches: usize,
}

/// Periodic release of expired reservations.
pub struct Reclaimer<S: InventoryStore> {
    engine: Arc<InventoryEngine<S>>,
    config: ReclaimerConfig,
    permits: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
}

impl<S: InventoryStore> Reclaimer<S> {
    /// Create a reclaimer.
    ///
    /// Returns the reclaimer and a shutdown sender. Send `true` to stop [`Self::run`].
    #[must_use]
    pub fn new(
        engine: Arc<InventoryEngine<S>>,
        config: ReclaimerConfig,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reclaimer = Self {
            engine,
            permits: Arc::new(Semaphore::new(config.max_concurrent_campaigns.max(1))),
            config,
            shutdown: shutdown_rx,
        };
        (reclaimer, shutdown_tx)
    }

    /// Run one scan and release everything expired at the current time.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Store`] if the scan query fails. Failures of
    /// individual batches are counted in the report instead.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<ReclaimReport, InventoryError> {
        let started = Instant::now();
        let now = self.engine.clock.now();
        let groups = self.engine.store.expired_reservations(now).await?;

        let mut report = ReclaimReport {
            campaigns: groups.len(),
            ..ReclaimReport::default()
        };
        let mut tasks = JoinSet::new();
        for group in groups {
            let engine = Arc::clone(&self.engine);
            let permits = Arc::clone(&self.permits);
            let batch_size = self.config.batch_size.max(1);
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return CampaignReclaim {
                        released: 0,
                        failed_batches: 1,
                    };
                };
                engine.reclaim_campaign(group, now, batch_size).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(campaign) => {
                    report.released += campaign.released;
                    report.failed_batches += campaign.failed_batches;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Reclaim task panicked or was cancelled");
                    report.failed_batches += 1;
                }
            }
        }

        report.elapsed_ms = elapsed_ms(started);
        metrics::record_reclaim(report.released, report.failed_batches, started.elapsed());
        Ok(report)
    }

    /// Run scans on the configured interval until shutdown is signalled.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            max_concurrent_campaigns = self.config.max_concurrent_campaigns,
            "Starting reservation reclaimer"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.released > 0 || report.failed_batches > 0 => {
                            tracing::info!(
                                campaigns = report.campaigns,
                                released = report.released,
                                failed_batches = report.failed_batches,
                                elapsed_ms = report.elapsed_ms,
                                "Reclaimer pass finished"
                            );
                        }
                        Ok(_) => tracing::debug!("Reclaimer pass found nothing to release"),
                        Err(e) => tracing::error!(error = %e, "Reclaimer scan failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Reclaimer shutdown signal received");
                        break;
                    }
                }
            }
        }
    }
}

impl<S: InventoryStore> InventoryEngine<S> {
    async fn reclaim_campaign(
        &self,
        group: ExpiredReservations,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> CampaignReclaim {
        let campaign_id = group.campaign_id;
        let mut result = CampaignReclaim::default();
        let range = match self.number_range(campaign_id).await {
            Ok(range) => range,
            Err(e) => {
                tracing::error!(campaign_id = %campaign_id, error = %e, "Cannot load campaign range");
                result.failed_batches += 1;
                return result;
            }
        };

        for (index, batch) in group.numbers.chunks(batch_size).enumerate() {
            match self.release_batch(&range, batch, None, Some(now)).await {
                Ok(released) => result.released += released.len(),
                Err(e) => {
                    tracing::warn!(
                        campaign_id = %campaign_id,
                        batch = index,
                        size = batch.len(),
                        error = %e,
                        "Reclaim batch failed, will retry on next scan"
                    );
                    result.failed_batches += 1;
                }
            }
        }

        if result.released > 0 {
            self.invalidate_stats(campaign_id).await;
        }
        tracing::debug!(
            campaign_id = %campaign_id,
            expired = group.numbers.len(),
            released = result.released,
            "Campaign reclaimed"
        );
        result
    }
}
