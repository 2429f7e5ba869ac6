//! Engine configuration.
//!
//! Every strategy cutover and bound is a field so operators can tune them per
//! deployment without code changes.
//!
//! # Example
//!
//! ```rust
//! use raffle_inventory_engine::config::{EngineConfig, SelectionConfig};
//! use std::time::Duration;
//!
//! let config = EngineConfig::builder()
//!     .selection(
//!         SelectionConfig::builder()
//!             .sampling_ratio(0.6)
//!             .batch_size(200)
//!             .build(),
//!     )
//!     .stats_ttl(Duration::from_secs(10))
//!     .build();
//! assert_eq!(config.selection.batch_size, 200);
//! ```

use std::time::Duration;

/// Strategy dispatch thresholds and per-strategy bounds.
///
/// # Default Values
///
/// - `min_count` / `max_count`: 1 / 100
/// - `sampling_ratio`: 0.5 (Sampling above 50% availability)
/// - `batched_ratio`: 0.1 (Batched search above 10%)
/// - `sampling_attempts_factor`: 3 (`count × 3` random draws)
/// - `batch_size`: 100 candidates per round
/// - `max_empty_rounds`: 5 consecutive all-occupied rounds
/// - `max_rounds`: 50
/// - `preselect_max_available`: 250 000
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionConfig {
    /// Smallest accepted `count`
    pub min_count: usize,
    /// Largest accepted `count`
    pub max_count: usize,
    /// Availability ratio above which Sampling is used
    pub sampling_ratio: f64,
    /// Availability ratio above which Batched search is used
    pub batched_ratio: f64,
    /// Sampling gives up after `count × factor` draws
    pub sampling_attempts_factor: usize,
    /// Candidates generated per Batched round
    pub batch_size: usize,
    /// Consecutive rounds with no new number before Batched stops or escalates
    pub max_empty_rounds: usize,
    /// Hard cap on Batched rounds
    pub max_rounds: usize,
    /// Pre-selection only runs when at most this many numbers are available
    pub preselect_max_available: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SelectionConfig {
    /// Create a new config builder.
    #[must_use]
    pub const fn builder() -> SelectionConfigBuilder {
        SelectionConfigBuilder {
            config: Self {
                min_count: 1,
                max_count: 100,
                sampling_ratio: 0.5,
                batched_ratio: 0.1,
                sampling_attempts_factor: 3,
                batch_size: 100,
                max_empty_rounds: 5,
                max_rounds: 50,
                preselect_max_available: 250_000,
            },
        }
    }

    /// Whether Pre-selection may enumerate a pool with `available` free numbers.
    #[must_use]
    pub const fn preselect_allowed(&self, available: u64) -> bool {
        available <= self.preselect_max_available
    }
}

/// Builder for [`SelectionConfig`].
#[derive(Debug, Clone)]
pub struct SelectionConfigBuilder {
    config: SelectionConfig,
}

impl SelectionConfigBuilder {
    /// Set the accepted `count` bounds.
    #[must_use]
    pub const fn count_bounds(mut self, min: usize, max: usize) -> Self {
        self.config.min_count = min;
        self.config.max_count = max;
        self
    }

    /// Set the Sampling cutover ratio.
    #[must_use]
    pub const fn sampling_ratio(mut self, ratio: f64) -> Self {
        self.config.sampling_ratio = ratio;
        self
    }

    /// Set the Batched cutover ratio.
    #[must_use]
    pub const fn batched_ratio(mut self, ratio: f64) -> Self {
        self.config.batched_ratio = ratio;
        self
    }

    /// Set the Sampling attempt multiplier.
    #[must_use]
    pub const fn sampling_attempts_factor(mut self, factor: usize) -> Self {
        self.config.sampling_attempts_factor = factor;
        self
    }

    /// Set the Batched round size.
    #[must_use]
    pub const fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the consecutive all-occupied round limit.
    #[must_use]
    pub const fn max_empty_rounds(mut self, rounds: usize) -> Self {
        self.config.max_empty_rounds = rounds;
        self
    }

    /// Set the Batched round cap.
    #[must_use]
    pub const fn max_rounds(mut self, rounds: usize) -> Self {
        self.config.max_rounds = rounds;
        self
    }

    /// Set the absolute Pre-selection gate.
    #[must_use]
    pub const fn preselect_max_available(mut self, available: u64) -> Self {
        self.config.preselect_max_available = available;
        self
    }

    /// Build the [`SelectionConfig`].
    #[must_use]
    pub const fn build(self) -> SelectionConfig {
        self.config
    }
}

/// Partition index sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionConfig {
    /// Pools of at least this many numbers get a partition index
    pub large_pool_threshold: u64,
    /// Numbers per partition
    pub partition_size: u64,
    /// Partition sampling gives up after `count × factor` partition picks
    pub sample_attempts_factor: usize,
    /// Largest range a campaign may be initialised with
    pub max_range_size: u64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            large_pool_threshold: 1_000_000,
            partition_size: 10_000,
            sample_attempts_factor: 3,
            max_range_size: 100_000_000,
        }
    }
}

impl PartitionConfig {
    /// Set the large-pool threshold.
    #[must_use]
    pub const fn with_large_pool_threshold(mut self, threshold: u64) -> Self {
        self.large_pool_threshold = threshold;
        self
    }

    /// Set the partition size.
    #[must_use]
    pub const fn with_partition_size(mut self, size: u64) -> Self {
        self.partition_size = size;
        self
    }

    /// Set the largest accepted campaign range.
    #[must_use]
    pub const fn with_max_range_size(mut self, size: u64) -> Self {
        self.max_range_size = size;
        self
    }

    /// Whether a pool of `size` numbers is partitioned.
    #[must_use]
    pub const fn is_large(&self, size: u64) -> bool {
        size >= self.large_pool_threshold
    }
}

/// Bounds for reserve and purchase requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationConfig {
    /// Lease length when the caller gives none
    pub default_ttl: Duration,
    /// Longest lease a caller may ask for
    pub max_ttl: Duration,
    /// Most numbers in one reserve, purchase or release call
    pub max_numbers: usize,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(15 * 60),
            max_ttl: Duration::from_secs(60 * 60),
            max_numbers: 100,
        }
    }
}

impl ReservationConfig {
    /// Set the default lease length.
    #[must_use]
    pub const fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the longest lease.
    #[must_use]
    pub const fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Strategy dispatch
    pub selection: SelectionConfig,
    /// Partition index
    pub partition: PartitionConfig,
    /// Reserve/purchase bounds
    pub reservation: ReservationConfig,
    /// Lifetime of cached availability snapshots
    pub stats_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EngineConfig {
    /// Create a new config builder.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    selection: Option<SelectionConfig>,
    partition: Option<PartitionConfig>,
    reservation: Option<ReservationConfig>,
    stats_ttl: Option<Duration>,
}

impl EngineConfigBuilder {
    /// Set selection thresholds.
    #[must_use]
    pub fn selection(mut self, selection: SelectionConfig) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Set partition sizing.
    #[must_use]
    pub const fn partition(mut self, partition: PartitionConfig) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Set reservation bounds.
    #[must_use]
    pub const fn reservation(mut self, reservation: ReservationConfig) -> Self {
        self.reservation = Some(reservation);
        self
    }

    /// Set the stats snapshot TTL.
    #[must_use]
    pub const fn stats_ttl(mut self, ttl: Duration) -> Self {
        self.stats_ttl = Some(ttl);
        self
    }

    /// Build the [`EngineConfig`].
    #[must_use]
    pub fn build(self) -> EngineConfig {
        EngineConfig {
            selection: self.selection.unwrap_or_default(),
            partition: self.partition.unwrap_or_default(),
            reservation: self.reservation.unwrap_or_default(),
            stats_ttl: self.stats_ttl.unwrap_or(Duration::from_secs(5)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.selection.max_count, 100);
        assert!((config.selection.sampling_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.partition.large_pool_threshold, 1_000_000);
        assert_eq!(config.partition.max_range_size, 100_000_000);
        assert_eq!(config.reservation.default_ttl, Duration::from_secs(900));
        assert_eq!(config.stats_ttl, Duration::from_secs(5));
    }

    #[test]
    fn test_preselect_gate() {
        let selection = SelectionConfig::builder().preselect_max_available(10).build();
        assert!(selection.preselect_allowed(10));
        assert!(!selection.preselect_allowed(11));
    }
}
