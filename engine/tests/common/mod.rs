//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use raffle_inventory_core::environment::Clock;
use raffle_inventory_engine::{EngineConfig, InventoryEngine, PartitionConfig};
use raffle_inventory_testing::{InMemoryInventoryStore, ManualClock};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Route engine spans and events to the test writer; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Harness {
    pub store: Arc<InMemoryInventoryStore>,
    pub clock: ManualClock,
    pub engine: Arc<InventoryEngine<InMemoryInventoryStore>>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        init_tracing();
        let store = Arc::new(InMemoryInventoryStore::new());
        let clock = ManualClock::default();
        let engine = Arc::new(InventoryEngine::new(
            Arc::clone(&store),
            Arc::new(clock.clone()) as Arc<dyn Clock>,
            config,
        ));
        Self {
            store,
            clock,
            engine,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    /// Any pool of at least `threshold` numbers gets partitions of `size`.
    pub fn partitioned(threshold: u64, size: u64) -> Self {
        Self::new(
            EngineConfig::builder()
                .partition(
                    PartitionConfig::default()
                        .with_large_pool_threshold(threshold)
                        .with_partition_size(size),
                )
                .build(),
        )
    }
}
