//! Application state for Axum handlers.

use futures::future::BoxFuture;
use raffle_inventory_core::store::InventoryStore;
use raffle_inventory_engine::InventoryEngine;
use std::sync::Arc;

/// Dependency probe behind `GET /ready`.
pub trait ReadinessCheck: Send + Sync {
    /// Resolve to `Err(reason)` when the service should not receive traffic.
    fn check(&self) -> BoxFuture<'_, Result<(), String>>;
}

/// Readiness probe that always passes.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysReady;

impl ReadinessCheck for AlwaysReady {
    fn check(&self) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async { Ok(()) })
    }
}

/// State shared across all HTTP handlers.
///
/// # Examples
///
/// ```ignore
/// let state = AppState::new(Arc::new(engine)).with_readiness(Arc::new(DatabaseProbe::new(pool)));
/// let app = build_router(state);
/// ```
pub struct AppState<S: InventoryStore> {
    /// Inventory engine
    pub engine: Arc<InventoryEngine<S>>,
    /// Probe used by `GET /ready`
    pub readiness: Arc<dyn ReadinessCheck>,
}

impl<S: InventoryStore> AppState<S> {
    /// Create state around `engine`, always ready.
    #[must_use]
    pub fn new(engine: Arc<InventoryEngine<S>>) -> Self {
        Self {
            engine,
            readiness: Arc::new(AlwaysReady),
        }
    }

    /// Replace the readiness probe.
    #[must_use]
    pub fn with_readiness(mut self, readiness: Arc<dyn ReadinessCheck>) -> Self {
        self.readiness = readiness;
        self
    }
}

impl<S: InventoryStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            readiness: Arc::clone(&self.readiness),
        }
    }
}
