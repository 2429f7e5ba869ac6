//! Database-backed readiness probe.

use futures::future::BoxFuture;
use raffle_inventory_postgres::PostgresInventoryStore;
use raffle_inventory_web::ReadinessCheck;

/// Reports ready while `PostgreSQL` answers a ping.
#[derive(Clone, Debug)]
pub struct DatabaseReadiness {
    store: PostgresInventoryStore,
}

impl DatabaseReadiness {
    /// Probe the given store.
    #[must_use]
    pub const fn new(store: PostgresInventoryStore) -> Self {
        Self { store }
    }
}

impl ReadinessCheck for DatabaseReadiness {
    fn check(&self) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            self.store
                .ping()
                .await
                .map_err(|e| format!("database: {e}"))
        })
    }
}
