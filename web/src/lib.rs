//! Axum HTTP surface for the raffle number inventory.
//!
//! Thin shell over [`InventoryEngine`](raffle_inventory_engine::InventoryEngine): handlers
//! parse the request, call one engine operation and map the outcome to a status code.
//!
//! # Routes
//!
//! ```text
//! GET  /health
//! GET  /ready
//! PUT  /api/campaigns/:id/inventory
//! GET  /api/campaigns/:id/stats
//! GET  /api/campaigns/:id/numbers/select?count=N
//! POST /api/campaigns/:id/purchases        (Idempotency-Key header optional)
//! POST /api/campaigns/:id/reservations
//! POST /api/campaigns/:id/release
//! ```
//!
//! # Example
//!
//! ```ignore
//! use raffle_inventory_web::{AppState, build_router};
//!
//! let app = build_router(AppState::new(Arc::new(engine)));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, correlation_id};
pub use state::{AlwaysReady, AppState, ReadinessCheck};

use axum::{
    Router,
    routing::{get, post, put},
};
use raffle_inventory_core::store::InventoryStore;
use tower_http::trace::TraceLayer;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the full router with tracing and correlation-id middleware.
pub fn build_router<S: InventoryStore>(state: AppState<S>) -> Router {
    let api = Router::new()
        .route("/campaigns/:id/inventory", put(handlers::initialize_inventory::<S>))
        .route("/campaigns/:id/stats", get(handlers::campaign_stats::<S>))
        .route(
            "/campaigns/:id/numbers/select",
            get(handlers::select_numbers::<S>),
        )
        .route("/campaigns/:id/purchases", post(handlers::purchase_numbers::<S>))
        .route("/campaigns/:id/reservations", post(handlers::reserve_numbers::<S>))
        .route("/campaigns/:id/release", post(handlers::release_numbers::<S>));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check::<S>))
        .nest("/api", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(correlation_id))
}
