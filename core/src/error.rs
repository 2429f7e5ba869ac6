//! Error types shared across the inventory crates.

use crate::types::CampaignId;
use thiserror::Error;

/// Errors raised by storage backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database connection or query failure.
    #[error("Database error: {0}")]
    Database(String),

    /// The referenced campaign has no inventory.
    #[error("Campaign not found: {0}")]
    NotFound(CampaignId),

    /// A uniqueness or state constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Persisted data could not be decoded (bitmap size, unknown status, ...).
    #[error("Corrupted data: {0}")]
    Corrupted(String),

    /// Backend temporarily unavailable (injected failures, pool exhaustion).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced synchronously by the engine.
///
/// Only requests that can be rejected before touching inventory are errors; shortfalls,
/// lost races and storage failures are reported inside the operation outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// Request failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Campaign has no number range.
    #[error("Campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    /// Storage error outside of an outcome-reporting operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InventoryError {
    /// Shorthand for a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
