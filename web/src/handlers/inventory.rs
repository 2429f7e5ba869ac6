//! Inventory endpoints: campaign setup, stats, selection, purchase, reservation and
//! release.
//!
//! Business shortfalls (fewer numbers than asked, numbers lost to another buyer) are
//! `200 OK` with the outcome body. An outcome with `success == false` means the
//! transaction rolled back on an infrastructure failure and is sent as
//! `503 Service Unavailable`, still carrying the outcome so callers can retry.

use crate::WebResult;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use raffle_inventory_core::store::InventoryStore;
use raffle_inventory_core::{
    AvailabilityStats, CampaignId, IdempotencyKey, NumberRange, OwnerId, PaymentMeta,
    TicketNumber,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Header carrying the purchase idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Body of `PUT /api/campaigns/:id/inventory`.
#[derive(Debug, Deserialize)]
pub struct InventoryRequest {
    /// First number (inclusive)
    pub start_number: u64,
    /// Last number (inclusive)
    pub end_number: u64,
    /// Numbers kept out of general sale
    #[serde(default)]
    pub instant_prize_numbers: Vec<u64>,
}

/// Query of `GET /api/campaigns/:id/numbers/select`.
#[derive(Debug, Deserialize)]
pub struct SelectQuery {
    /// How many numbers to suggest
    pub count: usize,
}

/// Body of `POST /api/campaigns/:id/purchases`.
#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    /// Buyer
    pub buyer_id: OwnerId,
    /// Numbers to buy
    pub numbers: Vec<TicketNumber>,
    /// Payment gateway reference
    #[serde(default)]
    pub payment_ref: Option<String>,
}

/// Body of `POST /api/campaigns/:id/reservations`.
#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    /// Lease holder
    pub owner_id: OwnerId,
    /// Numbers to hold
    pub numbers: Vec<TicketNumber>,
    /// Lease length; the configured default when absent
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// Body of `POST /api/campaigns/:id/release`.
#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    /// Numbers to return to the pool
    pub numbers: Vec<TicketNumber>,
    /// Only release leases held by this owner
    #[serde(default)]
    pub owner_id: Option<OwnerId>,
}

fn respond<T: Serialize>(success: bool, outcome: &T) -> Response {
    let status = if success {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(outcome)).into_response()
}

fn idempotency_key(headers: &HeaderMap) -> Result<Option<IdempotencyKey>, AppError> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AppError::validation("Idempotency key must be visible ASCII"))?;
    Ok(Some(IdempotencyKey::parse(value)?))
}

/// Set up the inventory of a campaign once its number range is published.
///
/// `201 Created` the first time, `200 OK` when the same range is already set up.
///
/// ```text
/// PUT /api/campaigns/:id/inventory
///
/// { "start_number": 1, "end_number": 1000000, "instant_prize_numbers": [777] }
/// ```
///
/// # Errors
///
/// 422 for a malformed range, 409 when the campaign already has a different range.
pub async fn initialize_inventory<S: InventoryStore>(
    State(state): State<AppState<S>>,
    Path(campaign_id): Path<CampaignId>,
    Json(request): Json<InventoryRequest>,
) -> WebResult<Response> {
    let range = NumberRange::new(campaign_id, request.start_number, request.end_number)
        .with_instant_prizes(request.instant_prize_numbers);
    let created = state.engine.initialize_campaign(range.clone()).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(range)).into_response())
}

/// Availability of a campaign.
///
/// ```text
/// GET /api/campaigns/:id/stats
/// ```
///
/// # Errors
///
/// 404 for an unknown campaign, 503 when storage is unavailable.
pub async fn campaign_stats<S: InventoryStore>(
    State(state): State<AppState<S>>,
    Path(campaign_id): Path<CampaignId>,
) -> WebResult<Json<AvailabilityStats>> {
    Ok(Json(state.engine.stats(campaign_id).await?))
}

/// Suggest available numbers.
///
/// ```text
/// GET /api/campaigns/:id/numbers/select?count=5
/// ```
///
/// # Errors
///
/// 422 for a missing, malformed or out-of-bounds count, 404 for an unknown campaign.
pub async fn select_numbers<S: InventoryStore>(
    State(state): State<AppState<S>>,
    Path(campaign_id): Path<CampaignId>,
    query: Result<Query<SelectQuery>, QueryRejection>,
) -> WebResult<Response> {
    let Query(query) = query?;
    let outcome = state.engine.select(campaign_id, query.count).await?;
    Ok(respond(outcome.success, &outcome))
}

/// Buy numbers, converting the buyer's own reservations.
///
/// ```text
/// POST /api/campaigns/:id/purchases
/// Idempotency-Key: order-2025-0001-abcdef
///
/// { "buyer_id": "...", "numbers": [10, 11], "payment_ref": "pay_123" }
/// ```
///
/// # Errors
///
/// 422 for an invalid request or key, 404 for an unknown campaign.
pub async fn purchase_numbers<S: InventoryStore>(
    State(state): State<AppState<S>>,
    Path(campaign_id): Path<CampaignId>,
    headers: HeaderMap,
    Json(request): Json<PurchaseRequest>,
) -> WebResult<Response> {
    let payment = PaymentMeta {
        payment_ref: request.payment_ref,
        idempotency_key: idempotency_key(&headers)?,
    };
    let outcome = state
        .engine
        .purchase(campaign_id, &request.numbers, request.buyer_id, payment)
        .await?;
    Ok(respond(outcome.success, &outcome))
}

/// Hold numbers for a limited time.
///
/// ```text
/// POST /api/campaigns/:id/reservations
///
/// { "owner_id": "...", "numbers": [42], "ttl_seconds": 600 }
/// ```
///
/// # Errors
///
/// 422 for an invalid request or lease length, 404 for an unknown campaign.
pub async fn reserve_numbers<S: InventoryStore>(
    State(state): State<AppState<S>>,
    Path(campaign_id): Path<CampaignId>,
    Json(request): Json<ReserveRequest>,
) -> WebResult<Response> {
    let ttl = request.ttl_seconds.map(Duration::from_secs);
    let outcome = state
        .engine
        .reserve(campaign_id, &request.numbers, request.owner_id, ttl)
        .await?;
    Ok(respond(outcome.success, &outcome))
}

/// Return reserved numbers to the pool. Sold numbers are never released.
///
/// ```text
/// POST /api/campaigns/:id/release
///
/// { "numbers": [42], "owner_id": "..." }
/// ```
///
/// # Errors
///
/// 422 for an invalid request, 404 for an unknown campaign.
pub async fn release_numbers<S: InventoryStore>(
    State(state): State<AppState<S>>,
    Path(campaign_id): Path<CampaignId>,
    Json(request): Json<ReleaseRequest>,
) -> WebResult<Response> {
    let outcome = state
        .engine
        .release(campaign_id, &request.numbers, request.owner_id)
        .await?;
    Ok(respond(outcome.success, &outcome))
}
