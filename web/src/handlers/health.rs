//! Health check endpoints for load balancers and orchestrators.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use raffle_inventory_core::store::InventoryStore;
use serde::Serialize;

/// Liveness: the process is up. Checks no dependencies.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Body of `GET /ready`.
#[derive(Debug, Serialize)]
pub struct Readiness {
    /// `ready` or `unavailable`
    pub status: &'static str,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Readiness: dependencies answer.
///
/// - 200 OK when the probe passes
/// - 503 Service Unavailable otherwise
///
/// ```text
/// GET /ready
/// ```
pub async fn readiness_check<S: InventoryStore>(
    State(state): State<AppState<S>>,
) -> (StatusCode, Json<Readiness>) {
    match state.readiness.check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Readiness {
                status: "ready",
                message: None,
            }),
        ),
        Err(reason) => {
            tracing::warn!(reason = %reason, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Readiness {
                    status: "unavailable",
                    message: Some(reason),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
