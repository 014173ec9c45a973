//! HTTP API for faucet service

use super::error::{FaucetError, FaucetResult};
use super::ledger::{ClaimIntent, ClaimRecord};
use super::service::{ClaimResult, FaucetService, FaucetStatus};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub data: T,
    pub timestamp: String,
}

impl<T> SuccessResponse<T> {
    fn new(data: T) -> Json<Self> {
        Json(Self {
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }
}

/// Builds the faucet router
pub fn router(service: Arc<FaucetService>, metrics_enabled: bool) -> Router {
    let mut router = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/claim/:user_id", post(claim_handler))
        .route("/api/faucet", get(status_handler))
        .route("/api/users/:user_id/claims", get(history_handler))
        .route("/api/intents", get(intents_handler));

    if metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.with_state(service)
}

/// Claim handler
pub async fn claim_handler(
    State(service): State<Arc<FaucetService>>,
    Path(user_id): Path<String>,
) -> FaucetResult<Json<SuccessResponse<ClaimResult>>> {
    info!("Claim request for user {}", user_id);

    // Run detached so a dropped connection cannot cut the claim short
    // between submission and the ledger write.
    let claim = tokio::spawn(async move { service.claim_coins(&user_id).await })
        .await
        .map_err(|e| FaucetError::Internal(format!("claim task failed: {}", e)))??;

    Ok(SuccessResponse::new(claim))
}

/// Status handler
pub async fn status_handler(
    State(service): State<Arc<FaucetService>>,
) -> FaucetResult<Json<SuccessResponse<FaucetStatus>>> {
    let status = service.status().await?;
    Ok(SuccessResponse::new(status))
}

/// Claim history handler
pub async fn history_handler(
    State(service): State<Arc<FaucetService>>,
    Path(user_id): Path<String>,
) -> FaucetResult<Json<SuccessResponse<Vec<ClaimRecord>>>> {
    let history = service.claim_history(&user_id).await?;
    Ok(SuccessResponse::new(history))
}

/// Stale intents awaiting reconciliation
pub async fn intents_handler(
    State(service): State<Arc<FaucetService>>,
) -> FaucetResult<Json<SuccessResponse<Vec<ClaimIntent>>>> {
    let intents = service.stale_intents().await?;
    Ok(SuccessResponse::new(intents))
}

/// Prometheus scrape endpoint
pub async fn metrics_handler(State(service): State<Arc<FaucetService>>) -> impl IntoResponse {
    match service.metrics().gather() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => FaucetError::Internal(format!("metrics: {}", e)).into_response(),
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Root handler with info
pub async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Drip Faucet",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /api/claim/:user_id": "Claim the daily reward",
            "GET /api/faucet": "Faucet balance and distribution statistics",
            "GET /api/users/:user_id/claims": "Claim history, newest first",
            "GET /api/intents": "Claims awaiting reconciliation",
            "GET /health": "Health check",
            "GET /metrics": "Prometheus metrics"
        }
    }))
}
