use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::models::*;
use crate::draws::DrawConstructor;
use crate::error::{AppError, AppResult};
use crate::payer::Payer;
use crate::store::models::Block;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub payer: Payer,
    pub draws: Arc<DrawConstructor>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub tip: Option<Block>,
}

/// Liveness, with the last indexed block
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let tip = state.store.tip().await?;
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        tip,
    }))
}

/// GET /api/config
pub async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        funds: FundsView {
            distribution: state.draws.distribution().to_vec(),
        },
    })
}

/// GET /api/version
pub async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Cached payer wallet info
/// GET /api/payer
pub async fn get_payer(State(state): State<AppState>) -> AppResult<Json<PayerResponse>> {
    let info = state.payer.get().await?;
    Ok(Json(PayerResponse {
        payer: PayerView {
            address: info.address,
            balance: info.balance,
            nonce: info.nonce,
        },
    }))
}

// ========== EARNINGS ==========

/// GET /api/earnings/payments
pub async fn list_payments(
    State(state): State<AppState>,
    Query(pairs): Query<QueryPairs>,
) -> AppResult<Json<ListResponse<PaymentView>>> {
    let paging = Paging::from_pairs(&pairs, false);
    let query = payment_query(&pairs, &paging);
    let page = state.store.search_payments(&query).await?;
    let results = page.results.into_iter().map(PaymentView::from).collect();
    Ok(Json(ListResponse::new(results, &paging, page.total_count)))
}

/// Leaderboard of the current draw period
/// GET /api/earnings/payments/highest
pub async fn list_highest_payments(
    State(state): State<AppState>,
    Query(pairs): Query<QueryPairs>,
) -> AppResult<Json<ListResponse<PaymentView>>> {
    let paging = Paging::from_pairs(&pairs, true);
    let since = state.draws.since().await?;
    let page = state
        .store
        .highest_payments(since, paging.skip, paging.limit)
        .await?;
    let results = page.results.into_iter().map(PaymentView::from).collect();
    Ok(Json(ListResponse::new(results, &paging, page.total_count)))
}

// ========== DRAWS ==========

/// POST /api/draws
pub async fn create_draw(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> AppResult<(StatusCode, Json<DrawResponse>)> {
    let Json(body) = body.map_err(|e| AppError::validation("draw", e.body_text()))?;
    let request = CreateDrawRequest::from_value(&body)?;
    info!(winners = request.winners.len(), "Creating draw");
    let created = state.draws.create(&request.winners).await?;
    Ok((
        StatusCode::CREATED,
        Json(DrawResponse::new(created.draw, created.payouts)),
    ))
}

/// GET /api/draws
pub async fn list_draws(
    State(state): State<AppState>,
    Query(pairs): Query<QueryPairs>,
) -> AppResult<Json<ListResponse<crate::store::models::Draw>>> {
    let paging = Paging::from_pairs(&pairs, false);
    let page = state.store.search_draws(&draw_query(&pairs, &paging)).await?;
    Ok(Json(ListResponse::new(page.results, &paging, page.total_count)))
}

/// GET /api/draws/:key
pub async fn get_draw(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<DrawResponse>> {
    let draw = state
        .store
        .get_draw(&key)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("draw {}", key)))?;
    let payouts = state.store.payouts_for_draw(&draw.key).await?;
    Ok(Json(DrawResponse::new(draw, payouts)))
}
