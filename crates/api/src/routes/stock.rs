//! Stock level endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::Sku;
use inventory::StockLevel;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
}

#[derive(Serialize)]
pub struct StockResponse {
    pub sku: String,
    pub available: u64,
    pub reserved: u64,
    pub on_hand: u64,
}

impl StockResponse {
    fn new(sku: &Sku, level: StockLevel) -> Self {
        Self {
            sku: sku.to_string(),
            available: level.available,
            reserved: level.reserved,
            on_hand: level.on_hand(),
        }
    }
}

/// GET /stock/{sku}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(sku): Path<String>,
) -> Result<Json<StockResponse>, ApiError> {
    let sku = Sku::new(sku);
    let level = state
        .ledger
        .stock_level(&sku)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("SKU {sku} not stocked")))?;
    Ok(Json(StockResponse::new(&sku, level)))
}

/// POST /stock/{sku}/restock
#[tracing::instrument(skip(state, req))]
pub async fn restock(
    State(state): State<Arc<AppState>>,
    Path(sku): Path<String>,
    Json(req): Json<RestockRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    let sku = Sku::new(sku);
    let level = state.ledger.restock(&sku, req.quantity).await?;
    Ok(Json(StockResponse::new(&sku, level)))
}

#[derive(Deserialize)]
pub struct AdjustRequest {
    pub delta: i64,
}

/// POST /stock/{sku}/adjust: correct available stock after a count.
#[tracing::instrument(skip(state, req))]
pub async fn adjust(
    State(state): State<Arc<AppState>>,
    Path(sku): Path<String>,
    Json(req): Json<AdjustRequest>,
) -> Result<Json<StockResponse>, ApiError> {
    let sku = Sku::new(sku);
    let level = state.ledger.adjust(&sku, req.delta).await?;
    Ok(Json(StockResponse::new(&sku, level)))
}
