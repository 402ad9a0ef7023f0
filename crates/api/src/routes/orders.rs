//! Order placement and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId};
use saga::{LineItem, Order, PaymentMethod, PlaceOrder};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct PlaceOrderRequest {
    /// Client-chosen order ID. Resubmitting a confirmed order's ID returns
    /// that order without reserving or charging again; resubmitting an ID
    /// whose attempt failed or is still running is a conflict.
    pub order_id: Option<OrderId>,
    pub customer_id: CustomerId,
    pub items: Vec<LineItem>,
    pub payment_method: PaymentMethod,
    pub payment_token: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub customer_id: String,
    pub status: String,
    pub lines: Vec<OrderLineResponse>,
    pub total_cents: i64,
    pub payment_ref: Option<String>,
    pub reservation_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub sku: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub total_cents: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            customer_id: order.customer_id.to_string(),
            status: order.status.to_string(),
            lines: order
                .lines
                .iter()
                .map(|line| OrderLineResponse {
                    sku: line.sku.to_string(),
                    product_name: line.product_name.clone(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price.cents(),
                    total_cents: line.total_price().cents(),
                })
                .collect(),
            total_cents: order.total.cents(),
            payment_ref: order.payment_ref.map(|r| r.to_string()),
            reservation_ids: order.reservation_ids.iter().map(|id| id.to_string()).collect(),
            created_at: order.created_at,
        }
    }
}

// -- Handlers --

/// POST /orders: run the placement saga and return the confirmed order.
#[tracing::instrument(skip(state, req))]
pub async fn place(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order_id = req.order_id.unwrap_or_default();
    let request = PlaceOrder {
        customer_id: req.customer_id,
        items: req.items,
        payment_method: req.payment_method,
        payment_token: req.payment_token,
    };

    let order = state
        .coordinator
        .place_order_with_id(order_id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(order.into())))
}

/// GET /orders/{id}: load a stored order.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .coordinator
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;
    Ok(Json(order.into()))
}

pub(crate) fn parse_order_id(s: &str) -> Result<OrderId, ApiError> {
    s.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))
}
