//! Saga inspection endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use saga::CompensationTask;
use serde::Serialize;

use super::orders::parse_order_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct SagaStatusResponse {
    pub order_id: String,
    pub state: String,
    pub reservation_ids: Vec<String>,
    pub payment_ref: Option<String>,
    pub persisted: bool,
    pub compensations: Vec<CompensationTask>,
    pub reconciled_commits: Vec<String>,
    pub failed_step: Option<String>,
    pub failure_reason: Option<String>,
}

/// GET /sagas/{id}: the saga as rebuilt from its journal.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let saga = state
        .coordinator
        .get_saga(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))?;

    Ok(Json(SagaStatusResponse {
        order_id: order_id.to_string(),
        state: saga.state().to_string(),
        reservation_ids: saga.reservations().iter().map(|r| r.to_string()).collect(),
        payment_ref: saga.payment_ref().map(|r| r.to_string()),
        persisted: saga.is_persisted(),
        compensations: saga.compensations().to_vec(),
        reconciled_commits: saga
            .reconciled_commits()
            .iter()
            .map(|r| r.to_string())
            .collect(),
        failed_step: saga.failed_step().map(|s| s.to_string()),
        failure_reason: saga.failure_reason().map(str::to_string),
    }))
}
