//! HTTP handlers for sales consumption and returns

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use shared::{Reservation, Sale, SaleItem, SaleReturn, StockLedgerEntry};

use crate::error::AppResult;
use crate::middleware::CurrentActor;
use crate::services::{retry_busy, ConsumptionWorkflow};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct FulfilHoldRequest {
    #[validate(length(min = 1))]
    pub reservation_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SaleReturnRequest {
    /// Id of the return document, used to post it only once
    pub return_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(length(min = 1))]
    pub items: Vec<SaleItem>,
}

/// Post a completed sale
pub async fn apply_sale(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(sale): Json<Sale>,
) -> AppResult<Json<Vec<StockLedgerEntry>>> {
    let service = ConsumptionWorkflow::new(state.store.clone());
    let entries =
        retry_busy(&state.retry_policy(), || service.apply_sale(actor.0, &sale)).await?;
    Ok(Json(entries))
}

/// Hold stock for a credit or backorder sale
pub async fn hold_sale(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(sale): Json<Sale>,
) -> AppResult<Json<Vec<Reservation>>> {
    let service = ConsumptionWorkflow::new(state.store.clone());
    let reservations =
        retry_busy(&state.retry_policy(), || service.hold_sale(actor.0, &sale)).await?;
    Ok(Json(reservations))
}

/// Consume the holds of a sale
pub async fn fulfil_sale_hold(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(input): Json<FulfilHoldRequest>,
) -> AppResult<Json<Vec<StockLedgerEntry>>> {
    input.validate()?;

    let service = ConsumptionWorkflow::new(state.store.clone());
    let entries = retry_busy(&state.retry_policy(), || {
        service.fulfil_hold(actor.0, &input.reservation_ids)
    })
    .await?;
    Ok(Json(entries))
}

/// Post returned goods against a sale
pub async fn apply_sale_return(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(sale_id): Path<Uuid>,
    Json(input): Json<SaleReturnRequest>,
) -> AppResult<Json<Vec<StockLedgerEntry>>> {
    input.validate()?;

    let sale_return = SaleReturn {
        id: input.return_id,
        sale_id,
        warehouse_id: input.warehouse_id,
        items: input.items,
    };

    let service = ConsumptionWorkflow::new(state.store.clone());
    let entries = retry_busy(&state.retry_policy(), || {
        service.apply_return(actor.0, &sale_return)
    })
    .await?;
    Ok(Json(entries))
}
