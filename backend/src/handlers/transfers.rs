//! HTTP handlers for stock transfers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use shared::{ReceiptLine, ShipmentLine, StockTransfer, TransferStatus, TransferSummary};

use super::positive_quantity;
use crate::error::AppResult;
use crate::middleware::CurrentActor;
use crate::services::{retry_busy, CreateTransferInput, TransferItemInput, TransferWorkflow};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct TransferItemRequest {
    pub product_id: Uuid,
    pub unit_id: Uuid,
    pub lot_number: Option<String>,
    #[validate(custom = "positive_quantity")]
    pub requested_quantity: Decimal,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

impl From<TransferItemRequest> for TransferItemInput {
    fn from(request: TransferItemRequest) -> Self {
        TransferItemInput {
            product_id: request.product_id,
            unit_id: request.unit_id,
            lot_number: request.lot_number,
            requested_quantity: request.requested_quantity,
            notes: request.notes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTransferRequest {
    pub from_warehouse_id: Uuid,
    pub to_warehouse_id: Uuid,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<TransferItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct TransferListQuery {
    pub status: Option<TransferStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShipTransferRequest {
    #[serde(default)]
    pub lines: Vec<ShipmentLine>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReceiveTransferRequest {
    #[validate(length(min = 1))]
    pub lines: Vec<ReceiptLine>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelTransferRequest {
    #[validate(length(max = 1000))]
    pub reason: Option<String>,
}

/// Create a draft transfer
pub async fn create_transfer(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(input): Json<CreateTransferRequest>,
) -> AppResult<Json<StockTransfer>> {
    input.validate()?;
    for item in &input.items {
        item.validate()?;
    }

    let service = TransferWorkflow::new(state.store);
    let transfer = service
        .create(
            actor.0,
            CreateTransferInput {
                from_warehouse_id: input.from_warehouse_id,
                to_warehouse_id: input.to_warehouse_id,
                notes: input.notes,
                items: input.items.into_iter().map(Into::into).collect(),
            },
        )
        .await?;
    Ok(Json(transfer))
}

/// List transfers, optionally by status
pub async fn list_transfers(
    State(state): State<AppState>,
    Query(query): Query<TransferListQuery>,
) -> AppResult<Json<Vec<StockTransfer>>> {
    let service = TransferWorkflow::new(state.store);
    let transfers = service.list(query.status).await?;
    Ok(Json(transfers))
}

pub async fn get_transfer(
    State(state): State<AppState>,
    Path(transfer_id): Path<Uuid>,
) -> AppResult<Json<StockTransfer>> {
    let service = TransferWorkflow::new(state.store);
    let transfer = service.get(transfer_id).await?;
    Ok(Json(transfer))
}

/// Totals and completion of a transfer
pub async fn get_transfer_summary(
    State(state): State<AppState>,
    Path(transfer_id): Path<Uuid>,
) -> AppResult<Json<TransferSummary>> {
    let service = TransferWorkflow::new(state.store);
    let summary = service.summary(transfer_id).await?;
    Ok(Json(summary))
}

pub async fn add_transfer_item(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path(transfer_id): Path<Uuid>,
    Json(input): Json<TransferItemRequest>,
) -> AppResult<Json<StockTransfer>> {
    input.validate()?;

    let service = TransferWorkflow::new(state.store);
    let transfer = service.add_item(transfer_id, input.into()).await?;
    Ok(Json(transfer))
}

pub async fn remove_transfer_item(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path((transfer_id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<StockTransfer>> {
    let service = TransferWorkflow::new(state.store);
    let transfer = service.remove_item(transfer_id, item_id).await?;
    Ok(Json(transfer))
}

pub async fn submit_transfer(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(transfer_id): Path<Uuid>,
) -> AppResult<Json<StockTransfer>> {
    let service = TransferWorkflow::new(state.store.clone());
    let transfer =
        retry_busy(&state.retry_policy(), || service.submit(actor.0, transfer_id)).await?;
    Ok(Json(transfer))
}

/// Approve a transfer, holding stock at the source
pub async fn approve_transfer(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(transfer_id): Path<Uuid>,
) -> AppResult<Json<StockTransfer>> {
    let service = TransferWorkflow::new(state.store.clone());
    let transfer =
        retry_busy(&state.retry_policy(), || service.approve(actor.0, transfer_id)).await?;
    Ok(Json(transfer))
}

/// Ship an approved transfer
pub async fn ship_transfer(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(transfer_id): Path<Uuid>,
    body: Option<Json<ShipTransferRequest>>,
) -> AppResult<Json<StockTransfer>> {
    let lines = body.map(|Json(b)| b).unwrap_or_default().lines;

    let service = TransferWorkflow::new(state.store.clone());
    let transfer = retry_busy(&state.retry_policy(), || {
        service.ship(actor.0, transfer_id, lines.clone())
    })
    .await?;
    Ok(Json(transfer))
}

/// Confirm received and damaged quantities at the destination
pub async fn receive_transfer(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(transfer_id): Path<Uuid>,
    Json(input): Json<ReceiveTransferRequest>,
) -> AppResult<Json<StockTransfer>> {
    input.validate()?;

    let service = TransferWorkflow::new(state.store.clone());
    let transfer = retry_busy(&state.retry_policy(), || {
        service.receive(actor.0, transfer_id, input.lines.clone())
    })
    .await?;
    Ok(Json(transfer))
}

pub async fn cancel_transfer(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(transfer_id): Path<Uuid>,
    body: Option<Json<CancelTransferRequest>>,
) -> AppResult<Json<StockTransfer>> {
    let input = body.map(|Json(b)| b).unwrap_or_default();
    input.validate()?;

    let service = TransferWorkflow::new(state.store.clone());
    let transfer = retry_busy(&state.retry_policy(), || {
        service.cancel(actor.0, transfer_id, input.reason.clone())
    })
    .await?;
    Ok(Json(transfer))
}
