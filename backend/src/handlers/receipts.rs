//! HTTP handlers for purchase receipts

use axum::{extract::State, Json};

use shared::{PurchaseReceipt, StockLedgerEntry};

use crate::error::AppResult;
use crate::middleware::CurrentActor;
use crate::services::{retry_busy, ReceivingWorkflow};
use crate::AppState;

/// Move the accepted quantities of a finalized receipt into stock
pub async fn apply_receipt(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(receipt): Json<PurchaseReceipt>,
) -> AppResult<Json<Vec<StockLedgerEntry>>> {
    let service = ReceivingWorkflow::new(state.store.clone());
    let entries = retry_busy(&state.retry_policy(), || {
        service.apply_receipt(actor.0, &receipt)
    })
    .await?;
    Ok(Json(entries))
}
