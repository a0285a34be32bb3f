//! HTTP handlers for stock reservations

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use shared::{LedgerReference, PositionKey, Reservation};

use super::positive_quantity;
use crate::error::AppResult;
use crate::middleware::CurrentActor;
use crate::services::{retry_busy, ConsumedReservation, ReservationManager, ReserveInput};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct ReserveRequest {
    #[serde(flatten)]
    pub key: PositionKey,
    #[validate(custom = "positive_quantity")]
    pub quantity: Decimal,
    pub reference: Option<LedgerReference>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsumeRequest {
    pub reference: Option<LedgerReference>,
}

#[derive(Debug, Deserialize)]
pub struct OrphanQuery {
    pub older_than_minutes: Option<i64>,
}

/// Place a hold on available stock
pub async fn create_reservation(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(input): Json<ReserveRequest>,
) -> AppResult<Json<Reservation>> {
    input.validate()?;

    let service = ReservationManager::new(state.store.clone());
    let reserve = ReserveInput {
        key: input.key,
        quantity: input.quantity,
        reference: input.reference,
    };
    let reservation = retry_busy(&state.retry_policy(), || {
        service.reserve(actor.0, reserve.clone())
    })
    .await?;
    Ok(Json(reservation))
}

/// Get a reservation
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> AppResult<Json<Reservation>> {
    let service = ReservationManager::new(state.store);
    let reservation = service.get(reservation_id).await?;
    Ok(Json(reservation))
}

/// Give a hold back to available stock
pub async fn release_reservation(
    State(state): State<AppState>,
    _actor: CurrentActor,
    Path(reservation_id): Path<Uuid>,
) -> AppResult<Json<Reservation>> {
    let service = ReservationManager::new(state.store.clone());
    let reservation =
        retry_busy(&state.retry_policy(), || service.release(reservation_id)).await?;
    Ok(Json(reservation))
}

/// Turn a hold into an outbound movement
pub async fn consume_reservation(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(reservation_id): Path<Uuid>,
    body: Option<Json<ConsumeRequest>>,
) -> AppResult<Json<ConsumedReservation>> {
    let reference = body.map(|Json(b)| b).unwrap_or_default().reference;

    let service = ReservationManager::new(state.store.clone());
    let consumed = retry_busy(&state.retry_policy(), || {
        service.consume(actor.0, reservation_id, reference)
    })
    .await?;
    Ok(Json(consumed))
}

/// Active reservations older than the orphan window
pub async fn list_orphan_reservations(
    State(state): State<AppState>,
    Query(query): Query<OrphanQuery>,
) -> AppResult<Json<Vec<Reservation>>> {
    let window = query
        .older_than_minutes
        .map(chrono::Duration::minutes)
        .unwrap_or_else(|| state.config.ledger.orphan_window());

    let service = ReservationManager::new(state.store);
    let orphans = service.list_orphans(window).await?;
    Ok(Json(orphans))
}
