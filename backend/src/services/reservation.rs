//! Reservation manager
//!
//! A reservation holds available quantity without moving stock. The hold and
//! the availability check happen under the same position lock.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared::{
    validate_positive_quantity, LedgerReference, MovementType, PositionKey, Reservation,
    ReservationStatus, StockLedgerEntry,
};

use super::ledger::{post_entry, LedgerEntryDraft};
use crate::error::{AppError, AppResult};
use crate::store::{LedgerStore, ReservationFilter, StoreTx};

/// Reservation service
#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn LedgerStore>,
}

/// Input for placing a hold
#[derive(Debug, Clone, Deserialize)]
pub struct ReserveInput {
    #[serde(flatten)]
    pub key: PositionKey,
    pub quantity: Decimal,
    #[serde(default)]
    pub reference: Option<LedgerReference>,
}

/// A consumed hold and the `out` entry it turned into
#[derive(Debug, Clone, Serialize)]
pub struct ConsumedReservation {
    pub reservation: Reservation,
    pub entry: StockLedgerEntry,
}

impl ReservationManager {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, input), fields(key = %input.key, quantity = %input.quantity))]
    pub async fn reserve(&self, actor_id: Uuid, input: ReserveInput) -> AppResult<Reservation> {
        let mut tx = self.store.begin().await?;
        let reservation =
            reserve_in_tx(&mut *tx, input.key, input.quantity, input.reference, actor_id).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    #[tracing::instrument(skip(self))]
    pub async fn release(&self, reservation_id: Uuid) -> AppResult<Reservation> {
        let mut tx = self.store.begin().await?;
        let reservation = release_in_tx(&mut *tx, reservation_id).await?;
        tx.commit().await?;
        Ok(reservation)
    }

    /// Turn a hold into an `out` movement
    #[tracing::instrument(skip(self))]
    pub async fn consume(
        &self,
        actor_id: Uuid,
        reservation_id: Uuid,
        reference: Option<LedgerReference>,
    ) -> AppResult<ConsumedReservation> {
        let mut tx = self.store.begin().await?;
        let consumed = consume_in_tx(&mut *tx, reservation_id, reference, actor_id).await?;
        tx.commit().await?;
        Ok(consumed)
    }

    pub async fn get(&self, reservation_id: Uuid) -> AppResult<Reservation> {
        self.store
            .find_reservation(reservation_id)
            .await?
            .ok_or_else(|| AppError::not_found("Reservation"))
    }

    /// Active reservations created more than `older_than` ago. Nothing is
    /// expired here; cleanup belongs to whoever runs this listing.
    pub async fn list_orphans(&self, older_than: Duration) -> AppResult<Vec<Reservation>> {
        let orphans = self
            .store
            .reservations(&ReservationFilter {
                status: Some(ReservationStatus::Active),
                created_before: Some(Utc::now() - older_than),
                reference: None,
            })
            .await?;

        if !orphans.is_empty() {
            tracing::warn!(count = orphans.len(), "Found orphaned reservations");
        }
        Ok(orphans)
    }
}

/// Place a hold inside an open transaction
pub(crate) async fn reserve_in_tx(
    tx: &mut dyn StoreTx,
    key: PositionKey,
    quantity: Decimal,
    reference: Option<LedgerReference>,
    actor_id: Uuid,
) -> AppResult<Reservation> {
    validate_positive_quantity(quantity).map_err(|msg| AppError::validation("quantity", msg))?;

    let Some(mut position) = tx.lock_position(&key).await? else {
        return Err(AppError::InsufficientStock {
            available: Decimal::ZERO,
            requested: quantity,
        });
    };

    let available = position.available_quantity();
    if available < quantity {
        tracing::warn!(key = %key, available = %available, requested = %quantity, "Cannot reserve");
        return Err(AppError::InsufficientStock {
            available,
            requested: quantity,
        });
    }

    let now = Utc::now();
    position.reserved_quantity += quantity;
    position.updated_at = now;
    tx.save_position(&position).await?;

    let reservation = Reservation::new(key, quantity, reference, actor_id, now);
    tx.insert_reservation(&reservation).await?;

    tracing::info!(
        reservation_id = %reservation.id,
        key = %reservation.key,
        quantity = %quantity,
        "Reserved stock"
    );
    Ok(reservation)
}

async fn lock_active(tx: &mut dyn StoreTx, reservation_id: Uuid) -> AppResult<Reservation> {
    let reservation = tx
        .lock_reservation(reservation_id)
        .await?
        .ok_or_else(|| AppError::not_found("Reservation"))?;

    if !reservation.is_active() {
        return Err(AppError::InvalidTransition(format!(
            "reservation {} is already {}",
            reservation.id,
            reservation.status.as_str()
        )));
    }
    Ok(reservation)
}

/// Give a hold back to available stock inside an open transaction
pub(crate) async fn release_in_tx(
    tx: &mut dyn StoreTx,
    reservation_id: Uuid,
) -> AppResult<Reservation> {
    let mut reservation = lock_active(tx, reservation_id).await?;

    let mut position = tx
        .lock_position(&reservation.key)
        .await?
        .ok_or_else(|| AppError::not_found("Stock position"))?;

    if reservation.quantity > position.reserved_quantity {
        return Err(AppError::Internal(format!(
            "releasing {} but only {} reserved at {}",
            reservation.quantity, position.reserved_quantity, reservation.key
        )));
    }

    let now = Utc::now();
    position.reserved_quantity -= reservation.quantity;
    position.updated_at = now;
    tx.save_position(&position).await?;

    reservation.close(ReservationStatus::Released, now);
    tx.update_reservation(&reservation).await?;

    tracing::info!(reservation_id = %reservation.id, "Released reservation");
    Ok(reservation)
}

/// Consume a hold inside an open transaction. The posting is covered by the
/// hold itself, so it cannot fail for lack of available stock.
pub(crate) async fn consume_in_tx(
    tx: &mut dyn StoreTx,
    reservation_id: Uuid,
    reference: Option<LedgerReference>,
    actor_id: Uuid,
) -> AppResult<ConsumedReservation> {
    let mut reservation = lock_active(tx, reservation_id).await?;

    let reference = reference
        .or(reservation.reference)
        .unwrap_or_else(LedgerReference::manual);
    let draft = LedgerEntryDraft::new(
        reservation.key.clone(),
        MovementType::Out,
        reservation.quantity,
        reference,
        actor_id,
    );
    let entry = post_entry(tx, draft, reservation.quantity).await?;

    reservation.close(ReservationStatus::Consumed, entry.created_at);
    tx.update_reservation(&reservation).await?;

    Ok(ConsumedReservation { reservation, entry })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::StockLedger;
    use crate::store::MemoryStore;

    async fn stocked(qty: i64) -> (Arc<dyn LedgerStore>, PositionKey) {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new());
        let key = PositionKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        StockLedger::new(store.clone())
            .post(LedgerEntryDraft::new(
                key.clone(),
                MovementType::In,
                Decimal::from(qty),
                LedgerReference::manual(),
                Uuid::new_v4(),
            ))
            .await
            .unwrap();
        (store, key)
    }

    fn input(key: &PositionKey, qty: i64) -> ReserveInput {
        ReserveInput {
            key: key.clone(),
            quantity: Decimal::from(qty),
            reference: None,
        }
    }

    #[tokio::test]
    async fn test_reserve_reduces_available_only() {
        let (store, key) = stocked(10).await;
        let manager = ReservationManager::new(store.clone());

        manager.reserve(Uuid::new_v4(), input(&key, 4)).await.unwrap();

        let position = StockLedger::new(store).get_position(&key).await.unwrap();
        assert_eq!(position.quantity, Decimal::from(10));
        assert_eq!(position.available_quantity(), Decimal::from(6));
    }

    #[tokio::test]
    async fn test_reserve_beyond_available_fails() {
        let (store, key) = stocked(10).await;
        let manager = ReservationManager::new(store);

        manager.reserve(Uuid::new_v4(), input(&key, 8)).await.unwrap();
        let err = manager.reserve(Uuid::new_v4(), input(&key, 3)).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientStock { available, requested }
                if available == Decimal::from(2) && requested == Decimal::from(3)
        ));
    }

    #[tokio::test]
    async fn test_consume_posts_out_and_clears_hold() {
        let (store, key) = stocked(10).await;
        let manager = ReservationManager::new(store.clone());

        let reservation = manager.reserve(Uuid::new_v4(), input(&key, 10)).await.unwrap();
        let consumed = manager
            .consume(Uuid::new_v4(), reservation.id, None)
            .await
            .unwrap();

        assert_eq!(consumed.reservation.status, ReservationStatus::Consumed);
        assert_eq!(consumed.entry.movement_type, MovementType::Out);

        let position = StockLedger::new(store).get_position(&key).await.unwrap();
        assert!(position.is_empty());
    }

    #[tokio::test]
    async fn test_release_twice_is_invalid() {
        let (store, key) = stocked(5).await;
        let manager = ReservationManager::new(store);

        let reservation = manager.reserve(Uuid::new_v4(), input(&key, 5)).await.unwrap();
        manager.release(reservation.id).await.unwrap();

        let err = manager.release(reservation.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        let err = manager
            .consume(Uuid::new_v4(), reservation.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_list_orphans_by_age() {
        let (store, key) = stocked(5).await;
        let manager = ReservationManager::new(store);
        manager.reserve(Uuid::new_v4(), input(&key, 1)).await.unwrap();

        assert_eq!(manager.list_orphans(Duration::zero()).await.unwrap().len(), 1);
        assert!(manager.list_orphans(Duration::hours(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_reports_reserved_mismatch() {
        let (store, key) = stocked(5).await;
        let manager = ReservationManager::new(store.clone());
        let reservation = manager.reserve(Uuid::new_v4(), input(&key, 3)).await.unwrap();

        // Position lost track of part of the hold
        let mut tx = store.begin().await.unwrap();
        let mut position = tx.lock_position(&key).await.unwrap().unwrap();
        position.reserved_quantity = Decimal::ONE;
        tx.save_position(&position).await.unwrap();
        tx.commit().await.unwrap();

        let err = manager.release(reservation.id).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        let still_active = manager.get(reservation.id).await.unwrap();
        assert!(still_active.is_active());
        let position = StockLedger::new(store).get_position(&key).await.unwrap();
        assert_eq!(position.reserved_quantity, Decimal::ONE);
    }
}
