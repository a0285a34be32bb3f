//! Stock transfer workflow
//!
//! Drives a transfer through draft, approval, shipment and receipt. Each
//! step posts to exactly one warehouse: approval and shipment touch the
//! source, receipt touches the destination.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use shared::{
    validate_positive_quantity, validate_receipt_split, validate_shipped_quantity,
    validate_transfer_warehouses, LedgerReference, MovementType, ReceiptLine, ShipmentLine,
    StockLedgerEntry, StockTransfer, StockTransferItem, TransferItemStatus, TransferStatus,
    TransferSummary,
};

use super::ledger::{post_entry, LedgerEntryDraft};
use super::reservation::{release_in_tx, reserve_in_tx};
use crate::error::{AppError, AppResult};
use crate::store::{LedgerStore, StoreTx};

/// Transfer workflow service
#[derive(Clone)]
pub struct TransferWorkflow {
    store: Arc<dyn LedgerStore>,
}

/// Input for creating a transfer
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransferInput {
    pub from_warehouse_id: Uuid,
    pub to_warehouse_id: Uuid,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<TransferItemInput>,
}

/// One requested product line
#[derive(Debug, Clone, Deserialize)]
pub struct TransferItemInput {
    pub product_id: Uuid,
    pub unit_id: Uuid,
    #[serde(default)]
    pub lot_number: Option<String>,
    pub requested_quantity: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TransferItemInput {
    fn into_item(self) -> AppResult<StockTransferItem> {
        validate_positive_quantity(self.requested_quantity)
            .map_err(|msg| AppError::validation("requested_quantity", msg))?;
        Ok(StockTransferItem::new(
            self.product_id,
            self.unit_id,
            self.lot_number,
            self.requested_quantity,
            self.notes,
        ))
    }
}

impl TransferWorkflow {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Create a transfer in `draft`
    #[tracing::instrument(skip(self, input))]
    pub async fn create(
        &self,
        actor_id: Uuid,
        input: CreateTransferInput,
    ) -> AppResult<StockTransfer> {
        validate_transfer_warehouses(input.from_warehouse_id, input.to_warehouse_id)
            .map_err(|msg| AppError::validation("to_warehouse_id", msg))?;

        let mut transfer = StockTransfer::new(
            input.from_warehouse_id,
            input.to_warehouse_id,
            input.notes,
            actor_id,
            Utc::now(),
        );
        transfer.items = input
            .items
            .into_iter()
            .map(TransferItemInput::into_item)
            .collect::<AppResult<Vec<_>>>()?;

        let mut tx = self.store.begin().await?;
        tx.insert_transfer(&transfer).await?;
        tx.commit().await?;

        tracing::info!(
            transfer_id = %transfer.id,
            from = %transfer.from_warehouse_id,
            to = %transfer.to_warehouse_id,
            items = transfer.items.len(),
            "Created stock transfer"
        );
        Ok(transfer)
    }

    pub async fn add_item(
        &self,
        transfer_id: Uuid,
        input: TransferItemInput,
    ) -> AppResult<StockTransfer> {
        let item = input.into_item()?;

        let mut tx = self.store.begin().await?;
        let mut transfer = lock_transfer(&mut *tx, transfer_id).await?;
        require_draft(&transfer, "add items to")?;

        transfer.items.push(item);
        transfer.updated_at = Utc::now();
        tx.update_transfer(&transfer).await?;
        tx.commit().await?;
        Ok(transfer)
    }

    pub async fn remove_item(&self, transfer_id: Uuid, item_id: Uuid) -> AppResult<StockTransfer> {
        let mut tx = self.store.begin().await?;
        let mut transfer = lock_transfer(&mut *tx, transfer_id).await?;
        require_draft(&transfer, "remove items from")?;

        let before = transfer.items.len();
        transfer.items.retain(|i| i.id != item_id);
        if transfer.items.len() == before {
            return Err(AppError::not_found("Transfer item"));
        }

        transfer.updated_at = Utc::now();
        tx.update_transfer(&transfer).await?;
        tx.commit().await?;
        Ok(transfer)
    }

    /// Send a draft for approval
    #[tracing::instrument(skip(self))]
    pub async fn submit(&self, actor_id: Uuid, transfer_id: Uuid) -> AppResult<StockTransfer> {
        let mut tx = self.store.begin().await?;
        let mut transfer = lock_transfer(&mut *tx, transfer_id).await?;
        check_transition(&transfer, TransferStatus::PendingApproval)?;

        if transfer.items.is_empty() {
            return Err(AppError::InvalidTransition(
                "cannot submit a transfer without items".to_string(),
            ));
        }
        if let Some(item) = transfer
            .items
            .iter()
            .find(|i| i.requested_quantity <= Decimal::ZERO)
        {
            return Err(AppError::validation(
                "requested_quantity",
                format!("item {} has no requested quantity", item.id),
            ));
        }

        let now = Utc::now();
        transfer.status = TransferStatus::PendingApproval;
        transfer.submitted_by = Some(actor_id);
        transfer.submitted_at = Some(now);
        transfer.updated_at = now;
        tx.update_transfer(&transfer).await?;
        tx.commit().await?;

        tracing::info!(transfer_id = %transfer.id, "Submitted stock transfer");
        Ok(transfer)
    }

    /// Approve and hold the requested quantity of every item at the source
    #[tracing::instrument(skip(self))]
    pub async fn approve(&self, actor_id: Uuid, transfer_id: Uuid) -> AppResult<StockTransfer> {
        let mut tx = self.store.begin().await?;
        let mut transfer = lock_transfer(&mut *tx, transfer_id).await?;
        check_transition(&transfer, TransferStatus::Approved)?;

        let reference = LedgerReference::stock_transfer(transfer.id);
        let source = transfer.from_warehouse_id;
        for item in transfer.items.iter_mut() {
            let reservation = reserve_in_tx(
                &mut *tx,
                item.position_key(source),
                item.requested_quantity,
                Some(reference),
                actor_id,
            )
            .await?;
            item.reservation_id = Some(reservation.id);
            item.status = TransferItemStatus::Reserved;
        }

        let now = Utc::now();
        transfer.status = TransferStatus::Approved;
        transfer.approved_by = Some(actor_id);
        transfer.approved_at = Some(now);
        transfer.updated_at = now;
        tx.update_transfer(&transfer).await?;
        tx.commit().await?;

        tracing::info!(transfer_id = %transfer.id, "Approved stock transfer");
        Ok(transfer)
    }

    /// Ship an approved transfer. Items without a shipment line ship their
    /// full requested quantity.
    #[tracing::instrument(skip(self, lines))]
    pub async fn ship(
        &self,
        actor_id: Uuid,
        transfer_id: Uuid,
        lines: Vec<ShipmentLine>,
    ) -> AppResult<StockTransfer> {
        let mut tx = self.store.begin().await?;
        let mut transfer = lock_transfer(&mut *tx, transfer_id).await?;
        if transfer.status.is_shipped() {
            return Err(AppError::DuplicatePosting(format!(
                "transfer {} has already shipped",
                transfer.id
            )));
        }
        check_transition(&transfer, TransferStatus::InTransit)?;

        for line in &lines {
            if transfer.item(line.item_id).is_none() {
                return Err(AppError::not_found("Transfer item"));
            }
        }

        let reference = LedgerReference::stock_transfer(transfer.id);
        let source = transfer.from_warehouse_id;
        for item in transfer.items.iter_mut() {
            if item.status == TransferItemStatus::Cancelled {
                continue;
            }
            let shipped = lines
                .iter()
                .find(|l| l.item_id == item.id)
                .map(|l| l.shipped_quantity)
                .unwrap_or(item.requested_quantity);
            validate_shipped_quantity(item.requested_quantity, shipped)
                .map_err(|msg| AppError::QuantityMismatch(format!("item {}: {}", item.id, msg)))?;

            // The approval hold is released by the same posting that ships
            let released = match item.reservation_id {
                Some(reservation_id) => close_hold(&mut *tx, reservation_id).await?,
                None => Decimal::ZERO,
            };

            let draft = LedgerEntryDraft::new(
                item.position_key(source),
                MovementType::TransferOut,
                shipped,
                reference,
                actor_id,
            )
            .with_notes(item.notes.clone());
            let entry = post_entry(&mut *tx, draft, released).await?;

            item.shipped_quantity = shipped;
            item.unit_cost = entry.unit_cost;
            item.status = TransferItemStatus::Shipped;
        }

        let now = Utc::now();
        transfer.status = TransferStatus::InTransit;
        transfer.shipped_by = Some(actor_id);
        transfer.shipped_at = Some(now);
        transfer.updated_at = now;
        tx.update_transfer(&transfer).await?;
        tx.commit().await?;

        tracing::info!(transfer_id = %transfer.id, "Shipped stock transfer");
        Ok(transfer)
    }

    /// Confirm arrival at the destination. Only received units enter stock;
    /// damaged units are recorded on the item.
    #[tracing::instrument(skip(self, lines))]
    pub async fn receive(
        &self,
        actor_id: Uuid,
        transfer_id: Uuid,
        lines: Vec<ReceiptLine>,
    ) -> AppResult<StockTransfer> {
        if lines.is_empty() {
            return Err(AppError::validation("lines", "At least one receipt line is required"));
        }

        let mut tx = self.store.begin().await?;
        let mut transfer = lock_transfer(&mut *tx, transfer_id).await?;
        match transfer.status {
            TransferStatus::InTransit | TransferStatus::PartiallyReceived => {}
            TransferStatus::Completed => {
                return Err(AppError::DuplicatePosting(format!(
                    "transfer {} is already fully received",
                    transfer.id
                )));
            }
            other => {
                return Err(AppError::InvalidTransition(format!(
                    "cannot receive a transfer in status {}",
                    other
                )));
            }
        }

        let reference = LedgerReference::stock_transfer(transfer.id);
        let destination = transfer.to_warehouse_id;
        let mut entries: Vec<StockLedgerEntry> = Vec::new();
        for line in lines {
            let item = transfer
                .item_mut(line.item_id)
                .ok_or_else(|| AppError::not_found("Transfer item"))?;
            validate_receipt_split(line.received_quantity, line.damaged_quantity)
                .map_err(|msg| AppError::validation("received_quantity", msg))?;

            if item.status == TransferItemStatus::Cancelled {
                return Err(AppError::InvalidTransition(format!(
                    "item {} was cancelled",
                    item.id
                )));
            }
            if item.is_settled() {
                return Err(AppError::DuplicatePosting(format!(
                    "item {} is already received",
                    item.id
                )));
            }

            if line.received_quantity > Decimal::ZERO {
                let draft = LedgerEntryDraft::new(
                    item.position_key(destination),
                    MovementType::TransferIn,
                    line.received_quantity,
                    reference,
                    actor_id,
                )
                .with_unit_cost(item.unit_cost);
                entries.push(post_entry(&mut *tx, draft, Decimal::ZERO).await?);
            }
            item.record_receipt(line.received_quantity, line.damaged_quantity);

            if !item.variance_quantity.is_zero() && item.is_settled() {
                tracing::warn!(
                    transfer_id = %transfer_id,
                    item_id = %item.id,
                    variance = %item.variance_quantity,
                    "Transfer item settled with variance"
                );
            }
        }

        let next = if transfer.all_items_settled() {
            TransferStatus::Completed
        } else {
            TransferStatus::PartiallyReceived
        };
        check_transition(&transfer, next)?;

        let now = Utc::now();
        transfer.status = next;
        transfer.received_by = Some(actor_id);
        transfer.received_at = Some(now);
        if next == TransferStatus::Completed {
            transfer.completed_at = Some(now);
        }
        transfer.updated_at = now;
        tx.update_transfer(&transfer).await?;
        tx.commit().await?;

        tracing::info!(
            transfer_id = %transfer.id,
            status = %transfer.status,
            entries = entries.len(),
            "Received stock transfer"
        );
        Ok(transfer)
    }

    /// Cancel a transfer that has not shipped, giving back any holds
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        actor_id: Uuid,
        transfer_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<StockTransfer> {
        let mut tx = self.store.begin().await?;
        let mut transfer = lock_transfer(&mut *tx, transfer_id).await?;
        check_transition(&transfer, TransferStatus::Cancelled)?;

        for item in transfer.items.iter_mut() {
            if let Some(reservation_id) = item.reservation_id {
                if let Some(reservation) = tx.lock_reservation(reservation_id).await? {
                    if reservation.is_active() {
                        release_in_tx(&mut *tx, reservation_id).await?;
                    }
                }
            }
            item.status = TransferItemStatus::Cancelled;
        }

        let now = Utc::now();
        transfer.status = TransferStatus::Cancelled;
        transfer.cancellation_reason = reason;
        transfer.cancelled_by = Some(actor_id);
        transfer.cancelled_at = Some(now);
        transfer.updated_at = now;
        tx.update_transfer(&transfer).await?;
        tx.commit().await?;

        tracing::info!(transfer_id = %transfer.id, "Cancelled stock transfer");
        Ok(transfer)
    }

    pub async fn get(&self, transfer_id: Uuid) -> AppResult<StockTransfer> {
        self.store
            .find_transfer(transfer_id)
            .await?
            .ok_or_else(|| AppError::not_found("Stock transfer"))
    }

    pub async fn list(&self, status: Option<TransferStatus>) -> AppResult<Vec<StockTransfer>> {
        self.store.transfers(status).await
    }

    pub async fn summary(&self, transfer_id: Uuid) -> AppResult<TransferSummary> {
        Ok(self.get(transfer_id).await?.summary())
    }
}

async fn lock_transfer(tx: &mut dyn StoreTx, transfer_id: Uuid) -> AppResult<StockTransfer> {
    tx.lock_transfer(transfer_id)
        .await?
        .ok_or_else(|| AppError::not_found("Stock transfer"))
}

fn check_transition(transfer: &StockTransfer, next: TransferStatus) -> AppResult<()> {
    if transfer.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(AppError::InvalidTransition(format!(
            "transfer {} cannot move from {} to {}",
            transfer.id, transfer.status, next
        )))
    }
}

fn require_draft(transfer: &StockTransfer, action: &str) -> AppResult<()> {
    if transfer.status != TransferStatus::Draft {
        return Err(AppError::InvalidTransition(format!(
            "cannot {} a transfer in status {}",
            action, transfer.status
        )));
    }
    Ok(())
}

/// Mark an approval hold as consumed by shipment and return its quantity.
/// The position's reserved quantity is released by the posting itself.
async fn close_hold(tx: &mut dyn StoreTx, reservation_id: Uuid) -> AppResult<Decimal> {
    let Some(mut reservation) = tx.lock_reservation(reservation_id).await? else {
        return Ok(Decimal::ZERO);
    };
    if !reservation.is_active() {
        return Ok(Decimal::ZERO);
    }

    let quantity = reservation.quantity;
    reservation.close(shared::ReservationStatus::Released, Utc::now());
    tx.update_reservation(&reservation).await?;
    Ok(quantity)
}
