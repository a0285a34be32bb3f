//! Sales consumption workflow
//!
//! A sale either posts every line or none of them. Credit and backorder
//! flows hold the lines first and consume the holds later.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use shared::{
    validate_positive_quantity, EntryFilter, LedgerReference, MovementType, PositionKey,
    Reservation, Sale, SaleItem, SaleReturn, StockLedgerEntry,
};

use super::ledger::{post_entry, LedgerEntryDraft};
use super::reservation::{consume_in_tx, reserve_in_tx};
use crate::error::{AppError, AppResult};
use crate::store::LedgerStore;

/// Consumption workflow service
#[derive(Clone)]
pub struct ConsumptionWorkflow {
    store: Arc<dyn LedgerStore>,
}

fn validate_lines(items: &[SaleItem]) -> AppResult<()> {
    if items.is_empty() {
        return Err(AppError::validation("items", "At least one line is required"));
    }
    for item in items {
        validate_positive_quantity(item.quantity)
            .map_err(|msg| AppError::validation("quantity", msg))?;
    }
    Ok(())
}

impl ConsumptionWorkflow {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Post an `out` entry for every sale line, or fail the whole sale
    #[tracing::instrument(skip(self, sale), fields(sale_id = %sale.id))]
    pub async fn apply_sale(&self, actor_id: Uuid, sale: &Sale) -> AppResult<Vec<StockLedgerEntry>> {
        validate_lines(&sale.items)?;

        let reference = LedgerReference::sale(sale.id);
        let mut tx = self.store.begin().await?;
        if !tx.claim_posting(reference, actor_id).await? {
            return Err(AppError::DuplicatePosting(format!(
                "sale {} has already moved stock",
                sale.id
            )));
        }

        let mut entries = Vec::with_capacity(sale.items.len());
        for item in &sale.items {
            let draft = LedgerEntryDraft::new(
                item.position_key(sale.warehouse_id),
                MovementType::Out,
                item.quantity,
                reference,
                actor_id,
            );
            entries.push(post_entry(&mut *tx, draft, Decimal::ZERO).await?);
        }
        tx.commit().await?;

        tracing::info!(lines = entries.len(), "Applied sale");
        Ok(entries)
    }

    /// Reserve every sale line without moving stock
    #[tracing::instrument(skip(self, sale), fields(sale_id = %sale.id))]
    pub async fn hold_sale(&self, actor_id: Uuid, sale: &Sale) -> AppResult<Vec<Reservation>> {
        validate_lines(&sale.items)?;

        let reference = LedgerReference::sale(sale.id);
        let mut tx = self.store.begin().await?;
        if !tx.claim_posting(reference, actor_id).await? {
            return Err(AppError::DuplicatePosting(format!(
                "sale {} has already moved or held stock",
                sale.id
            )));
        }

        let mut reservations = Vec::with_capacity(sale.items.len());
        for item in &sale.items {
            reservations.push(
                reserve_in_tx(
                    &mut *tx,
                    item.position_key(sale.warehouse_id),
                    item.quantity,
                    Some(reference),
                    actor_id,
                )
                .await?,
            );
        }
        tx.commit().await?;

        tracing::info!(lines = reservations.len(), "Held sale");
        Ok(reservations)
    }

    /// Consume the holds placed for a sale
    #[tracing::instrument(skip(self, reservation_ids))]
    pub async fn fulfil_hold(
        &self,
        actor_id: Uuid,
        reservation_ids: &[Uuid],
    ) -> AppResult<Vec<StockLedgerEntry>> {
        if reservation_ids.is_empty() {
            return Err(AppError::validation(
                "reservation_ids",
                "At least one reservation is required",
            ));
        }

        let mut tx = self.store.begin().await?;
        let mut entries = Vec::with_capacity(reservation_ids.len());
        for id in reservation_ids {
            entries.push(consume_in_tx(&mut *tx, *id, None, actor_id).await?.entry);
        }
        tx.commit().await?;
        Ok(entries)
    }

    /// Post compensating `in` entries for goods returned against a sale.
    /// The original `out` entries are left untouched.
    #[tracing::instrument(skip(self, sale_return), fields(return_id = %sale_return.id, sale_id = %sale_return.sale_id))]
    pub async fn apply_return(
        &self,
        actor_id: Uuid,
        sale_return: &SaleReturn,
    ) -> AppResult<Vec<StockLedgerEntry>> {
        validate_lines(&sale_return.items)?;

        let sale_ref = LedgerReference::sale(sale_return.sale_id);
        let mut tx = self.store.begin().await?;
        if !tx
            .claim_posting(LedgerReference::sale_return(sale_return.id), actor_id)
            .await?
        {
            return Err(AppError::DuplicatePosting(format!(
                "return {} has already been posted",
                sale_return.id
            )));
        }

        let history = tx.list_entries(&EntryFilter::for_reference(sale_ref)).await?;
        let mut sold: BTreeMap<PositionKey, (Decimal, Option<Decimal>)> = BTreeMap::new();
        let mut returned: BTreeMap<PositionKey, Decimal> = BTreeMap::new();
        for entry in history {
            match entry.movement_type {
                MovementType::Out => {
                    let line = sold.entry(entry.key.clone()).or_insert((Decimal::ZERO, None));
                    line.0 += entry.quantity;
                    line.1 = entry.unit_cost.or(line.1);
                }
                MovementType::In => *returned.entry(entry.key.clone()).or_default() += entry.quantity,
                _ => {}
            }
        }

        let mut requested: BTreeMap<PositionKey, Decimal> = BTreeMap::new();
        for item in &sale_return.items {
            *requested
                .entry(item.position_key(sale_return.warehouse_id))
                .or_default() += item.quantity;
        }

        let mut entries = Vec::with_capacity(requested.len());
        for (key, quantity) in requested {
            let (sold_quantity, unit_cost) = sold.get(&key).copied().unwrap_or_default();
            let already = returned.get(&key).copied().unwrap_or_default();
            let returnable = sold_quantity - already;
            if quantity > returnable {
                return Err(AppError::QuantityMismatch(format!(
                    "cannot return {} of {}: {} sold, {} already returned",
                    quantity, key, sold_quantity, already
                )));
            }

            let draft = LedgerEntryDraft::new(key, MovementType::In, quantity, sale_ref, actor_id)
                .with_unit_cost(unit_cost)
                .with_notes(Some(format!("return {}", sale_return.id)));
            entries.push(post_entry(&mut *tx, draft, Decimal::ZERO).await?);
        }
        tx.commit().await?;

        tracing::info!(lines = entries.len(), "Applied sale return");
        Ok(entries)
    }
}
