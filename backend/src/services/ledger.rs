//! Stock ledger service
//!
//! All quantity changes go through [`post_entry`]: it locks the position,
//! checks availability, applies the signed delta and appends the immutable
//! entry inside the caller's transaction. Positions are a cache over the
//! ledger and can be reconciled against it at any time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared::{
    signed_delta, validate_non_negative, validate_positive_quantity, validate_stock_levels,
    validate_unit_cost, Direction, EntryFilter, LedgerReference, MovementType, Pagination,
    PositionFilter, PositionKey, ReconciliationReport, StockLedgerEntry, StockPosition,
    WarehouseValuation,
};

use crate::error::{AppError, AppResult};
use crate::store::{LedgerStore, StoreTx};

/// Stock ledger service
#[derive(Clone)]
pub struct StockLedger {
    store: Arc<dyn LedgerStore>,
}

/// A movement to be posted
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerEntryDraft {
    #[serde(flatten)]
    pub key: PositionKey,
    #[serde(default)]
    pub zone_id: Option<Uuid>,
    pub movement_type: MovementType,
    /// Required for adjustments, ignored otherwise
    #[serde(default)]
    pub direction: Option<Direction>,
    pub quantity: Decimal,
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
    pub reference: LedgerReference,
    pub actor_id: Uuid,
    #[serde(default)]
    pub notes: Option<String>,
}

impl LedgerEntryDraft {
    pub fn new(
        key: PositionKey,
        movement_type: MovementType,
        quantity: Decimal,
        reference: LedgerReference,
        actor_id: Uuid,
    ) -> Self {
        Self {
            key,
            zone_id: None,
            movement_type,
            direction: None,
            quantity,
            unit_cost: None,
            reference,
            actor_id,
            notes: None,
        }
    }

    pub fn with_unit_cost(mut self, unit_cost: Option<Decimal>) -> Self {
        self.unit_cost = unit_cost;
        self
    }

    pub fn with_zone(mut self, zone_id: Option<Uuid>) -> Self {
        self.zone_id = zone_id;
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }
}

/// Physical count for one position
#[derive(Debug, Clone, Deserialize)]
pub struct AdjustmentInput {
    #[serde(flatten)]
    pub key: PositionKey,
    pub counted_quantity: Decimal,
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
    #[serde(default)]
    pub zone_id: Option<Uuid>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Minimum stock and reorder point for one position
#[derive(Debug, Clone, Deserialize)]
pub struct StockLevelsInput {
    #[serde(flatten)]
    pub key: PositionKey,
    pub minimum_stock: Decimal,
    pub reorder_point: Decimal,
}

/// Flat CSV row for movement history exports
#[derive(Debug, Serialize)]
struct EntryCsvRow {
    sequence: i64,
    entry_id: Uuid,
    created_at: DateTime<Utc>,
    warehouse_id: Uuid,
    zone_id: Option<Uuid>,
    product_id: Uuid,
    unit_id: Uuid,
    lot_number: Option<String>,
    movement_type: &'static str,
    direction: Option<&'static str>,
    quantity: Decimal,
    unit_cost: Option<Decimal>,
    balance_after: Decimal,
    reference_kind: &'static str,
    reference_id: Uuid,
    actor_id: Uuid,
    notes: Option<String>,
}

impl From<StockLedgerEntry> for EntryCsvRow {
    fn from(entry: StockLedgerEntry) -> Self {
        Self {
            sequence: entry.sequence,
            entry_id: entry.id,
            created_at: entry.created_at,
            warehouse_id: entry.key.warehouse_id,
            zone_id: entry.zone_id,
            product_id: entry.key.product_id,
            unit_id: entry.key.unit_id,
            lot_number: entry.key.lot_number,
            movement_type: entry.movement_type.as_str(),
            direction: entry.direction.map(|d| d.as_str()),
            quantity: entry.quantity,
            unit_cost: entry.unit_cost,
            balance_after: entry.balance_after,
            reference_kind: entry.reference.kind.as_str(),
            reference_id: entry.reference.id,
            actor_id: entry.actor_id,
            notes: entry.notes,
        }
    }
}

impl StockLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Post a single movement. Adjustments carry an absolute count and go
    /// through [`StockLedger::adjust`].
    #[tracing::instrument(skip(self, draft), fields(key = %draft.key, movement = %draft.movement_type))]
    pub async fn post(&self, draft: LedgerEntryDraft) -> AppResult<StockLedgerEntry> {
        if draft.movement_type == MovementType::Adjustment {
            return Err(AppError::validation(
                "movement_type",
                "Adjustments are posted as physical counts",
            ));
        }

        let mut tx = self.store.begin().await?;
        let entry = post_entry(&mut *tx, draft, Decimal::ZERO).await?;
        tx.commit().await?;
        Ok(entry)
    }

    /// Set a position to a counted quantity. The ledger records the signed
    /// difference; a count that matches the books posts nothing.
    #[tracing::instrument(skip(self, input), fields(key = %input.key))]
    pub async fn adjust(
        &self,
        actor_id: Uuid,
        input: AdjustmentInput,
    ) -> AppResult<Option<StockLedgerEntry>> {
        validate_non_negative(input.counted_quantity)
            .map_err(|msg| AppError::validation("counted_quantity", msg))?;

        let mut tx = self.store.begin().await?;
        // A count that changes nothing drops the transaction, and with it any
        // row created here
        let current = tx.lock_or_create_position(&input.key).await?.quantity;

        let difference = input.counted_quantity - current;
        if difference.is_zero() {
            tracing::debug!("Count matches book quantity, nothing posted");
            return Ok(None);
        }

        let direction = if difference > Decimal::ZERO {
            Direction::Increase
        } else {
            Direction::Decrease
        };
        let mut draft = LedgerEntryDraft::new(
            input.key,
            MovementType::Adjustment,
            difference.abs(),
            LedgerReference::manual(),
            actor_id,
        )
        .with_unit_cost(input.unit_cost)
        .with_zone(input.zone_id)
        .with_notes(input.reason);
        draft.direction = Some(direction);

        let entry = post_entry(&mut *tx, draft, Decimal::ZERO).await?;
        tx.commit().await?;
        Ok(Some(entry))
    }

    pub async fn get_position(&self, key: &PositionKey) -> AppResult<StockPosition> {
        self.store
            .find_position(key)
            .await?
            .ok_or_else(|| AppError::not_found("Stock position"))
    }

    pub async fn list_positions(&self, filter: &PositionFilter) -> AppResult<Vec<StockPosition>> {
        self.store.positions(filter).await
    }

    /// Movement history in posting order
    pub async fn list_entries(&self, filter: &EntryFilter) -> AppResult<Vec<StockLedgerEntry>> {
        self.store.entries(filter, None).await
    }

    /// One page of movement history in posting order
    pub async fn list_entries_page(
        &self,
        filter: &EntryFilter,
        pagination: &Pagination,
    ) -> AppResult<Vec<StockLedgerEntry>> {
        self.store.entries(filter, Some(pagination)).await
    }

    /// Positions at or below their reorder point or under minimum stock
    pub async fn low_stock(&self, warehouse_id: Option<Uuid>) -> AppResult<Vec<StockPosition>> {
        let positions = self
            .list_positions(&PositionFilter {
                warehouse_id,
                product_id: None,
            })
            .await?;
        Ok(positions.into_iter().filter(|p| p.is_low_stock()).collect())
    }

    pub async fn valuation(&self, warehouse_id: Uuid) -> AppResult<WarehouseValuation> {
        let positions = self
            .list_positions(&PositionFilter {
                warehouse_id: Some(warehouse_id),
                product_id: None,
            })
            .await?;
        WarehouseValuation::from_positions(warehouse_id, &positions).map_err(|msg| {
            AppError::Internal(format!("valuation of warehouse {}: {}", warehouse_id, msg))
        })
    }

    /// Movement history as CSV
    pub async fn export_entries_csv(&self, filter: &EntryFilter) -> AppResult<String> {
        let entries = self.list_entries(filter).await?;

        let mut wtr = csv::Writer::from_writer(vec![]);
        for entry in entries {
            wtr.serialize(EntryCsvRow::from(entry))
                .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| AppError::Internal(format!("CSV writer error: {}", e)))?;
        String::from_utf8(bytes)
            .map_err(|e| AppError::Internal(format!("UTF-8 conversion error: {}", e)))
    }

    pub async fn set_stock_levels(&self, input: StockLevelsInput) -> AppResult<StockPosition> {
        validate_stock_levels(input.minimum_stock, input.reorder_point)
            .map_err(|msg| AppError::validation("stock_levels", msg))?;

        let mut tx = self.store.begin().await?;
        let mut position = tx
            .lock_position(&input.key)
            .await?
            .ok_or_else(|| AppError::not_found("Stock position"))?;

        position.minimum_stock = input.minimum_stock;
        position.reorder_point = input.reorder_point;
        position.updated_at = Utc::now();
        tx.save_position(&position).await?;
        tx.commit().await?;

        Ok(position)
    }

    /// Replay the ledger of one position and compare with the stored quantity
    pub async fn reconcile(&self, key: &PositionKey) -> AppResult<ReconciliationReport> {
        let mut tx = self.store.begin().await?;
        let position = tx.lock_position(key).await?;
        let entries = tx.list_entries(&EntryFilter::for_position(key)).await?;

        let stored = match position {
            Some(p) => p.quantity,
            None if !entries.is_empty() => Decimal::ZERO,
            None => return Err(AppError::not_found("Stock position")),
        };

        let report = ReconciliationReport::new(key.clone(), stored, &entries);
        log_mismatch(&report);
        Ok(report)
    }

    /// Reconcile every position that has a stored row or ledger history
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_all(&self) -> AppResult<Vec<ReconciliationReport>> {
        let mut tx = self.store.begin().await?;
        let positions = tx.list_positions(&PositionFilter::default()).await?;
        let entries = tx.list_entries(&EntryFilter::default()).await?;

        let mut history: BTreeMap<PositionKey, Vec<StockLedgerEntry>> = BTreeMap::new();
        for entry in entries {
            history.entry(entry.key.clone()).or_default().push(entry);
        }

        let mut reports = Vec::with_capacity(positions.len());
        for position in positions {
            let entries = history.remove(&position.key).unwrap_or_default();
            reports.push(ReconciliationReport::new(
                position.key,
                position.quantity,
                &entries,
            ));
        }
        // Ledger history for positions that no longer have a row
        for (key, entries) in history {
            reports.push(ReconciliationReport::new(key, Decimal::ZERO, &entries));
        }

        reports.iter().for_each(log_mismatch);
        tracing::info!(
            positions = reports.len(),
            mismatches = reports.iter().filter(|r| !r.matches).count(),
            "Reconciliation finished"
        );
        Ok(reports)
    }

    /// Delete an empty position
    pub async fn remove_position(&self, key: &PositionKey) -> AppResult<()> {
        let mut tx = self.store.begin().await?;
        let position = tx
            .lock_position(key)
            .await?
            .ok_or_else(|| AppError::not_found("Stock position"))?;

        if !position.is_empty() {
            return Err(AppError::InvalidTransition(format!(
                "position {} still holds {} on hand and {} reserved",
                key, position.quantity, position.reserved_quantity
            )));
        }

        tx.delete_position(key).await?;
        tx.commit().await?;
        tracing::info!(key = %key, "Removed empty stock position");
        Ok(())
    }
}

fn log_mismatch(report: &ReconciliationReport) {
    if !report.matches {
        tracing::warn!(
            key = %report.key,
            stored = %report.stored_quantity,
            replayed = %report.replayed_quantity,
            "Stock position does not match its ledger"
        );
    }
}

/// Post one movement inside an open transaction.
///
/// `released` is reserved quantity given up by the same step (a consumed
/// hold or a shipped transfer item); it becomes available to this posting
/// before the availability check runs.
pub(crate) async fn post_entry(
    tx: &mut dyn StoreTx,
    draft: LedgerEntryDraft,
    released: Decimal,
) -> AppResult<StockLedgerEntry> {
    validate_positive_quantity(draft.quantity)
        .map_err(|msg| AppError::validation("quantity", msg))?;
    validate_unit_cost(draft.unit_cost).map_err(|msg| AppError::validation("unit_cost", msg))?;
    let direction = match draft.movement_type {
        MovementType::Adjustment => Some(draft.direction.ok_or_else(|| {
            AppError::validation("direction", "Adjustments need a direction")
        })?),
        _ => None,
    };

    let now = Utc::now();
    let mut position = tx.lock_or_create_position(&draft.key).await?;

    if released > position.reserved_quantity {
        return Err(AppError::Internal(format!(
            "releasing {} but only {} reserved at {}",
            released, position.reserved_quantity, draft.key
        )));
    }
    position.reserved_quantity -= released;

    let delta = signed_delta(draft.movement_type, direction, draft.quantity);
    let unit_cost = if delta < Decimal::ZERO {
        let available = position.available_quantity();
        if available < draft.quantity {
            tracing::warn!(
                key = %draft.key,
                available = %available,
                requested = %draft.quantity,
                "Insufficient stock"
            );
            return Err(AppError::InsufficientStock {
                available,
                requested: draft.quantity,
            });
        }
        // Outbound stock leaves at the current average cost
        draft.unit_cost.or(Some(position.average_cost))
    } else {
        draft.unit_cost
    };

    position
        .apply_delta(delta, unit_cost, now)
        .map_err(|msg| AppError::validation("quantity", msg))?;
    tx.save_position(&position).await?;

    let entry = tx
        .append_entry(StockLedgerEntry {
            id: Uuid::new_v4(),
            sequence: 0,
            key: draft.key,
            zone_id: draft.zone_id,
            movement_type: draft.movement_type,
            direction,
            quantity: draft.quantity,
            unit_cost,
            balance_after: position.quantity,
            reference: draft.reference,
            actor_id: draft.actor_id,
            notes: draft.notes,
            created_at: now,
        })
        .await?;

    tracing::info!(
        warehouse_id = %entry.key.warehouse_id,
        product_id = %entry.key.product_id,
        movement = %entry.movement_type,
        quantity = %entry.quantity,
        balance_after = %entry.balance_after,
        reference = %entry.reference,
        "Posted ledger entry"
    );
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ledger() -> StockLedger {
        StockLedger::new(Arc::new(MemoryStore::new()))
    }

    fn key() -> PositionKey {
        PositionKey::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    fn draft(key: &PositionKey, movement: MovementType, qty: i64) -> LedgerEntryDraft {
        LedgerEntryDraft::new(
            key.clone(),
            movement,
            Decimal::from(qty),
            LedgerReference::manual(),
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn test_out_without_position_is_insufficient() {
        let ledger = ledger();
        let key = key();

        let err = ledger.post(draft(&key, MovementType::Out, 1)).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientStock { available, .. } if available.is_zero()
        ));
        assert!(ledger.get_position(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let ledger = ledger();
        let err = ledger.post(draft(&key(), MovementType::In, 0)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_outbound_entry_carries_average_cost() {
        let ledger = ledger();
        let key = key();
        ledger
            .post(draft(&key, MovementType::In, 10).with_unit_cost(Some(Decimal::from(4))))
            .await
            .unwrap();

        let out = ledger.post(draft(&key, MovementType::Out, 3)).await.unwrap();
        assert_eq!(out.unit_cost, Some(Decimal::from(4)));
        assert_eq!(out.balance_after, Decimal::from(7));
    }

    #[tokio::test]
    async fn test_adjust_to_count() {
        let ledger = ledger();
        let key = key();
        ledger.post(draft(&key, MovementType::In, 10)).await.unwrap();

        let input = |count: i64| AdjustmentInput {
            key: key.clone(),
            counted_quantity: Decimal::from(count),
            unit_cost: None,
            zone_id: None,
            reason: Some("cycle count".into()),
        };

        let entry = ledger.adjust(Uuid::new_v4(), input(7)).await.unwrap().unwrap();
        assert_eq!(entry.direction, Some(Direction::Decrease));
        assert_eq!(entry.quantity, Decimal::from(3));

        assert!(ledger.adjust(Uuid::new_v4(), input(7)).await.unwrap().is_none());

        let entry = ledger.adjust(Uuid::new_v4(), input(12)).await.unwrap().unwrap();
        assert_eq!(entry.direction, Some(Direction::Increase));
        assert_eq!(ledger.get_position(&key).await.unwrap().quantity, Decimal::from(12));
    }

    #[tokio::test]
    async fn test_remove_position_requires_empty() {
        let ledger = ledger();
        let key = key();
        ledger.post(draft(&key, MovementType::In, 2)).await.unwrap();

        let err = ledger.remove_position(&key).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        ledger.post(draft(&key, MovementType::Out, 2)).await.unwrap();
        ledger.remove_position(&key).await.unwrap();

        // History survives the row and still replays to zero
        let report = ledger.reconcile(&key).await.unwrap();
        assert!(report.matches);
        assert_eq!(report.entry_count, 2);
    }

    #[tokio::test]
    async fn test_csv_export_has_header_and_rows() {
        let ledger = ledger();
        let key = key();
        ledger.post(draft(&key, MovementType::In, 5)).await.unwrap();
        ledger.post(draft(&key, MovementType::Out, 1)).await.unwrap();

        let csv = ledger
            .export_entries_csv(&EntryFilter::for_position(&key))
            .await
            .unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("sequence,entry_id"));
        assert!(lines[2].contains(",out,"));
    }

    #[tokio::test]
    async fn test_post_rejects_adjustment_delta() {
        let ledger = ledger();
        let key = key();
        ledger.post(draft(&key, MovementType::In, 10)).await.unwrap();

        let mut adjustment = draft(&key, MovementType::Adjustment, 7);
        adjustment.direction = Some(Direction::Increase);
        let err = ledger.post(adjustment).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation { ref field, .. } if field == "movement_type"
        ));

        assert_eq!(ledger.get_position(&key).await.unwrap().quantity, Decimal::from(10));
        let entries = ledger.list_entries(&EntryFilter::for_position(&key)).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_quantity_beyond_range_is_rejected_without_panic() {
        let ledger = ledger();
        let key = key();

        let huge = LedgerEntryDraft::new(
            key.clone(),
            MovementType::In,
            Decimal::MAX,
            LedgerReference::manual(),
            Uuid::new_v4(),
        );
        let err = ledger.post(huge).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "quantity"));

        let costly = draft(&key, MovementType::In, 1)
            .with_unit_cost(Some(Decimal::from(1_000_000_000_000_000i64)));
        let err = ledger.post(costly).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "unit_cost"));

        // Each posting fits, the running balance would not
        let near_limit = Decimal::from(99_999_999_999_999i64);
        ledger
            .post(
                LedgerEntryDraft::new(
                    key.clone(),
                    MovementType::In,
                    near_limit,
                    LedgerReference::manual(),
                    Uuid::new_v4(),
                )
                .with_unit_cost(Some(near_limit)),
            )
            .await
            .unwrap();
        let err = ledger
            .post(draft(&key, MovementType::In, 1).with_unit_cost(Some(Decimal::ONE)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "quantity"));

        let position = ledger.get_position(&key).await.unwrap();
        assert_eq!(position.quantity, near_limit);
        assert!(ledger.reconcile(&key).await.unwrap().matches);
    }

    #[tokio::test]
    async fn test_sub_micro_quantities_are_rejected() {
        let ledger = ledger();
        let key = key();

        let tiny = LedgerEntryDraft::new(
            key.clone(),
            MovementType::In,
            Decimal::new(6, 7),
            LedgerReference::manual(),
            Uuid::new_v4(),
        );
        let err = ledger.post(tiny).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let err = ledger
            .adjust(
                Uuid::new_v4(),
                AdjustmentInput {
                    key: key.clone(),
                    counted_quantity: Decimal::new(12_345_678, 7),
                    unit_cost: None,
                    zone_id: None,
                    reason: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation { ref field, .. } if field == "counted_quantity"
        ));
        assert!(ledger.get_position(&key).await.is_err());
    }

    #[tokio::test]
    async fn test_entries_page_follows_posting_order() {
        let ledger = ledger();
        let key = key();
        for qty in 1..=5 {
            ledger.post(draft(&key, MovementType::In, qty)).await.unwrap();
        }

        let page = Pagination {
            page: 2,
            per_page: 2,
        };
        let entries = ledger
            .list_entries_page(&EntryFilter::for_position(&key), &page)
            .await
            .unwrap();
        let quantities: Vec<Decimal> = entries.iter().map(|e| e.quantity).collect();
        assert_eq!(quantities, vec![Decimal::from(3), Decimal::from(4)]);
    }

    #[tokio::test]
    async fn test_reads_proceed_while_posting_is_open() {
        let store = Arc::new(MemoryStore::with_lock_timeout(
            std::time::Duration::from_millis(20),
        ));
        let ledger = StockLedger::new(store.clone());
        let key = key();
        ledger.post(draft(&key, MovementType::In, 4)).await.unwrap();

        let _open = store.begin().await.unwrap();
        let position = ledger.get_position(&key).await.unwrap();
        assert_eq!(position.quantity, Decimal::from(4));
        assert_eq!(ledger.list_positions(&PositionFilter::default()).await.unwrap().len(), 1);
    }
}
