//! HTTP handlers for stock positions and ledger entries

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use shared::{
    EntryFilter, LedgerReference, MovementType, Pagination, PositionFilter,
    PositionKey, ReconciliationReport, ReferenceKind, StockLedgerEntry, StockPosition,
    WarehouseValuation,
};

use super::{non_negative_quantity, positive_quantity};
use crate::error::{AppError, AppResult};
use crate::middleware::CurrentActor;
use crate::services::{
    retry_busy, AdjustmentInput, LedgerEntryDraft, StockLedger, StockLevelsInput,
};
use crate::AppState;

/// Query identifying a single position
#[derive(Debug, Deserialize)]
pub struct PositionLookupQuery {
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
    pub unit_id: Uuid,
    pub lot_number: Option<String>,
}

impl From<PositionLookupQuery> for PositionKey {
    fn from(query: PositionLookupQuery) -> Self {
        PositionKey {
            warehouse_id: query.warehouse_id,
            product_id: query.product_id,
            unit_id: query.unit_id,
            lot_number: query.lot_number,
        }
    }
}

/// Query parameters for movement history
#[derive(Debug, Deserialize)]
pub struct EntryQuery {
    pub warehouse_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
    pub reference_kind: Option<ReferenceKind>,
    pub reference_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub format: Option<String>, // "json" or "csv"
}

impl EntryQuery {
    fn filter(&self) -> EntryFilter {
        let reference = match (self.reference_kind, self.reference_id) {
            (Some(kind), Some(id)) => Some(LedgerReference::new(kind, id)),
            _ => None,
        };
        EntryFilter {
            warehouse_id: self.warehouse_id,
            product_id: self.product_id,
            unit_id: self.unit_id,
            lot_number: None,
            movement_type: self.movement_type,
            reference,
            from: self.from,
            to: self.to,
        }
    }

    fn pagination(&self) -> Pagination {
        let default = Pagination::default();
        Pagination {
            page: self.page.unwrap_or(default.page),
            per_page: self.per_page.unwrap_or(default.per_page).clamp(1, 1000),
        }
    }
}

/// Request to post a movement
#[derive(Debug, Deserialize, Validate)]
pub struct MovementRequest {
    #[serde(flatten)]
    pub key: PositionKey,
    pub zone_id: Option<Uuid>,
    pub movement_type: MovementType,
    #[validate(custom = "positive_quantity")]
    pub quantity: Decimal,
    #[validate(custom = "non_negative_quantity")]
    pub unit_cost: Option<Decimal>,
    pub reference: Option<LedgerReference>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// Physical count request
#[derive(Debug, Deserialize, Validate)]
pub struct AdjustmentRequest {
    #[serde(flatten)]
    pub key: PositionKey,
    #[validate(custom = "non_negative_quantity")]
    pub counted_quantity: Decimal,
    #[validate(custom = "non_negative_quantity")]
    pub unit_cost: Option<Decimal>,
    pub zone_id: Option<Uuid>,
    #[validate(length(max = 1000))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StockLevelsRequest {
    #[serde(flatten)]
    pub key: PositionKey,
    #[validate(custom = "non_negative_quantity")]
    pub minimum_stock: Decimal,
    #[validate(custom = "non_negative_quantity")]
    pub reorder_point: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct WarehouseQuery {
    pub warehouse_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileQuery {
    pub warehouse_id: Option<Uuid>,
    pub mismatches_only: Option<bool>,
}

/// List stock positions
pub async fn list_positions(
    State(state): State<AppState>,
    Query(filter): Query<PositionFilter>,
) -> AppResult<Json<Vec<StockPosition>>> {
    let service = StockLedger::new(state.store);
    let positions = service.list_positions(&filter).await?;
    Ok(Json(positions))
}

/// Get one stock position
pub async fn lookup_position(
    State(state): State<AppState>,
    Query(query): Query<PositionLookupQuery>,
) -> AppResult<Json<StockPosition>> {
    let service = StockLedger::new(state.store);
    let position = service.get_position(&query.into()).await?;
    Ok(Json(position))
}

/// Set minimum stock and reorder point
pub async fn set_stock_levels(
    State(state): State<AppState>,
    Json(input): Json<StockLevelsRequest>,
) -> AppResult<Json<StockPosition>> {
    input.validate()?;

    let service = StockLedger::new(state.store.clone());
    let levels = StockLevelsInput {
        key: input.key,
        minimum_stock: input.minimum_stock,
        reorder_point: input.reorder_point,
    };
    let position = retry_busy(&state.retry_policy(), || {
        service.set_stock_levels(levels.clone())
    })
    .await?;
    Ok(Json(position))
}

/// Movement history, as JSON or CSV
pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<EntryQuery>,
) -> AppResult<Response> {
    let service = StockLedger::new(state.store);
    let filter = query.filter();

    if query.format.as_deref() == Some("csv") {
        let csv = service.export_entries_csv(&filter).await?;
        return Ok((
            [
                (header::CONTENT_TYPE, "text/csv"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"stock_ledger.csv\"",
                ),
            ],
            csv,
        )
            .into_response());
    }

    let entries: Vec<StockLedgerEntry> = service
        .list_entries_page(&filter, &query.pagination())
        .await?;
    Ok(Json(entries).into_response())
}

/// Post a movement
pub async fn post_movement(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(input): Json<MovementRequest>,
) -> AppResult<Json<StockLedgerEntry>> {
    input.validate()?;
    if input.movement_type == MovementType::Adjustment {
        return Err(AppError::validation(
            "movement_type",
            "Adjustments are posted as physical counts",
        ));
    }

    let draft = LedgerEntryDraft {
        key: input.key,
        zone_id: input.zone_id,
        movement_type: input.movement_type,
        direction: None,
        quantity: input.quantity,
        unit_cost: input.unit_cost,
        reference: input.reference.unwrap_or_else(LedgerReference::manual),
        actor_id: actor.0,
        notes: input.notes,
    };

    let service = StockLedger::new(state.store.clone());
    let entry = retry_busy(&state.retry_policy(), || service.post(draft.clone())).await?;
    Ok(Json(entry))
}

/// Record a physical count
pub async fn adjust_stock(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(input): Json<AdjustmentRequest>,
) -> AppResult<Json<Option<StockLedgerEntry>>> {
    input.validate()?;

    let adjustment = AdjustmentInput {
        key: input.key,
        counted_quantity: input.counted_quantity,
        unit_cost: input.unit_cost,
        zone_id: input.zone_id,
        reason: input.reason,
    };

    let service = StockLedger::new(state.store.clone());
    let entry = retry_busy(&state.retry_policy(), || {
        service.adjust(actor.0, adjustment.clone())
    })
    .await?;
    Ok(Json(entry))
}

/// Positions that need reordering
pub async fn list_low_stock(
    State(state): State<AppState>,
    Query(query): Query<WarehouseQuery>,
) -> AppResult<Json<Vec<StockPosition>>> {
    let service = StockLedger::new(state.store);
    let positions = service.low_stock(query.warehouse_id).await?;
    Ok(Json(positions))
}

/// Stock value of a warehouse
pub async fn get_valuation(
    State(state): State<AppState>,
    Path(warehouse_id): Path<Uuid>,
) -> AppResult<Json<WarehouseValuation>> {
    let service = StockLedger::new(state.store);
    let valuation = service.valuation(warehouse_id).await?;
    Ok(Json(valuation))
}

/// Compare stored positions with their replayed ledger
pub async fn reconcile_positions(
    State(state): State<AppState>,
    Query(query): Query<ReconcileQuery>,
) -> AppResult<Json<Vec<ReconciliationReport>>> {
    let service = StockLedger::new(state.store);
    let reports = service
        .reconcile_all()
        .await?
        .into_iter()
        .filter(|r| query.warehouse_id.map_or(true, |w| r.key.warehouse_id == w))
        .filter(|r| !query.mismatches_only.unwrap_or(false) || !r.matches)
        .collect();
    Ok(Json(reports))
}
