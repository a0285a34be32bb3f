//! PostgreSQL ledger store
//!
//! Each transaction runs at the configured isolation level with bounded lock
//! and statement timeouts. Positions, reservations and transfers are read
//! `FOR UPDATE`, so the availability check and the delta that follows happen
//! under the same row lock. Read models run the same queries on a pooled
//! connection without `FOR UPDATE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use shared::{
    Direction, EntryFilter, LedgerReference, MovementType, Pagination, PositionFilter, PositionKey,
    ReferenceKind, Reservation, ReservationStatus, StockLedgerEntry, StockPosition, StockTransfer,
    StockTransferItem, TransferItemStatus, TransferStatus,
};

use super::{LedgerStore, ReservationFilter, StoreTx};
use crate::config::{IsolationLevel, LedgerConfig};
use crate::error::{AppError, AppResult};

/// Ledger store backed by PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
    isolation: IsolationLevel,
    lock_timeout_ms: u64,
    statement_timeout_ms: u64,
}

impl PgStore {
    pub fn new(db: PgPool, config: &LedgerConfig) -> Self {
        Self {
            db,
            isolation: config.isolation,
            lock_timeout_ms: config.lock_timeout_ms,
            statement_timeout_ms: config.statement_timeout_ms,
        }
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let mut tx = self.db.begin().await?;

        // Must precede any other statement in the transaction
        sqlx::query(&format!(
            "SET TRANSACTION ISOLATION LEVEL {}",
            self.isolation.as_sql()
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = '{}ms'",
            self.statement_timeout_ms
        ))
        .execute(&mut *tx)
        .await?;

        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.db).await.is_ok()
    }

    async fn find_position(&self, key: &PositionKey) -> AppResult<Option<StockPosition>> {
        let mut conn = self.db.acquire().await?;
        fetch_position(&mut *conn, key, false).await
    }

    async fn positions(&self, filter: &PositionFilter) -> AppResult<Vec<StockPosition>> {
        let mut conn = self.db.acquire().await?;
        fetch_positions(&mut *conn, filter).await
    }

    async fn entries(
        &self,
        filter: &EntryFilter,
        page: Option<&Pagination>,
    ) -> AppResult<Vec<StockLedgerEntry>> {
        let mut conn = self.db.acquire().await?;
        fetch_entries(&mut *conn, filter, page).await
    }

    async fn find_reservation(&self, id: Uuid) -> AppResult<Option<Reservation>> {
        let mut conn = self.db.acquire().await?;
        fetch_reservation(&mut *conn, id, false).await
    }

    async fn reservations(&self, filter: &ReservationFilter) -> AppResult<Vec<Reservation>> {
        let mut conn = self.db.acquire().await?;
        fetch_reservations(&mut *conn, filter).await
    }

    async fn find_transfer(&self, id: Uuid) -> AppResult<Option<StockTransfer>> {
        let mut conn = self.db.acquire().await?;
        fetch_transfer(&mut *conn, id, false).await
    }

    async fn transfers(&self, status: Option<TransferStatus>) -> AppResult<Vec<StockTransfer>> {
        let mut conn = self.db.acquire().await?;
        fetch_transfers(&mut *conn, status).await
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

const POSITION_COLUMNS: &str = "id, warehouse_id, product_id, unit_id, lot_number, quantity, \
     reserved_quantity, minimum_stock, reorder_point, average_cost, last_movement_at, \
     created_at, updated_at";

const ENTRY_COLUMNS: &str = "sequence, id, warehouse_id, zone_id, product_id, unit_id, \
     lot_number, movement_type, direction, quantity, unit_cost, balance_after, reference_kind, \
     reference_id, actor_id, notes, created_at";

const RESERVATION_COLUMNS: &str = "id, warehouse_id, product_id, unit_id, lot_number, quantity, \
     status, reference_kind, reference_id, actor_id, created_at, closed_at";

const TRANSFER_COLUMNS: &str = "id, from_warehouse_id, to_warehouse_id, status, notes, \
     cancellation_reason, requested_by, submitted_by, approved_by, shipped_by, received_by, \
     cancelled_by, created_at, submitted_at, approved_at, shipped_at, received_at, completed_at, \
     cancelled_at, updated_at";

const TRANSFER_ITEM_COLUMNS: &str = "id, transfer_id, product_id, unit_id, lot_number, \
     requested_quantity, shipped_quantity, received_quantity, damaged_quantity, \
     variance_quantity, unit_cost, status, reservation_id, notes";

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_position(&mut self, key: &PositionKey) -> AppResult<Option<StockPosition>> {
        fetch_position(&mut *self.tx, key, true).await
    }

    async fn lock_or_create_position(&mut self, key: &PositionKey) -> AppResult<StockPosition> {
        // A FOR UPDATE on a missing row locks nothing, so make sure the row exists
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO stock_positions (
                id, warehouse_id, product_id, unit_id, lot_number, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (warehouse_id, product_id, unit_id, (COALESCE(lot_number, '')))
            DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key.warehouse_id)
        .bind(key.product_id)
        .bind(key.unit_id)
        .bind(&key.lot_number)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        fetch_position(&mut *self.tx, key, true)
            .await?
            .ok_or_else(|| AppError::Internal(format!("position {} vanished after insert", key)))
    }

    async fn save_position(&mut self, position: &StockPosition) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_positions (
                id, warehouse_id, product_id, unit_id, lot_number, quantity, reserved_quantity,
                minimum_stock, reorder_point, average_cost, last_movement_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (warehouse_id, product_id, unit_id, (COALESCE(lot_number, '')))
            DO UPDATE SET
                quantity = EXCLUDED.quantity,
                reserved_quantity = EXCLUDED.reserved_quantity,
                minimum_stock = EXCLUDED.minimum_stock,
                reorder_point = EXCLUDED.reorder_point,
                average_cost = EXCLUDED.average_cost,
                last_movement_at = EXCLUDED.last_movement_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(position.id)
        .bind(position.key.warehouse_id)
        .bind(position.key.product_id)
        .bind(position.key.unit_id)
        .bind(&position.key.lot_number)
        .bind(position.quantity)
        .bind(position.reserved_quantity)
        .bind(position.minimum_stock)
        .bind(position.reorder_point)
        .bind(position.average_cost)
        .bind(position.last_movement_at)
        .bind(position.created_at)
        .bind(position.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn delete_position(&mut self, key: &PositionKey) -> AppResult<()> {
        sqlx::query(
            r#"
            DELETE FROM stock_positions
            WHERE warehouse_id = $1 AND product_id = $2 AND unit_id = $3
              AND lot_number IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(key.warehouse_id)
        .bind(key.product_id)
        .bind(key.unit_id)
        .bind(&key.lot_number)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn list_positions(&mut self, filter: &PositionFilter) -> AppResult<Vec<StockPosition>> {
        fetch_positions(&mut *self.tx, filter).await
    }

    async fn append_entry(&mut self, mut entry: StockLedgerEntry) -> AppResult<StockLedgerEntry> {
        let sequence = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO stock_ledger_entries (
                id, warehouse_id, zone_id, product_id, unit_id, lot_number, movement_type,
                direction, quantity, unit_cost, balance_after, reference_kind, reference_id,
                actor_id, notes, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING sequence
            "#,
        )
        .bind(entry.id)
        .bind(entry.key.warehouse_id)
        .bind(entry.zone_id)
        .bind(entry.key.product_id)
        .bind(entry.key.unit_id)
        .bind(&entry.key.lot_number)
        .bind(entry.movement_type.as_str())
        .bind(entry.direction.map(|d| d.as_str()))
        .bind(entry.quantity)
        .bind(entry.unit_cost)
        .bind(entry.balance_after)
        .bind(entry.reference.kind.as_str())
        .bind(entry.reference.id)
        .bind(entry.actor_id)
        .bind(&entry.notes)
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        entry.sequence = sequence;
        Ok(entry)
    }

    async fn list_entries(&mut self, filter: &EntryFilter) -> AppResult<Vec<StockLedgerEntry>> {
        fetch_entries(&mut *self.tx, filter, None).await
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_reservations (
                id, warehouse_id, product_id, unit_id, lot_number, quantity, status,
                reference_kind, reference_id, actor_id, created_at, closed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.key.warehouse_id)
        .bind(reservation.key.product_id)
        .bind(reservation.key.unit_id)
        .bind(&reservation.key.lot_number)
        .bind(reservation.quantity)
        .bind(reservation.status.as_str())
        .bind(reservation.reference.map(|r| r.kind.as_str()))
        .bind(reservation.reference.map(|r| r.id))
        .bind(reservation.actor_id)
        .bind(reservation.created_at)
        .bind(reservation.closed_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_reservation(&mut self, id: Uuid) -> AppResult<Option<Reservation>> {
        fetch_reservation(&mut *self.tx, id, true).await
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE stock_reservations
            SET quantity = $1, status = $2, closed_at = $3
            WHERE id = $4
            "#,
        )
        .bind(reservation.quantity)
        .bind(reservation.status.as_str())
        .bind(reservation.closed_at)
        .bind(reservation.id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Reservation"));
        }
        Ok(())
    }

    async fn insert_transfer(&mut self, transfer: &StockTransfer) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_transfers (
                id, from_warehouse_id, to_warehouse_id, status, notes, requested_by,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(transfer.id)
        .bind(transfer.from_warehouse_id)
        .bind(transfer.to_warehouse_id)
        .bind(transfer.status.as_str())
        .bind(&transfer.notes)
        .bind(transfer.requested_by)
        .bind(transfer.created_at)
        .bind(transfer.updated_at)
        .execute(&mut *self.tx)
        .await?;

        // Header columns beyond creation are written by the common update path
        self.update_transfer(transfer).await
    }

    async fn lock_transfer(&mut self, id: Uuid) -> AppResult<Option<StockTransfer>> {
        fetch_transfer(&mut *self.tx, id, true).await
    }

    async fn update_transfer(&mut self, transfer: &StockTransfer) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE stock_transfers
            SET status = $1, notes = $2, cancellation_reason = $3,
                submitted_by = $4, approved_by = $5, shipped_by = $6, received_by = $7,
                cancelled_by = $8, submitted_at = $9, approved_at = $10, shipped_at = $11,
                received_at = $12, completed_at = $13, cancelled_at = $14, updated_at = $15
            WHERE id = $16
            "#,
        )
        .bind(transfer.status.as_str())
        .bind(&transfer.notes)
        .bind(&transfer.cancellation_reason)
        .bind(transfer.submitted_by)
        .bind(transfer.approved_by)
        .bind(transfer.shipped_by)
        .bind(transfer.received_by)
        .bind(transfer.cancelled_by)
        .bind(transfer.submitted_at)
        .bind(transfer.approved_at)
        .bind(transfer.shipped_at)
        .bind(transfer.received_at)
        .bind(transfer.completed_at)
        .bind(transfer.cancelled_at)
        .bind(transfer.updated_at)
        .bind(transfer.id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Stock transfer"));
        }

        sqlx::query("DELETE FROM stock_transfer_items WHERE transfer_id = $1")
            .bind(transfer.id)
            .execute(&mut *self.tx)
            .await?;

        for (line_no, item) in transfer.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO stock_transfer_items (
                    id, transfer_id, line_no, product_id, unit_id, lot_number,
                    requested_quantity, shipped_quantity, received_quantity, damaged_quantity,
                    variance_quantity, unit_cost, status, reservation_id, notes
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
            )
            .bind(item.id)
            .bind(transfer.id)
            .bind(line_no as i32)
            .bind(item.product_id)
            .bind(item.unit_id)
            .bind(&item.lot_number)
            .bind(item.requested_quantity)
            .bind(item.shipped_quantity)
            .bind(item.received_quantity)
            .bind(item.damaged_quantity)
            .bind(item.variance_quantity)
            .bind(item.unit_cost)
            .bind(item.status.as_str())
            .bind(item.reservation_id)
            .bind(&item.notes)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn claim_posting(&mut self, document: LedgerReference, actor_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledger_postings (reference_kind, reference_id, actor_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (reference_kind, reference_id) DO NOTHING
            "#,
        )
        .bind(document.kind.as_str())
        .bind(document.id)
        .bind(actor_id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Queries shared by transactions and plain reads
// ============================================================================

fn lock_clause(lock: bool) -> &'static str {
    if lock {
        "FOR UPDATE"
    } else {
        ""
    }
}

async fn fetch_position(
    conn: &mut PgConnection,
    key: &PositionKey,
    lock: bool,
) -> AppResult<Option<StockPosition>> {
    let row = sqlx::query_as::<_, PositionRow>(&format!(
        r#"
        SELECT {POSITION_COLUMNS}
        FROM stock_positions
        WHERE warehouse_id = $1 AND product_id = $2 AND unit_id = $3
          AND lot_number IS NOT DISTINCT FROM $4
        {}
        "#,
        lock_clause(lock)
    ))
    .bind(key.warehouse_id)
    .bind(key.product_id)
    .bind(key.unit_id)
    .bind(&key.lot_number)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(Into::into))
}

async fn fetch_positions(
    conn: &mut PgConnection,
    filter: &PositionFilter,
) -> AppResult<Vec<StockPosition>> {
    let rows = sqlx::query_as::<_, PositionRow>(&format!(
        r#"
        SELECT {POSITION_COLUMNS}
        FROM stock_positions
        WHERE ($1::uuid IS NULL OR warehouse_id = $1)
          AND ($2::uuid IS NULL OR product_id = $2)
        ORDER BY warehouse_id, product_id, unit_id, lot_number NULLS FIRST
        "#
    ))
    .bind(filter.warehouse_id)
    .bind(filter.product_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

async fn fetch_entries(
    conn: &mut PgConnection,
    filter: &EntryFilter,
    page: Option<&Pagination>,
) -> AppResult<Vec<StockLedgerEntry>> {
    let (filter_lot, lot_number) = match &filter.lot_number {
        Some(lot) => (true, lot.clone()),
        None => (false, None),
    };

    // LIMIT NULL and OFFSET NULL leave the result unbounded
    let rows = sqlx::query_as::<_, EntryRow>(&format!(
        r#"
        SELECT {ENTRY_COLUMNS}
        FROM stock_ledger_entries
        WHERE ($1::uuid IS NULL OR warehouse_id = $1)
          AND ($2::uuid IS NULL OR product_id = $2)
          AND ($3::uuid IS NULL OR unit_id = $3)
          AND (NOT $4 OR lot_number IS NOT DISTINCT FROM $5)
          AND ($6::text IS NULL OR movement_type = $6)
          AND ($7::text IS NULL OR (reference_kind = $7 AND reference_id = $8))
          AND ($9::timestamptz IS NULL OR created_at >= $9)
          AND ($10::timestamptz IS NULL OR created_at <= $10)
        ORDER BY sequence
        LIMIT $11 OFFSET $12
        "#
    ))
    .bind(filter.warehouse_id)
    .bind(filter.product_id)
    .bind(filter.unit_id)
    .bind(filter_lot)
    .bind(lot_number)
    .bind(filter.movement_type.map(|m| m.as_str()))
    .bind(filter.reference.map(|r| r.kind.as_str()))
    .bind(filter.reference.map(|r| r.id))
    .bind(filter.from)
    .bind(filter.to)
    .bind(page.map(|p| p.limit() as i64))
    .bind(page.map(|p| p.offset() as i64))
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

async fn fetch_reservation(
    conn: &mut PgConnection,
    id: Uuid,
    lock: bool,
) -> AppResult<Option<Reservation>> {
    let row = sqlx::query_as::<_, ReservationRow>(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM stock_reservations WHERE id = $1 {}",
        lock_clause(lock)
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(TryInto::try_into).transpose()
}

async fn fetch_reservations(
    conn: &mut PgConnection,
    filter: &ReservationFilter,
) -> AppResult<Vec<Reservation>> {
    let rows = sqlx::query_as::<_, ReservationRow>(&format!(
        r#"
        SELECT {RESERVATION_COLUMNS}
        FROM stock_reservations
        WHERE ($1::text IS NULL OR status = $1)
          AND ($2::timestamptz IS NULL OR created_at <= $2)
          AND ($3::text IS NULL OR (reference_kind = $3 AND reference_id = $4))
        ORDER BY created_at
        "#
    ))
    .bind(filter.status.map(|s| s.as_str()))
    .bind(filter.created_before)
    .bind(filter.reference.map(|r| r.kind.as_str()))
    .bind(filter.reference.map(|r| r.id))
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

async fn fetch_transfer(
    conn: &mut PgConnection,
    id: Uuid,
    lock: bool,
) -> AppResult<Option<StockTransfer>> {
    let row = sqlx::query_as::<_, TransferRow>(&format!(
        "SELECT {TRANSFER_COLUMNS} FROM stock_transfers WHERE id = $1 {}",
        lock_clause(lock)
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let items = sqlx::query_as::<_, TransferItemRow>(&format!(
        r#"
        SELECT {TRANSFER_ITEM_COLUMNS}
        FROM stock_transfer_items
        WHERE transfer_id = $1
        ORDER BY line_no
        "#
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(row.into_transfer(items)?))
}

async fn fetch_transfers(
    conn: &mut PgConnection,
    status: Option<TransferStatus>,
) -> AppResult<Vec<StockTransfer>> {
    let rows = sqlx::query_as::<_, TransferRow>(&format!(
        r#"
        SELECT {TRANSFER_COLUMNS}
        FROM stock_transfers
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY created_at DESC
        "#
    ))
    .bind(status.map(|s| s.as_str()))
    .fetch_all(&mut *conn)
    .await?;

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut items = sqlx::query_as::<_, TransferItemRow>(&format!(
        r#"
        SELECT {TRANSFER_ITEM_COLUMNS}
        FROM stock_transfer_items
        WHERE transfer_id = ANY($1)
        ORDER BY transfer_id, line_no
        "#
    ))
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|row| {
            let (own, rest): (Vec<_>, Vec<_>) =
                items.drain(..).partition(|item| item.transfer_id == row.id);
            items = rest;
            row.into_transfer(own)
        })
        .collect()
}

// ============================================================================
// Row types
// ============================================================================

fn parse_column<T>(value: &str, column: &str) -> AppResult<T>
where
    T: std::str::FromStr<Err = &'static str>,
{
    value
        .parse()
        .map_err(|e| AppError::Internal(format!("Invalid {} '{}': {}", column, value, e)))
}

fn parse_reference(kind: Option<String>, id: Option<Uuid>) -> AppResult<Option<LedgerReference>> {
    match (kind, id) {
        (Some(kind), Some(id)) => Ok(Some(LedgerReference::new(
            parse_column::<ReferenceKind>(&kind, "reference_kind")?,
            id,
        ))),
        _ => Ok(None),
    }
}

#[derive(Debug, FromRow)]
struct PositionRow {
    id: Uuid,
    warehouse_id: Uuid,
    product_id: Uuid,
    unit_id: Uuid,
    lot_number: Option<String>,
    quantity: Decimal,
    reserved_quantity: Decimal,
    minimum_stock: Decimal,
    reorder_point: Decimal,
    average_cost: Decimal,
    last_movement_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PositionRow> for StockPosition {
    fn from(row: PositionRow) -> Self {
        StockPosition {
            id: row.id,
            key: PositionKey {
                warehouse_id: row.warehouse_id,
                product_id: row.product_id,
                unit_id: row.unit_id,
                lot_number: row.lot_number,
            },
            quantity: row.quantity,
            reserved_quantity: row.reserved_quantity,
            minimum_stock: row.minimum_stock,
            reorder_point: row.reorder_point,
            average_cost: row.average_cost,
            last_movement_at: row.last_movement_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct EntryRow {
    sequence: i64,
    id: Uuid,
    warehouse_id: Uuid,
    zone_id: Option<Uuid>,
    product_id: Uuid,
    unit_id: Uuid,
    lot_number: Option<String>,
    movement_type: String,
    direction: Option<String>,
    quantity: Decimal,
    unit_cost: Option<Decimal>,
    balance_after: Decimal,
    reference_kind: String,
    reference_id: Uuid,
    actor_id: Uuid,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for StockLedgerEntry {
    type Error = AppError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let direction = match row.direction.as_deref() {
            Some("increase") => Some(Direction::Increase),
            Some("decrease") => Some(Direction::Decrease),
            Some(other) => {
                return Err(AppError::Internal(format!("Invalid direction '{}'", other)))
            }
            None => None,
        };

        Ok(StockLedgerEntry {
            id: row.id,
            sequence: row.sequence,
            key: PositionKey {
                warehouse_id: row.warehouse_id,
                product_id: row.product_id,
                unit_id: row.unit_id,
                lot_number: row.lot_number,
            },
            zone_id: row.zone_id,
            movement_type: parse_column::<MovementType>(&row.movement_type, "movement_type")?,
            direction,
            quantity: row.quantity,
            unit_cost: row.unit_cost,
            balance_after: row.balance_after,
            reference: LedgerReference::new(
                parse_column::<ReferenceKind>(&row.reference_kind, "reference_kind")?,
                row.reference_id,
            ),
            actor_id: row.actor_id,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReservationRow {
    id: Uuid,
    warehouse_id: Uuid,
    product_id: Uuid,
    unit_id: Uuid,
    lot_number: Option<String>,
    quantity: Decimal,
    status: String,
    reference_kind: Option<String>,
    reference_id: Option<Uuid>,
    actor_id: Uuid,
    created_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = AppError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            id: row.id,
            key: PositionKey {
                warehouse_id: row.warehouse_id,
                product_id: row.product_id,
                unit_id: row.unit_id,
                lot_number: row.lot_number,
            },
            quantity: row.quantity,
            status: parse_column::<ReservationStatus>(&row.status, "reservation status")?,
            reference: parse_reference(row.reference_kind, row.reference_id)?,
            actor_id: row.actor_id,
            created_at: row.created_at,
            closed_at: row.closed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransferRow {
    id: Uuid,
    from_warehouse_id: Uuid,
    to_warehouse_id: Uuid,
    status: String,
    notes: Option<String>,
    cancellation_reason: Option<String>,
    requested_by: Uuid,
    submitted_by: Option<Uuid>,
    approved_by: Option<Uuid>,
    shipped_by: Option<Uuid>,
    received_by: Option<Uuid>,
    cancelled_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TransferRow {
    fn into_transfer(self, items: Vec<TransferItemRow>) -> AppResult<StockTransfer> {
        Ok(StockTransfer {
            id: self.id,
            from_warehouse_id: self.from_warehouse_id,
            to_warehouse_id: self.to_warehouse_id,
            status: parse_column::<TransferStatus>(&self.status, "transfer status")?,
            items: items
                .into_iter()
                .map(TryInto::try_into)
                .collect::<AppResult<Vec<_>>>()?,
            notes: self.notes,
            cancellation_reason: self.cancellation_reason,
            requested_by: self.requested_by,
            submitted_by: self.submitted_by,
            approved_by: self.approved_by,
            shipped_by: self.shipped_by,
            received_by: self.received_by,
            cancelled_by: self.cancelled_by,
            created_at: self.created_at,
            submitted_at: self.submitted_at,
            approved_at: self.approved_at,
            shipped_at: self.shipped_at,
            received_at: self.received_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransferItemRow {
    id: Uuid,
    transfer_id: Uuid,
    product_id: Uuid,
    unit_id: Uuid,
    lot_number: Option<String>,
    requested_quantity: Decimal,
    shipped_quantity: Decimal,
    received_quantity: Decimal,
    damaged_quantity: Decimal,
    variance_quantity: Decimal,
    unit_cost: Option<Decimal>,
    status: String,
    reservation_id: Option<Uuid>,
    notes: Option<String>,
}

impl TryFrom<TransferItemRow> for StockTransferItem {
    type Error = AppError;

    fn try_from(row: TransferItemRow) -> Result<Self, Self::Error> {
        Ok(StockTransferItem {
            id: row.id,
            product_id: row.product_id,
            unit_id: row.unit_id,
            lot_number: row.lot_number,
            requested_quantity: row.requested_quantity,
            shipped_quantity: row.shipped_quantity,
            received_quantity: row.received_quantity,
            damaged_quantity: row.damaged_quantity,
            variance_quantity: row.variance_quantity,
            unit_cost: row.unit_cost,
            status: parse_column::<TransferItemStatus>(&row.status, "transfer item status")?,
            reservation_id: row.reservation_id,
            notes: row.notes,
        })
    }
}
