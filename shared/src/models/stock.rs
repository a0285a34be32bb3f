//! Stock position and ledger entry models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{quantity_limit, QUANTITY_SCALE};

/// Identity of a stock position: one row per warehouse, product, unit and lot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
    pub unit_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot_number: Option<String>,
}

impl PositionKey {
    pub fn new(warehouse_id: Uuid, product_id: Uuid, unit_id: Uuid) -> Self {
        Self {
            warehouse_id,
            product_id,
            unit_id,
            lot_number: None,
        }
    }

    pub fn with_lot(mut self, lot_number: impl Into<String>) -> Self {
        self.lot_number = Some(lot_number.into());
        self
    }

    /// Same product, unit and lot in another warehouse
    pub fn in_warehouse(&self, warehouse_id: Uuid) -> Self {
        Self {
            warehouse_id,
            ..self.clone()
        }
    }
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.warehouse_id, self.product_id, self.unit_id
        )?;
        if let Some(lot) = &self.lot_number {
            write!(f, "#{}", lot)?;
        }
        Ok(())
    }
}

/// Current, reserved and available quantity of one product in one warehouse.
///
/// The position is a cache over the ledger: every change to `quantity` is
/// mirrored by exactly one [`StockLedgerEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockPosition {
    pub id: Uuid,
    #[serde(flatten)]
    pub key: PositionKey,
    pub quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub minimum_stock: Decimal,
    pub reorder_point: Decimal,
    pub average_cost: Decimal,
    pub last_movement_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockPosition {
    /// Empty position, created lazily on the first movement into a warehouse
    pub fn empty(key: PositionKey, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            quantity: Decimal::ZERO,
            reserved_quantity: Decimal::ZERO,
            minimum_stock: Decimal::ZERO,
            reorder_point: Decimal::ZERO,
            average_cost: Decimal::ZERO,
            last_movement_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn available_quantity(&self) -> Decimal {
        self.quantity - self.reserved_quantity
    }

    /// A position may only be removed once nothing is on hand or held
    pub fn is_empty(&self) -> bool {
        self.quantity.is_zero() && self.reserved_quantity.is_zero()
    }

    /// Low stock when available falls to the reorder point or on-hand drops
    /// below the minimum. Positions without thresholds never alert.
    pub fn is_low_stock(&self) -> bool {
        let below_reorder =
            self.reorder_point > Decimal::ZERO && self.available_quantity() <= self.reorder_point;
        let below_minimum =
            self.minimum_stock > Decimal::ZERO && self.quantity < self.minimum_stock;
        below_reorder || below_minimum
    }

    /// `None` when the product does not fit a decimal
    pub fn stock_value(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.average_cost)
    }

    /// Apply an already validated signed delta and record the movement time.
    /// Inbound deltas carrying a cost roll the weighted average forward.
    /// Leaves the position untouched when the result would leave the stored
    /// range.
    pub fn apply_delta(
        &mut self,
        delta: Decimal,
        unit_cost: Option<Decimal>,
        at: DateTime<Utc>,
    ) -> Result<(), &'static str> {
        let quantity = self
            .quantity
            .checked_add(delta)
            .ok_or("Quantity exceeds the supported range")?;
        if quantity.abs() >= quantity_limit() {
            return Err("Quantity exceeds the supported range");
        }

        if delta > Decimal::ZERO {
            if let Some(cost) = unit_cost {
                self.average_cost =
                    weighted_average_cost(self.quantity, self.average_cost, delta, cost)
                        .ok_or("Stock value exceeds the supported range")?;
            }
        }
        self.quantity = quantity;
        self.last_movement_at = Some(at);
        self.updated_at = at;
        Ok(())
    }
}

/// Weighted average cost after receiving `incoming` units at `incoming_cost`,
/// rounded to the stored scale. `None` on decimal overflow.
pub fn weighted_average_cost(
    on_hand: Decimal,
    current_cost: Decimal,
    incoming: Decimal,
    incoming_cost: Decimal,
) -> Option<Decimal> {
    let on_hand = on_hand.max(Decimal::ZERO);
    let total = on_hand.checked_add(incoming)?;
    if total.is_zero() {
        return Some(current_cost);
    }
    let value = on_hand
        .checked_mul(current_cost)?
        .checked_add(incoming.checked_mul(incoming_cost)?)?;
    Some(value.checked_div(total)?.round_dp(QUANTITY_SCALE))
}

/// Kind of quantity change recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
    TransferOut,
    TransferIn,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Adjustment => "adjustment",
            MovementType::TransferOut => "transfer_out",
            MovementType::TransferIn => "transfer_in",
        }
    }

    /// Movements that take stock out of a warehouse and therefore need
    /// available quantity
    pub fn is_outbound(&self) -> bool {
        matches!(self, MovementType::Out | MovementType::TransferOut)
    }
}

impl std::str::FromStr for MovementType {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(MovementType::In),
            "out" => Ok(MovementType::Out),
            "adjustment" => Ok(MovementType::Adjustment),
            "transfer_out" => Ok(MovementType::TransferOut),
            "transfer_in" => Ok(MovementType::TransferIn),
            _ => Err("Unknown movement type"),
        }
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of an adjustment entry. Adjustments are the only movement whose
/// sign is not implied by its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Increase => "increase",
            Direction::Decrease => "decrease",
        }
    }
}

/// Kind of document that caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    PurchaseReceipt,
    Sale,
    SaleReturn,
    StockTransfer,
    Manual,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::PurchaseReceipt => "purchase_receipt",
            ReferenceKind::Sale => "sale",
            ReferenceKind::SaleReturn => "sale_return",
            ReferenceKind::StockTransfer => "stock_transfer",
            ReferenceKind::Manual => "manual",
        }
    }
}

impl std::str::FromStr for ReferenceKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase_receipt" => Ok(ReferenceKind::PurchaseReceipt),
            "sale" => Ok(ReferenceKind::Sale),
            "sale_return" => Ok(ReferenceKind::SaleReturn),
            "stock_transfer" => Ok(ReferenceKind::StockTransfer),
            "manual" => Ok(ReferenceKind::Manual),
            _ => Err("Unknown reference kind"),
        }
    }
}

/// Tagged pointer to the document that caused a movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerReference {
    pub kind: ReferenceKind,
    pub id: Uuid,
}

impl LedgerReference {
    pub fn new(kind: ReferenceKind, id: Uuid) -> Self {
        Self { kind, id }
    }

    pub fn purchase_receipt(id: Uuid) -> Self {
        Self::new(ReferenceKind::PurchaseReceipt, id)
    }

    pub fn sale(id: Uuid) -> Self {
        Self::new(ReferenceKind::Sale, id)
    }

    pub fn sale_return(id: Uuid) -> Self {
        Self::new(ReferenceKind::SaleReturn, id)
    }

    pub fn stock_transfer(id: Uuid) -> Self {
        Self::new(ReferenceKind::StockTransfer, id)
    }

    /// Operator-entered movement without a source document
    pub fn manual() -> Self {
        Self::new(ReferenceKind::Manual, Uuid::new_v4())
    }
}

impl std::fmt::Display for LedgerReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Immutable record of one quantity change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLedgerEntry {
    pub id: Uuid,
    /// Position in the global append order, assigned by the store
    pub sequence: i64,
    #[serde(flatten)]
    pub key: PositionKey,
    pub zone_id: Option<Uuid>,
    pub movement_type: MovementType,
    /// Only set on adjustments
    pub direction: Option<Direction>,
    /// Always a positive magnitude
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    /// On-hand quantity of the position right after this entry
    pub balance_after: Decimal,
    pub reference: LedgerReference,
    pub actor_id: Uuid,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StockLedgerEntry {
    pub fn signed_quantity(&self) -> Decimal {
        signed_delta(self.movement_type, self.direction, self.quantity)
    }
}

/// Signed effect of a movement on the on-hand quantity
pub fn signed_delta(
    movement_type: MovementType,
    direction: Option<Direction>,
    quantity: Decimal,
) -> Decimal {
    match movement_type {
        MovementType::In | MovementType::TransferIn => quantity,
        MovementType::Out | MovementType::TransferOut => -quantity,
        MovementType::Adjustment => match direction {
            Some(Direction::Decrease) => -quantity,
            _ => quantity,
        },
    }
}

/// Sum the signed quantities of a ledger slice. Replaying every entry of a
/// position must reproduce its stored quantity.
pub fn replay_quantity<'a, I>(entries: I) -> Decimal
where
    I: IntoIterator<Item = &'a StockLedgerEntry>,
{
    entries
        .into_iter()
        .fold(Decimal::ZERO, |acc, entry| acc + entry.signed_quantity())
}

/// Result of comparing a stored position with its replayed ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    #[serde(flatten)]
    pub key: PositionKey,
    pub stored_quantity: Decimal,
    pub replayed_quantity: Decimal,
    pub entry_count: usize,
    pub matches: bool,
}

impl ReconciliationReport {
    pub fn new(key: PositionKey, stored_quantity: Decimal, entries: &[StockLedgerEntry]) -> Self {
        let replayed_quantity = replay_quantity(entries);
        Self {
            key,
            stored_quantity,
            replayed_quantity,
            entry_count: entries.len(),
            matches: stored_quantity == replayed_quantity,
        }
    }
}

/// Valuation line for one position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionValuation {
    #[serde(flatten)]
    pub key: PositionKey,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub total_value: Decimal,
}

/// Stock valuation for a warehouse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseValuation {
    pub warehouse_id: Uuid,
    pub lines: Vec<PositionValuation>,
    pub total_value: Decimal,
}

impl WarehouseValuation {
    pub fn from_positions(
        warehouse_id: Uuid,
        positions: &[StockPosition],
    ) -> Result<Self, &'static str> {
        let mut lines = Vec::new();
        let mut total_value = Decimal::ZERO;
        for p in positions.iter().filter(|p| p.key.warehouse_id == warehouse_id) {
            let value = p
                .stock_value()
                .ok_or("Stock value exceeds the supported range")?;
            total_value = total_value
                .checked_add(value)
                .ok_or("Stock value exceeds the supported range")?;
            lines.push(PositionValuation {
                key: p.key.clone(),
                quantity: p.quantity,
                average_cost: p.average_cost,
                total_value: value,
            });
        }
        Ok(Self {
            warehouse_id,
            lines,
            total_value,
        })
    }
}
