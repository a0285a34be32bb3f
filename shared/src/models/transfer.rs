//! Stock transfer models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PositionKey;

/// A stock move between two warehouses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockTransfer {
    pub id: Uuid,
    pub from_warehouse_id: Uuid,
    pub to_warehouse_id: Uuid,
    pub status: TransferStatus,
    pub items: Vec<StockTransferItem>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub requested_by: Uuid,
    pub submitted_by: Option<Uuid>,
    pub approved_by: Option<Uuid>,
    pub shipped_by: Option<Uuid>,
    pub received_by: Option<Uuid>,
    pub cancelled_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl StockTransfer {
    pub fn new(
        from_warehouse_id: Uuid,
        to_warehouse_id: Uuid,
        notes: Option<String>,
        requested_by: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_warehouse_id,
            to_warehouse_id,
            status: TransferStatus::Draft,
            items: Vec::new(),
            notes,
            cancellation_reason: None,
            requested_by,
            submitted_by: None,
            approved_by: None,
            shipped_by: None,
            received_by: None,
            cancelled_by: None,
            created_at: now,
            submitted_at: None,
            approved_at: None,
            shipped_at: None,
            received_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: now,
        }
    }

    pub fn item(&self, item_id: Uuid) -> Option<&StockTransferItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: Uuid) -> Option<&mut StockTransferItem> {
        self.items.iter_mut().find(|i| i.id == item_id)
    }

    /// Every shipped item has been received or written off as damaged
    pub fn all_items_settled(&self) -> bool {
        self.items
            .iter()
            .filter(|i| i.status != TransferItemStatus::Cancelled)
            .all(|i| i.is_settled())
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary::from_transfer(self)
    }
}

/// Transfer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Draft,
    PendingApproval,
    Approved,
    InTransit,
    PartiallyReceived,
    Completed,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Draft => "draft",
            TransferStatus::PendingApproval => "pending_approval",
            TransferStatus::Approved => "approved",
            TransferStatus::InTransit => "in_transit",
            TransferStatus::PartiallyReceived => "partially_received",
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    /// Legal edges of the transfer state machine. Cancellation is only
    /// possible before anything has left the source warehouse.
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Draft, PendingApproval)
                | (PendingApproval, Approved)
                | (Approved, InTransit)
                | (InTransit, PartiallyReceived)
                | (InTransit, Completed)
                | (PartiallyReceived, PartiallyReceived)
                | (PartiallyReceived, Completed)
                | (Draft, Cancelled)
                | (PendingApproval, Cancelled)
                | (Approved, Cancelled)
        )
    }

    /// Stock has left the source warehouse
    pub fn is_shipped(&self) -> bool {
        matches!(
            self,
            TransferStatus::InTransit | TransferStatus::PartiallyReceived | TransferStatus::Completed
        )
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TransferStatus::Draft),
            "pending_approval" => Ok(TransferStatus::PendingApproval),
            "approved" => Ok(TransferStatus::Approved),
            "in_transit" => Ok(TransferStatus::InTransit),
            "partially_received" => Ok(TransferStatus::PartiallyReceived),
            "completed" => Ok(TransferStatus::Completed),
            "cancelled" => Ok(TransferStatus::Cancelled),
            _ => Err("Unknown transfer status"),
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One product line on a transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockTransferItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub unit_id: Uuid,
    pub lot_number: Option<String>,
    pub requested_quantity: Decimal,
    pub shipped_quantity: Decimal,
    pub received_quantity: Decimal,
    pub damaged_quantity: Decimal,
    /// `received - shipped`, recorded for reconciliation only
    pub variance_quantity: Decimal,
    /// Source average cost at the time of shipment
    pub unit_cost: Option<Decimal>,
    pub status: TransferItemStatus,
    pub reservation_id: Option<Uuid>,
    pub notes: Option<String>,
}

impl StockTransferItem {
    pub fn new(
        product_id: Uuid,
        unit_id: Uuid,
        lot_number: Option<String>,
        requested_quantity: Decimal,
        notes: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            unit_id,
            lot_number,
            requested_quantity,
            shipped_quantity: Decimal::ZERO,
            received_quantity: Decimal::ZERO,
            damaged_quantity: Decimal::ZERO,
            variance_quantity: Decimal::ZERO,
            unit_cost: None,
            status: TransferItemStatus::Pending,
            reservation_id: None,
            notes,
        }
    }

    pub fn position_key(&self, warehouse_id: Uuid) -> PositionKey {
        PositionKey {
            warehouse_id,
            product_id: self.product_id,
            unit_id: self.unit_id,
            lot_number: self.lot_number.clone(),
        }
    }

    /// Received plus damaged covers what was shipped
    pub fn is_settled(&self) -> bool {
        self.shipped_quantity > Decimal::ZERO
            && self.received_quantity + self.damaged_quantity >= self.shipped_quantity
    }

    /// Record a receipt against this item and refresh its variance and status
    pub fn record_receipt(&mut self, received: Decimal, damaged: Decimal) {
        self.received_quantity += received;
        self.damaged_quantity += damaged;
        self.variance_quantity = self.received_quantity - self.shipped_quantity;
        self.status = if self.is_settled() {
            TransferItemStatus::Received
        } else {
            TransferItemStatus::PartiallyReceived
        };
    }
}

/// Per-item progress, also used as the idempotency marker for each step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferItemStatus {
    Pending,
    Reserved,
    Shipped,
    PartiallyReceived,
    Received,
    Cancelled,
}

impl TransferItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferItemStatus::Pending => "pending",
            TransferItemStatus::Reserved => "reserved",
            TransferItemStatus::Shipped => "shipped",
            TransferItemStatus::PartiallyReceived => "partially_received",
            TransferItemStatus::Received => "received",
            TransferItemStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TransferItemStatus {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferItemStatus::Pending),
            "reserved" => Ok(TransferItemStatus::Reserved),
            "shipped" => Ok(TransferItemStatus::Shipped),
            "partially_received" => Ok(TransferItemStatus::PartiallyReceived),
            "received" => Ok(TransferItemStatus::Received),
            "cancelled" => Ok(TransferItemStatus::Cancelled),
            _ => Err("Unknown transfer item status"),
        }
    }
}

/// Aggregate totals derived from a transfer's items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub transfer_id: Uuid,
    pub status: TransferStatus,
    pub item_count: usize,
    pub total_requested: Decimal,
    pub total_shipped: Decimal,
    pub total_received: Decimal,
    pub total_damaged: Decimal,
    pub total_variance: Decimal,
    pub completion_percent: Decimal,
}

impl TransferSummary {
    pub fn from_transfer(transfer: &StockTransfer) -> Self {
        let sum = |f: fn(&StockTransferItem) -> Decimal| -> Decimal {
            transfer.items.iter().map(f).sum()
        };
        let total_shipped = sum(|i| i.shipped_quantity);
        let total_received = sum(|i| i.received_quantity);
        let total_damaged = sum(|i| i.damaged_quantity);

        Self {
            transfer_id: transfer.id,
            status: transfer.status,
            item_count: transfer.items.len(),
            total_requested: sum(|i| i.requested_quantity),
            total_shipped,
            total_received,
            total_damaged,
            total_variance: sum(|i| i.variance_quantity),
            completion_percent: completion_percent(total_shipped, total_received + total_damaged),
        }
    }
}

/// Share of shipped quantity accounted for at the destination, capped at 100
pub fn completion_percent(shipped: Decimal, accounted: Decimal) -> Decimal {
    if shipped <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let hundred = Decimal::from(100);
    ((accounted / shipped) * hundred).min(hundred).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shipped_item(shipped: i64) -> StockTransferItem {
        let mut item = StockTransferItem::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            Decimal::from(shipped),
            None,
        );
        item.shipped_quantity = Decimal::from(shipped);
        item.status = TransferItemStatus::Shipped;
        item
    }

    #[test]
    fn test_forward_transitions() {
        use TransferStatus::*;
        assert!(Draft.can_transition_to(PendingApproval));
        assert!(PendingApproval.can_transition_to(Approved));
        assert!(Approved.can_transition_to(InTransit));
        assert!(InTransit.can_transition_to(Completed));
        assert!(PartiallyReceived.can_transition_to(Completed));
    }

    #[test]
    fn test_invalid_transitions() {
        use TransferStatus::*;
        assert!(!Draft.can_transition_to(InTransit));
        assert!(!Draft.can_transition_to(Approved));
        assert!(!InTransit.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Draft));
    }

    #[test]
    fn test_item_receipt_records_variance() {
        let mut item = shipped_item(20);
        item.record_receipt(Decimal::from(18), Decimal::from(2));

        assert_eq!(item.variance_quantity, Decimal::from(-2));
        assert_eq!(item.status, TransferItemStatus::Received);
        assert!(item.is_settled());
    }

    #[test]
    fn test_partial_item_receipt() {
        let mut item = shipped_item(20);
        item.record_receipt(Decimal::from(5), Decimal::ZERO);

        assert_eq!(item.status, TransferItemStatus::PartiallyReceived);
        assert!(!item.is_settled());
    }

    #[test]
    fn test_summary_completion_percent() {
        let mut transfer = StockTransfer::new(Uuid::new_v4(), Uuid::new_v4(), None, Uuid::new_v4(), Utc::now());
        let mut a = shipped_item(10);
        a.record_receipt(Decimal::from(10), Decimal::ZERO);
        let b = shipped_item(30);
        transfer.items = vec![a, b];

        let summary = transfer.summary();
        assert_eq!(summary.total_shipped, Decimal::from(40));
        assert_eq!(summary.completion_percent, Decimal::from(25));
        assert!(!transfer.all_items_settled());
    }

    #[test]
    fn test_completion_percent_before_shipment() {
        assert_eq!(completion_percent(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
        assert_eq!(
            completion_percent(Decimal::from(10), Decimal::from(12)),
            Decimal::from(100)
        );
    }
}
