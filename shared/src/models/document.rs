//! Collaborator documents that drive ledger postings
//!
//! Receipts and sales are owned by the purchasing and sales modules; the
//! ledger only reads their finalized quantities.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PositionKey;

/// A purchase receipt as handed over by purchasing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub id: Uuid,
    pub warehouse_id: Uuid,
    #[serde(default)]
    pub zone_id: Option<Uuid>,
    pub status: ReceiptStatus,
    pub items: Vec<PurchaseReceiptItem>,
}

/// Receipt document status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Draft,
    Pending,
    Approved,
    Completed,
    Cancelled,
}

impl ReceiptStatus {
    /// Only finalized receipts may move stock
    pub fn is_finalized(&self) -> bool {
        matches!(self, ReceiptStatus::Approved | ReceiptStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Draft => "draft",
            ReceiptStatus::Pending => "pending",
            ReceiptStatus::Approved => "approved",
            ReceiptStatus::Completed => "completed",
            ReceiptStatus::Cancelled => "cancelled",
        }
    }
}

/// One received line: what arrived, what passed inspection, what was sent back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseReceiptItem {
    pub product_id: Uuid,
    pub unit_id: Uuid,
    #[serde(default)]
    pub lot_number: Option<String>,
    pub quantity_received: Decimal,
    pub quantity_accepted: Decimal,
    pub quantity_rejected: Decimal,
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
}

impl PurchaseReceiptItem {
    pub fn position_key(&self, warehouse_id: Uuid) -> PositionKey {
        PositionKey {
            warehouse_id,
            product_id: self.product_id,
            unit_id: self.unit_id,
            lot_number: self.lot_number.clone(),
        }
    }
}

/// A completed sale as handed over by sales
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: Uuid,
    pub warehouse_id: Uuid,
    pub items: Vec<SaleItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleItem {
    pub product_id: Uuid,
    pub unit_id: Uuid,
    #[serde(default)]
    pub lot_number: Option<String>,
    pub quantity: Decimal,
}

impl SaleItem {
    pub fn position_key(&self, warehouse_id: Uuid) -> PositionKey {
        PositionKey {
            warehouse_id,
            product_id: self.product_id,
            unit_id: self.unit_id,
            lot_number: self.lot_number.clone(),
        }
    }
}

/// Goods coming back against an earlier sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleReturn {
    pub id: Uuid,
    pub sale_id: Uuid,
    pub warehouse_id: Uuid,
    pub items: Vec<SaleItem>,
}

/// Item quantities confirmed at shipment time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentLine {
    pub item_id: Uuid,
    pub shipped_quantity: Decimal,
}

/// Receiver's split of an item into good and damaged units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub item_id: Uuid,
    pub received_quantity: Decimal,
    #[serde(default)]
    pub damaged_quantity: Decimal,
}

/// Document state changes published by collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentEvent {
    PurchaseReceiptApproved {
        receipt: PurchaseReceipt,
        actor_id: Uuid,
    },
    SaleCompleted {
        sale: Sale,
        actor_id: Uuid,
    },
    TransferApproved {
        transfer_id: Uuid,
        actor_id: Uuid,
    },
    TransferShipped {
        transfer_id: Uuid,
        #[serde(default)]
        lines: Vec<ShipmentLine>,
        actor_id: Uuid,
    },
    TransferReceived {
        transfer_id: Uuid,
        lines: Vec<ReceiptLine>,
        actor_id: Uuid,
    },
}

impl DocumentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DocumentEvent::PurchaseReceiptApproved { .. } => "purchase_receipt.approved",
            DocumentEvent::SaleCompleted { .. } => "sale.completed",
            DocumentEvent::TransferApproved { .. } => "stock_transfer.approved",
            DocumentEvent::TransferShipped { .. } => "stock_transfer.shipped",
            DocumentEvent::TransferReceived { .. } => "stock_transfer.received",
        }
    }

    pub fn actor_id(&self) -> Uuid {
        match self {
            DocumentEvent::PurchaseReceiptApproved { actor_id, .. }
            | DocumentEvent::SaleCompleted { actor_id, .. }
            | DocumentEvent::TransferApproved { actor_id, .. }
            | DocumentEvent::TransferShipped { actor_id, .. }
            | DocumentEvent::TransferReceived { actor_id, .. } => *actor_id,
        }
    }
}
