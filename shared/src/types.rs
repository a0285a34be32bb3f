//! Common types used across the ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{LedgerReference, MovementType};

/// Pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 100,
        }
    }
}

impl Pagination {
    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.per_page as usize
    }

    pub fn limit(&self) -> usize {
        self.per_page as usize
    }
}

/// Filter for stock position listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionFilter {
    pub warehouse_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
}

impl PositionFilter {
    pub fn matches(&self, key: &crate::models::PositionKey) -> bool {
        self.warehouse_id.map_or(true, |w| key.warehouse_id == w)
            && self.product_id.map_or(true, |p| key.product_id == p)
    }
}

/// Filter for movement history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryFilter {
    pub warehouse_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub unit_id: Option<Uuid>,
    /// `None` matches any lot; `Some(None)` matches only entries without a lot
    #[serde(skip)]
    pub lot_number: Option<Option<String>>,
    pub movement_type: Option<MovementType>,
    pub reference: Option<LedgerReference>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl EntryFilter {
    pub fn for_reference(reference: LedgerReference) -> Self {
        Self {
            reference: Some(reference),
            ..Default::default()
        }
    }

    pub fn for_position(key: &crate::models::PositionKey) -> Self {
        Self {
            warehouse_id: Some(key.warehouse_id),
            product_id: Some(key.product_id),
            unit_id: Some(key.unit_id),
            lot_number: Some(key.lot_number.clone()),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &crate::models::StockLedgerEntry) -> bool {
        self.warehouse_id.map_or(true, |w| entry.key.warehouse_id == w)
            && self.product_id.map_or(true, |p| entry.key.product_id == p)
            && self.unit_id.map_or(true, |u| entry.key.unit_id == u)
            && self
                .lot_number
                .as_ref()
                .map_or(true, |lot| &entry.key.lot_number == lot)
            && self.movement_type.map_or(true, |m| entry.movement_type == m)
            && self.reference.map_or(true, |r| entry.reference == r)
            && self.from.map_or(true, |from| entry.created_at >= from)
            && self.to.map_or(true, |to| entry.created_at <= to)
    }
}
