//! Purchase receiving workflow

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use shared::{
    validate_receipt_item, validate_unit_cost, LedgerReference, MovementType, PurchaseReceipt,
    StockLedgerEntry,
};

use super::ledger::{post_entry, LedgerEntryDraft};
use crate::error::{AppError, AppResult};
use crate::store::LedgerStore;

/// Receiving workflow service
#[derive(Clone)]
pub struct ReceivingWorkflow {
    store: Arc<dyn LedgerStore>,
}

impl ReceivingWorkflow {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Post the accepted quantity of every receipt line as an `in` entry.
    ///
    /// A receipt is applied at most once; the posting marker is claimed in
    /// the same transaction as the entries.
    #[tracing::instrument(skip(self, receipt), fields(receipt_id = %receipt.id))]
    pub async fn apply_receipt(
        &self,
        actor_id: Uuid,
        receipt: &PurchaseReceipt,
    ) -> AppResult<Vec<StockLedgerEntry>> {
        if !receipt.status.is_finalized() {
            return Err(AppError::InvalidTransition(format!(
                "receipt {} is {} and cannot move stock",
                receipt.id,
                receipt.status.as_str()
            )));
        }
        for (index, item) in receipt.items.iter().enumerate() {
            validate_receipt_item(item)
                .map_err(|msg| AppError::QuantityMismatch(format!("line {}: {}", index + 1, msg)))?;
            validate_unit_cost(item.unit_cost)
                .map_err(|msg| AppError::validation("unit_cost", msg))?;
        }

        let reference = LedgerReference::purchase_receipt(receipt.id);
        let mut tx = self.store.begin().await?;
        if !tx.claim_posting(reference, actor_id).await? {
            return Err(AppError::DuplicatePosting(format!(
                "receipt {} has already updated stock",
                receipt.id
            )));
        }

        let mut entries = Vec::with_capacity(receipt.items.len());
        for item in &receipt.items {
            // Rejected units never enter stock
            if item.quantity_accepted <= Decimal::ZERO {
                continue;
            }
            let draft = LedgerEntryDraft::new(
                item.position_key(receipt.warehouse_id),
                MovementType::In,
                item.quantity_accepted,
                reference,
                actor_id,
            )
            .with_unit_cost(item.unit_cost)
            .with_zone(receipt.zone_id);
            entries.push(post_entry(&mut *tx, draft, Decimal::ZERO).await?);
        }
        tx.commit().await?;

        tracing::info!(entries = entries.len(), "Applied purchase receipt");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use shared::{PurchaseReceiptItem, ReceiptStatus};

    fn receipt(status: ReceiptStatus, received: i64, accepted: i64, rejected: i64) -> PurchaseReceipt {
        PurchaseReceipt {
            id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
            zone_id: None,
            status,
            items: vec![PurchaseReceiptItem {
                product_id: Uuid::new_v4(),
                unit_id: Uuid::new_v4(),
                lot_number: Some("LOT-1".into()),
                quantity_received: Decimal::from(received),
                quantity_accepted: Decimal::from(accepted),
                quantity_rejected: Decimal::from(rejected),
                unit_cost: Some(Decimal::from(3)),
            }],
        }
    }

    #[tokio::test]
    async fn test_posts_accepted_not_received() {
        let workflow = ReceivingWorkflow::new(Arc::new(MemoryStore::new()));
        let entries = workflow
            .apply_receipt(Uuid::new_v4(), &receipt(ReceiptStatus::Approved, 10, 8, 2))
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].quantity, Decimal::from(8));
        assert_eq!(entries[0].key.lot_number.as_deref(), Some("LOT-1"));
    }

    #[tokio::test]
    async fn test_unbalanced_item_is_quantity_mismatch() {
        let workflow = ReceivingWorkflow::new(Arc::new(MemoryStore::new()));
        let err = workflow
            .apply_receipt(Uuid::new_v4(), &receipt(ReceiptStatus::Approved, 10, 8, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuantityMismatch(_)));
    }

    #[tokio::test]
    async fn test_draft_receipt_is_rejected() {
        let workflow = ReceivingWorkflow::new(Arc::new(MemoryStore::new()));
        let err = workflow
            .apply_receipt(Uuid::new_v4(), &receipt(ReceiptStatus::Pending, 10, 10, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }
}
