//! Document event dispatch
//!
//! Collaborators publish document state changes; each one is routed to the
//! workflow that owns its ledger effect.

use std::sync::Arc;

use serde::Serialize;

use shared::{DocumentEvent, StockLedgerEntry, StockTransfer};

use super::{ConsumptionWorkflow, ReceivingWorkflow, TransferWorkflow};
use crate::error::AppResult;
use crate::store::LedgerStore;

/// Result of handling one event
#[derive(Debug, Clone, Serialize)]
pub struct EventOutcome {
    pub event_type: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<StockLedgerEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<StockTransfer>,
}

/// Routes document events to the ledger workflows
#[derive(Clone)]
pub struct EventDispatcher {
    receiving: ReceivingWorkflow,
    consumption: ConsumptionWorkflow,
    transfers: TransferWorkflow,
}

impl EventDispatcher {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            receiving: ReceivingWorkflow::new(store.clone()),
            consumption: ConsumptionWorkflow::new(store.clone()),
            transfers: TransferWorkflow::new(store),
        }
    }

    #[tracing::instrument(skip(self, event), fields(event_type = event.event_type()))]
    pub async fn handle(&self, event: DocumentEvent) -> AppResult<EventOutcome> {
        let event_type = event.event_type();
        let actor_id = event.actor_id();

        let outcome = match event {
            DocumentEvent::PurchaseReceiptApproved { receipt, .. } => EventOutcome {
                event_type,
                entries: self.receiving.apply_receipt(actor_id, &receipt).await?,
                transfer: None,
            },
            DocumentEvent::SaleCompleted { sale, .. } => EventOutcome {
                event_type,
                entries: self.consumption.apply_sale(actor_id, &sale).await?,
                transfer: None,
            },
            DocumentEvent::TransferApproved { transfer_id, .. } => EventOutcome {
                event_type,
                entries: Vec::new(),
                transfer: Some(self.transfers.approve(actor_id, transfer_id).await?),
            },
            DocumentEvent::TransferShipped {
                transfer_id, lines, ..
            } => EventOutcome {
                event_type,
                entries: Vec::new(),
                transfer: Some(self.transfers.ship(actor_id, transfer_id, lines).await?),
            },
            DocumentEvent::TransferReceived {
                transfer_id, lines, ..
            } => EventOutcome {
                event_type,
                entries: Vec::new(),
                transfer: Some(self.transfers.receive(actor_id, transfer_id, lines).await?),
            },
        };

        tracing::debug!("Handled document event");
        Ok(outcome)
    }
}
