//! HTTP handler for collaborator document events

use axum::{extract::State, Json};

use shared::DocumentEvent;

use crate::error::AppResult;
use crate::services::{retry_busy, EventDispatcher, EventOutcome};
use crate::AppState;

/// Apply the ledger effect of a document event. The acting user travels in
/// the event itself.
pub async fn handle_document_event(
    State(state): State<AppState>,
    Json(event): Json<DocumentEvent>,
) -> AppResult<Json<EventOutcome>> {
    let dispatcher = EventDispatcher::new(state.store.clone());
    let outcome = retry_busy(&state.retry_policy(), || {
        dispatcher.handle(event.clone())
    })
    .await?;
    Ok(Json(outcome))
}
