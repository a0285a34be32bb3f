//! Route definitions for the stock ledger API

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Positions, movements and ledger history
        .nest("/stock", stock_routes())
        // Holds against available stock
        .nest("/reservations", reservation_routes())
        // Inter-warehouse transfers
        .nest("/transfers", transfer_routes())
        // Collaborator documents
        .route("/receipts/apply", post(handlers::apply_receipt))
        .nest("/sales", sales_routes())
        .route("/events", post(handlers::handle_document_event))
}

/// Stock position and ledger routes
fn stock_routes() -> Router<AppState> {
    Router::new()
        .route("/positions", get(handlers::list_positions))
        .route("/positions/lookup", get(handlers::lookup_position))
        .route("/positions/levels", put(handlers::set_stock_levels))
        .route("/entries", get(handlers::list_entries))
        .route("/movements", post(handlers::post_movement))
        .route("/adjustments", post(handlers::adjust_stock))
        .route("/low-stock", get(handlers::list_low_stock))
        .route("/valuation/:warehouse_id", get(handlers::get_valuation))
        .route("/reconcile", get(handlers::reconcile_positions))
}

/// Reservation routes
fn reservation_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create_reservation))
        .route("/orphans", get(handlers::list_orphan_reservations))
        .route("/:reservation_id", get(handlers::get_reservation))
        .route(
            "/:reservation_id/release",
            post(handlers::release_reservation),
        )
        .route(
            "/:reservation_id/consume",
            post(handlers::consume_reservation),
        )
}

/// Transfer workflow routes
fn transfer_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_transfers).post(handlers::create_transfer),
        )
        .route("/:transfer_id", get(handlers::get_transfer))
        .route("/:transfer_id/summary", get(handlers::get_transfer_summary))
        .route("/:transfer_id/items", post(handlers::add_transfer_item))
        .route(
            "/:transfer_id/items/:item_id",
            delete(handlers::remove_transfer_item),
        )
        .route("/:transfer_id/submit", post(handlers::submit_transfer))
        .route("/:transfer_id/approve", post(handlers::approve_transfer))
        .route("/:transfer_id/ship", post(handlers::ship_transfer))
        .route("/:transfer_id/receive", post(handlers::receive_transfer))
        .route("/:transfer_id/cancel", post(handlers::cancel_transfer))
}

/// Sales consumption routes
fn sales_routes() -> Router<AppState> {
    Router::new()
        .route("/apply", post(handlers::apply_sale))
        .route("/hold", post(handlers::hold_sale))
        .route("/fulfil", post(handlers::fulfil_sale_hold))
        .route("/:sale_id/returns", post(handlers::apply_sale_return))
}
