//! Combines the API routes from all domain modules into a unified router.

use axum::{routing::get, Json, Router};
use std::sync::Arc;

use crate::core::shared::state::AppState;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(crate::assessments::configure_assessments_routes())
        .merge(crate::assessments::workflow::configure_workflow_routes())
        .merge(crate::action_items::configure_action_items_routes())
        .merge(crate::agents::configure_agents_routes())
        .merge(crate::vendors::configure_vendors_routes())
        .merge(crate::form_layouts::configure_form_layouts_routes())
        .merge(crate::tickets::configure_tickets_routes())
        .merge(crate::messages::configure_messages_routes())
        .merge(crate::directory::configure_directory_routes())
        .route("/health", get(health))
}
