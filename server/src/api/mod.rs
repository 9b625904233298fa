//! Oracle-authenticated HTTP surface, one module per resource group,
//! following `apps/twzrd-aggregator-rs/src/api/mod.rs`'s layout.

pub mod bounty;
pub mod ledger;
pub mod marketing;
pub mod outbox;
pub mod settlement;

use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "success": true, "status": "ok", "version": state.config.app_version, "env": state.config.env }))
}

pub async fn not_implemented() -> impl IntoResponse {
    (axum::http::StatusCode::NOT_IMPLEMENTED, Json(json!({ "success": false, "detail": "not_implemented" })))
}
