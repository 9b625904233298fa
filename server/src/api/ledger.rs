//! `POST /api/v1/oracle/{revenue-events,expense-events,project-capital-
//! events}` — the append-only ledger surface (C2). Grounded on
//! `backend/src/api/v1/oracle_ledger.py`.

use crate::auth::require_oracle_auth;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use synod_core::audit;
use synod_core::ids::{expense_event_id, project_capital_event_id, revenue_event_id};
use synod_core::models::{ActorType, ExpenseEvent, ProjectCapitalEvent, RevenueEvent};
use synod_core::store::LedgerStore;

#[derive(Debug, Deserialize)]
pub struct RevenueEventRequest {
    pub profit_month_id: String,
    pub project_id: Option<String>,
    pub amount_micro_usdc: i64,
    pub tx_hash: Option<String>,
    pub source: String,
    pub category: Option<String>,
    pub idempotency_key: String,
    pub evidence_url: Option<String>,
}

pub async fn create_revenue_event(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let path = "/api/v1/oracle/revenue-events";
    let ctx = match require_oracle_auth(&state, &headers, "POST", path, &body).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let request: RevenueEventRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return ApiError(synod_core::Error::validation(format!("body:{err}"))).into_response(),
    };

    let now = Utc::now();
    let event = RevenueEvent {
        event_id: revenue_event_id(),
        profit_month_id: request.profit_month_id,
        project_id: request.project_id,
        amount_micro_usdc: request.amount_micro_usdc,
        tx_hash: request.tx_hash,
        source: request.source,
        category: request.category,
        idempotency_key: request.idempotency_key.clone(),
        evidence_url: request.evidence_url,
        created_at: now,
    };
    let entry = audit::new_entry(ActorType::Oracle, None, "POST", path, Some(request.idempotency_key), ctx.body_hash, ctx.signature_status, Some(ctx.request_id), now);

    match state.store.append_revenue_event(event, entry).await {
        Ok(appended) => Json(json!({ "success": true, "event_id": appended.row.event_id, "created": appended.created })).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExpenseEventRequest {
    pub profit_month_id: String,
    pub project_id: Option<String>,
    pub amount_micro_usdc: i64,
    pub tx_hash: Option<String>,
    pub source: String,
    pub category: Option<String>,
    pub idempotency_key: String,
    pub evidence_url: Option<String>,
}

pub async fn create_expense_event(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let path = "/api/v1/oracle/expense-events";
    let ctx = match require_oracle_auth(&state, &headers, "POST", path, &body).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let request: ExpenseEventRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return ApiError(synod_core::Error::validation(format!("body:{err}"))).into_response(),
    };

    let now = Utc::now();
    let event = ExpenseEvent {
        event_id: expense_event_id(),
        profit_month_id: request.profit_month_id,
        project_id: request.project_id,
        amount_micro_usdc: request.amount_micro_usdc,
        tx_hash: request.tx_hash,
        source: request.source,
        category: request.category,
        idempotency_key: request.idempotency_key.clone(),
        evidence_url: request.evidence_url,
        created_at: now,
    };
    let entry = audit::new_entry(ActorType::Oracle, None, "POST", path, Some(request.idempotency_key), ctx.body_hash, ctx.signature_status, Some(ctx.request_id), now);

    match state.store.append_expense_event(event, entry).await {
        Ok(appended) => Json(json!({ "success": true, "event_id": appended.row.event_id, "created": appended.created })).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ProjectCapitalEventRequest {
    pub project_id: String,
    pub profit_month_id: Option<String>,
    pub delta_micro_usdc: i64,
    pub source: String,
    pub idempotency_key: String,
    pub evidence_tx_hash: Option<String>,
}

pub async fn create_project_capital_event(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let path = "/api/v1/oracle/project-capital-events";
    let ctx = match require_oracle_auth(&state, &headers, "POST", path, &body).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let request: ProjectCapitalEventRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return ApiError(synod_core::Error::validation(format!("body:{err}"))).into_response(),
    };

    let now = Utc::now();
    let event = ProjectCapitalEvent {
        event_id: project_capital_event_id(),
        project_id: request.project_id,
        profit_month_id: request.profit_month_id,
        delta_micro_usdc: request.delta_micro_usdc,
        source: request.source,
        idempotency_key: request.idempotency_key.clone(),
        evidence_tx_hash: request.evidence_tx_hash,
        created_at: now,
    };
    let entry = audit::new_entry(ActorType::Oracle, None, "POST", path, Some(request.idempotency_key), ctx.body_hash, ctx.signature_status, Some(ctx.request_id), now);

    match state.store.append_project_capital_event(event, entry).await {
        Ok(appended) => Json(json!({ "success": true, "event_id": appended.row.event_id, "created": appended.created })).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}
