//! `POST /api/v1/oracle/marketing-fee/deposit` — tops up the gap between
//! accrued marketing fee and what the tx outbox has already sent or has
//! in flight (C9). Grounded on `backend/src/api/v1/oracle_billing.py`
//! and spec.md §8 scenario S6.

use crate::auth::require_oracle_auth;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use synod_core::audit;
use synod_core::marketing::{plan_marketing_deposit, MarketingDepositOutcome};
use synod_core::models::ActorType;
use synod_core::store::{AuditStore, NonceStore};

pub async fn deposit_marketing_fee(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let path = "/api/v1/oracle/marketing-fee/deposit";
    let ctx = match require_oracle_auth(&state, &headers, "POST", path, &body).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let Some(treasury) = state.config.marketing_treasury_address.as_deref().and_then(|addr| addr.parse().ok()) else {
        return ApiError(synod_core::Error::validation("marketing_treasury_address_not_configured")).into_response();
    };

    let now = Utc::now();
    let outcome = match plan_marketing_deposit(&*state.store, &*state.store, &*state.store, &*state.store, &*state.chain, state.config.tx_outbox_enabled, treasury, now).await {
        Ok(outcome) => outcome,
        Err(err) => return ApiError(err).into_response(),
    };

    let (idempotency_key, body_json) = match &outcome {
        MarketingDepositOutcome::AlreadyFunded => (None, json!({ "success": true, "status": "already_funded" })),
        MarketingDepositOutcome::Enqueued { task_id, idempotency_key, created } => {
            (Some(idempotency_key.clone()), json!({ "success": true, "task_id": task_id, "idempotency_key": idempotency_key, "created": created }))
        }
        MarketingDepositOutcome::ExecutedSynchronously { idempotency_key, tx_hash, already_done } => {
            (Some(idempotency_key.clone()), json!({ "success": true, "status": "executed", "tx_hash": tx_hash, "already_done": already_done }))
        }
    };

    let entry = audit::new_entry(ActorType::Oracle, None, "POST", path, idempotency_key, ctx.body_hash, ctx.signature_status, Some(ctx.request_id), now);
    let _ = state.store.append(entry).await;

    Json(body_json).into_response()
}
