//! `POST /api/v1/oracle/{tx-outbox,git-outbox}/claim-next` — the single
//! claim/execute/complete step each outbox worker runs, exposed over
//! HTTP so an external scheduler can drive the loop one tick at a time
//! instead of running an in-process worker. Grounded on
//! `api/v1/oracle_git_outbox.py::claim_next` and spec.md §8 scenario S5.

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
use synod_core::git_outbox::{self, GitWorkerOutcome};
use synod_core::models::ActorType;
use synod_core::store::AuditStore;
use synod_core::tx_outbox::{self, TxWorkerOutcome};

#[derive(Debug, Deserialize)]
pub struct ClaimNextRequest {
    pub worker_id: String,
}

pub async fn tx_outbox_claim_next(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let path = "/api/v1/oracle/tx-outbox/claim-next";
    let ctx = match require_oracle_auth(&state, &headers, "POST", path, &body).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    let request: ClaimNextRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return ApiError(synod_core::Error::validation(format!("body:{err}"))).into_response(),
    };

    let outcome = match tx_outbox::process_next(&*state.store, &*state.store, &*state.chain, &request.worker_id, state.config.tx_outbox_lock_ttl_seconds).await {
        Ok(outcome) => outcome,
        Err(err) => return ApiError(err).into_response(),
    };

    let body_json = match &outcome {
        TxWorkerOutcome::NoTasks => json!({ "success": true, "status": "no_tasks" }),
        TxWorkerOutcome::RaceLost => json!({ "success": false, "blocked_reason": "race_lost" }),
        TxWorkerOutcome::Succeeded { task_id, tx_hash } => json!({ "success": true, "status": "succeeded", "task_id": task_id, "tx_hash": tx_hash }),
        TxWorkerOutcome::Retrying { task_id, requeued_task_id, hint } => {
            json!({ "success": false, "status": "retrying", "task_id": task_id, "requeued_task_id": requeued_task_id, "error_hint": hint })
        }
        TxWorkerOutcome::Blocked { task_id, hint } => json!({ "success": false, "status": "blocked", "task_id": task_id, "error_hint": hint }),
    };

    let now = Utc::now();
    let entry = audit::new_entry(ActorType::Oracle, Some(request.worker_id), "POST", path, None, ctx.body_hash, ctx.signature_status, Some(ctx.request_id), now);
    let _ = state.store.append(entry).await;

    Json(body_json).into_response()
}

pub async fn git_outbox_claim_next(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let path = "/api/v1/oracle/git-outbox/claim-next";
    let ctx = match require_oracle_auth(&state, &headers, "POST", path, &body).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    let request: ClaimNextRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return ApiError(synod_core::Error::validation(format!("body:{err}"))).into_response(),
    };

    let outcome = match git_outbox::process_next(&*state.store, &*state.git, &request.worker_id, state.config.tx_outbox_lock_ttl_seconds).await {
        Ok(outcome) => outcome,
        Err(err) => return ApiError(err).into_response(),
    };

    let body_json = match &outcome {
        GitWorkerOutcome::NoTasks => json!({ "success": true, "status": "no_tasks" }),
        GitWorkerOutcome::RaceLost => json!({ "success": false, "blocked_reason": "race_lost" }),
        GitWorkerOutcome::Succeeded { task_id } => json!({ "success": true, "status": "succeeded", "task_id": task_id }),
        GitWorkerOutcome::Failed { task_id, hint } => json!({ "success": false, "status": "failed", "task_id": task_id, "error_hint": hint }),
    };

    let now = Utc::now();
    let entry = audit::new_entry(ActorType::Oracle, Some(request.worker_id), "POST", path, None, ctx.body_hash, ctx.signature_status, Some(ctx.request_id), now);
    let _ = state.store.append(entry).await;

    Json(body_json).into_response()
}
