//! `POST /api/v1/oracle/settlement/{month}`, `/reconciliation/{month}`,
//! `/distributions/{month}/{create,execute}` — the settlement engine
//! (C5) and reconciler (C4) surface. Grounded on
//! `backend/src/api/v1/oracle_settlement.py` and
//! `backend/src/api/v1/oracle_distributions.py`.

use crate::auth::require_oracle_auth;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use synod_core::audit;
use synod_core::models::{ActorType, ReconciliationScope};
use synod_core::money::ProfitMonth;
use synod_core::reconciler::reconcile_platform;
use synod_core::settlement_engine::{compute_settlement, create_distribution, execute_distribution, CreateDistributionOutcome, ExecuteDistributionOutcome, ExecuteDistributionRequest};
use synod_core::store::{AuditStore, LedgerStore, NonceStore, ReconciliationStore, SettlementStore};

fn invalid_month(month: &str) -> Response {
    ApiError(synod_core::Error::validation(format!("profit_month_id:{month}"))).into_response()
}

pub async fn compute_settlement_handler(State(state): State<AppState>, Path(month): Path<String>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let path = format!("/api/v1/oracle/settlement/{month}");
    let ctx = match require_oracle_auth(&state, &headers, "POST", &path, &body).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    let Ok(parsed_month) = ProfitMonth::parse(&month) else { return invalid_month(&month) };

    let now = Utc::now();
    let settlement = match compute_settlement(&*state.store, &*state.store, &parsed_month, now).await {
        Ok(settlement) => settlement,
        Err(err) => return ApiError(err).into_response(),
    };

    let entry = audit::new_entry(ActorType::Oracle, None, "POST", &path, None, ctx.body_hash, ctx.signature_status, Some(ctx.request_id), now);
    let _ = state.store.append(entry).await;

    Json(json!({ "success": true, "settlement": settlement })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ReconciliationQuery {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

pub async fn reconciliation_handler(State(state): State<AppState>, Path(month): Path<String>, Query(query): Query<ReconciliationQuery>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let path = format!("/api/v1/oracle/reconciliation/{month}");
    let ctx = match require_oracle_auth(&state, &headers, "POST", &path, &body).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    let Ok(parsed_month) = ProfitMonth::parse(&month) else { return invalid_month(&month) };

    let now = Utc::now();
    let scope = query.scope.as_deref().unwrap_or("platform");

    let report = match scope {
        "platform" => {
            let distributor = state.config.dividend_distributor_contract_address.clone();
            let token = match state.config.usdc_address.as_deref().and_then(|addr| addr.parse().ok()) {
                Some(token) => token,
                None => return invalid_month("usdc_address_not_configured"),
            };
            let settlement = match state.store.latest_settlement(parsed_month.as_str()).await {
                Ok(settlement) => settlement,
                Err(err) => return ApiError(err).into_response(),
            };
            let profit_sum = settlement.map(|s| s.profit_sum_micro_usdc).unwrap_or(0);
            reconcile_platform(&*state.store, Some(&*state.chain), token, parsed_month.as_str(), distributor.as_deref(), profit_sum, now).await
        }
        "project_capital" | "project_revenue" => {
            let Some(project_id) = query.project_id.clone() else { return invalid_month("project_id_required") };
            let project = match state.store.get_project(&project_id).await {
                Ok(Some(project)) => project,
                Ok(None) => return ApiError(synod_core::Error::NotFound(format!("project:{project_id}"))).into_response(),
                Err(err) => return ApiError(err).into_response(),
            };
            let token = match state.config.usdc_address.as_deref().and_then(|addr| addr.parse().ok()) {
                Some(token) => token,
                None => return invalid_month("usdc_address_not_configured"),
            };
            if scope == "project_capital" {
                let balance = match state.store.project_capital_balance(&project_id).await {
                    Ok(balance) => balance,
                    Err(err) => return ApiError(err).into_response(),
                };
                synod_core::reconciler::reconcile_project_capital(&*state.store, Some(&*state.chain), token, &project_id, project.treasury_address.as_deref(), balance, now).await
            } else {
                let balance = match state.store.project_revenue_balance(&project_id).await {
                    Ok(balance) => balance,
                    Err(err) => return ApiError(err).into_response(),
                };
                synod_core::reconciler::reconcile_project_revenue(&*state.store, Some(&*state.chain), token, &project_id, project.revenue_address.as_deref(), balance, now).await
            }
        }
        other => return invalid_month(&format!("unknown_scope:{other}")),
    };

    let report = match report {
        Ok(report) => report,
        Err(err) => return ApiError(err).into_response(),
    };

    let entry = audit::new_entry(ActorType::Oracle, None, "POST", &path, None, ctx.body_hash, ctx.signature_status, Some(ctx.request_id), now);
    let _ = state.store.append(entry).await;

    Json(json!({ "success": report.ready, "report": report, "blocked_reason": report.blocked_reason })).into_response()
}

pub async fn create_distribution_handler(State(state): State<AppState>, Path(month): Path<String>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let path = format!("/api/v1/oracle/distributions/{month}/create");
    let ctx = match require_oracle_auth(&state, &headers, "POST", &path, &body).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    let Ok(parsed_month) = ProfitMonth::parse(&month) else { return invalid_month(&month) };

    let registry = match state.config.dividend_distributor_contract_address.as_deref().and_then(|addr| addr.parse().ok()) {
        Some(registry) => registry,
        None => return invalid_month("dividend_distributor_contract_address_not_configured"),
    };

    let now = Utc::now();
    let settlement = match state.store.latest_settlement(parsed_month.as_str()).await {
        Ok(settlement) => settlement,
        Err(err) => return ApiError(err).into_response(),
    };
    let profit_sum = settlement.map(|s| s.profit_sum_micro_usdc).unwrap_or(0);

    let outcome = match create_distribution(&*state.store, &*state.store, &*state.store, &*state.store, &*state.chain, state.config.tx_outbox_enabled, registry, &parsed_month, profit_sum, now).await {
        Ok(outcome) => outcome,
        Err(err) => return ApiError(err).into_response(),
    };

    let (idempotency_key, body_json, error_hint) = match &outcome {
        CreateDistributionOutcome::Blocked { blocked_reason } => (None, json!({ "success": false, "blocked_reason": blocked_reason }), Some(audit::gate_block_hint(blocked_reason))),
        CreateDistributionOutcome::AlreadyExists => (None, json!({ "success": true, "status": "already_exists" }), None),
        CreateDistributionOutcome::Enqueued { task_id, idempotency_key, created } => {
            (Some(idempotency_key.clone()), json!({ "success": true, "task_id": task_id, "idempotency_key": idempotency_key, "created": created }), None)
        }
        CreateDistributionOutcome::ExecutedSynchronously { idempotency_key, tx_hash, already_done } => {
            (Some(idempotency_key.clone()), json!({ "success": true, "status": "executed", "tx_hash": tx_hash, "already_done": already_done }), None)
        }
    };

    let mut entry = audit::new_entry(ActorType::Oracle, None, "POST", &path, idempotency_key, ctx.body_hash, ctx.signature_status, Some(ctx.request_id), now);
    if let Some(hint) = error_hint {
        entry = synod_core::audit::with_error_hint(entry, &hint);
    }
    let _ = state.store.append(entry).await;

    Json(body_json).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ExecuteDistributionRequestBody {
    pub distribution_creation_id: String,
    pub stakers: Vec<String>,
    pub staker_shares: Vec<i64>,
    pub authors: Vec<String>,
    pub author_shares: Vec<i64>,
}

pub async fn execute_distribution_handler(State(state): State<AppState>, Path(month): Path<String>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let path = format!("/api/v1/oracle/distributions/{month}/execute");
    let ctx = match require_oracle_auth(&state, &headers, "POST", &path, &body).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };
    let Ok(parsed_month) = ProfitMonth::parse(&month) else { return invalid_month(&month) };

    let request: ExecuteDistributionRequestBody = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return ApiError(synod_core::Error::validation(format!("body:{err}"))).into_response(),
    };

    let registry = match state.config.dividend_distributor_contract_address.as_deref().and_then(|addr| addr.parse().ok()) {
        Some(registry) => registry,
        None => return invalid_month("dividend_distributor_contract_address_not_configured"),
    };

    let parse_addresses = |raw: &[String]| -> Result<Vec<alloy_primitives::Address>, Response> {
        raw.iter().map(|addr| addr.parse().map_err(|_| invalid_month(&format!("invalid_address:{addr}")))).collect()
    };
    let stakers = match parse_addresses(&request.stakers) {
        Ok(stakers) => stakers,
        Err(response) => return response,
    };
    let authors = match parse_addresses(&request.authors) {
        Ok(authors) => authors,
        Err(response) => return response,
    };

    let now = Utc::now();
    let settlement = match state.store.latest_settlement(parsed_month.as_str()).await {
        Ok(settlement) => settlement,
        Err(err) => return ApiError(err).into_response(),
    };
    let profit_sum = settlement.map(|s| s.profit_sum_micro_usdc).unwrap_or(0);

    let exec_request = ExecuteDistributionRequest {
        month: parsed_month,
        registry,
        distribution_creation_id: request.distribution_creation_id,
        profit_sum_micro_usdc: profit_sum,
        stakers,
        staker_shares: request.staker_shares,
        authors,
        author_shares: request.author_shares,
    };

    let outcome = match execute_distribution(&*state.store, &*state.store, &*state.store, &*state.chain, state.config.tx_outbox_enabled, exec_request, now).await {
        Ok(outcome) => outcome,
        Err(err) => return ApiError(err).into_response(),
    };

    let (idempotency_key, body_json, error_hint) = match &outcome {
        ExecuteDistributionOutcome::Blocked { blocked_reason } => (None, json!({ "success": false, "blocked_reason": blocked_reason }), Some(audit::gate_block_hint(blocked_reason))),
        ExecuteDistributionOutcome::AlreadyDistributed => (None, json!({ "success": true, "status": "already_distributed" }), None),
        ExecuteDistributionOutcome::Enqueued { task_id, idempotency_key, created } => {
            (Some(idempotency_key.clone()), json!({ "success": true, "task_id": task_id, "idempotency_key": idempotency_key, "created": created }), None)
        }
        ExecuteDistributionOutcome::ExecutedSynchronously { idempotency_key, tx_hash, already_done } => {
            (Some(idempotency_key.clone()), json!({ "success": true, "status": "executed", "tx_hash": tx_hash, "already_done": already_done }), None)
        }
    };

    let mut entry = audit::new_entry(ActorType::Oracle, None, "POST", &path, idempotency_key, ctx.body_hash, ctx.signature_status, Some(ctx.request_id), now);
    if let Some(hint) = error_hint {
        entry = synod_core::audit::with_error_hint(entry, &hint);
    }
    let _ = state.store.append(entry).await;

    Json(body_json).into_response()
}
