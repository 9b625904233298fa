//! `POST /api/v1/oracle/bounties/{bounty_id}/mark-paid` — the only
//! bounty lifecycle transition implemented in this service, because it
//! is the one that must pass through the fail-closed spend-policy gate
//! (C6) and append a ledger row. Claim/submit/eligibility transitions
//! are an external collaborator's concern. Grounded on
//! `backend/src/api/v1/bounties.py::mark_paid`.

use crate::auth::require_oracle_auth;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use synod_core::audit;
use synod_core::ids::expense_event_id;
use synod_core::models::{ActorType, Bounty, BountyFundingSource, ExpenseEvent, ReconciliationScope};
use synod_core::policy::{gate_outflow, GateContext, GateOutcome, SpendCaps};
use synod_core::store::{AuditStore, BountyStore, LedgerStore, ReconciliationStore};

async fn gate_context_for(state: &AppState, bounty: &Bounty, now: chrono::DateTime<Utc>) -> Result<(ReconciliationScope, GateContext), Response> {
    match bounty.funding_source {
        BountyFundingSource::ProjectCapital => {
            let project = match state.store.get_project(&bounty.project_id).await {
                Ok(Some(project)) => project,
                Ok(None) => return Err(ApiError(synod_core::Error::NotFound(format!("project:{}", bounty.project_id))).into_response()),
                Err(err) => return Err(ApiError(err).into_response()),
            };
            let reconciliation = match state.store.latest_report(ReconciliationScope::ProjectCapital, Some(&bounty.project_id), None).await {
                Ok(report) => report,
                Err(err) => return Err(ApiError(err).into_response()),
            };
            let remaining = match state.store.project_capital_balance(&bounty.project_id).await {
                Ok(balance) => balance,
                Err(err) => return Err(ApiError(err).into_response()),
            };
            Ok((
                ReconciliationScope::ProjectCapital,
                GateContext {
                    anchor_configured: project.treasury_address.is_some(),
                    reconciliation,
                    now,
                    max_age_seconds: state.config.project_capital_reconciliation_max_age_seconds,
                    amount_micro_usdc: bounty.amount_micro_usdc,
                    caps: SpendCaps::default(),
                    spent_on_this_outflow_micro_usdc: 0,
                    spent_today_micro_usdc: 0,
                    spent_this_month_micro_usdc: 0,
                    remaining_project_capital_micro_usdc: Some(remaining),
                },
            ))
        }
        BountyFundingSource::PlatformRevenue => {
            let reconciliation = match state.store.latest_report(ReconciliationScope::Platform, None, None).await {
                Ok(report) => report,
                Err(err) => return Err(ApiError(err).into_response()),
            };
            Ok((
                ReconciliationScope::Platform,
                GateContext {
                    anchor_configured: state.config.dividend_distributor_contract_address.is_some(),
                    reconciliation,
                    now,
                    max_age_seconds: state.config.platform_reconciliation_max_age_seconds,
                    amount_micro_usdc: bounty.amount_micro_usdc,
                    caps: SpendCaps::default(),
                    spent_on_this_outflow_micro_usdc: 0,
                    spent_today_micro_usdc: 0,
                    spent_this_month_micro_usdc: 0,
                    remaining_project_capital_micro_usdc: None,
                },
            ))
        }
    }
}

pub async fn mark_paid(State(state): State<AppState>, Path(bounty_id): Path<String>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let path = format!("/api/v1/oracle/bounties/{bounty_id}/mark-paid");
    let ctx = match require_oracle_auth(&state, &headers, "POST", &path, &body).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let bounty = match state.store.get_bounty(&bounty_id).await {
        Ok(Some(bounty)) => bounty,
        Ok(None) => return ApiError(synod_core::Error::NotFound(format!("bounty:{bounty_id}"))).into_response(),
        Err(err) => return ApiError(err).into_response(),
    };
    if !bounty.is_eligible_for_payout() {
        return ApiError(synod_core::Error::Conflict(format!("bounty_not_eligible:{bounty_id}"))).into_response();
    }

    let now = Utc::now();
    let (scope, gate_ctx) = match gate_context_for(&state, &bounty, now).await {
        Ok(pair) => pair,
        Err(response) => return response,
    };

    let outcome = gate_outflow(scope, &gate_ctx);
    let idempotency_key = format!("bounty_mark_paid:{bounty_id}");

    let (body_json, error_hint) = match &outcome {
        GateOutcome::Blocked { blocked_reason } => (json!({ "success": false, "blocked_reason": blocked_reason }), Some(audit::gate_block_hint(blocked_reason))),
        GateOutcome::Allowed => {
            let event = ExpenseEvent {
                event_id: expense_event_id(),
                profit_month_id: now.format("%Y%m").to_string(),
                project_id: Some(bounty.project_id.clone()),
                amount_micro_usdc: bounty.amount_micro_usdc,
                tx_hash: None,
                source: "bounty_payout".to_string(),
                category: Some("bounty".to_string()),
                idempotency_key: idempotency_key.clone(),
                evidence_url: None,
                created_at: now,
            };
            let entry = audit::new_entry(ActorType::Oracle, None, "POST", &path, Some(idempotency_key.clone()), ctx.body_hash.clone(), ctx.signature_status, Some(ctx.request_id.clone()), now);
            if let Err(err) = state.store.append_expense_event(event, entry).await {
                return ApiError(err).into_response();
            }
            match state.store.mark_paid(&bounty_id).await {
                Ok(_) => (json!({ "success": true, "bounty_id": bounty_id, "status": "paid" }), None),
                Err(err) => return ApiError(err).into_response(),
            }
        }
    };

    if !matches!(outcome, GateOutcome::Allowed) {
        let mut entry = audit::new_entry(ActorType::Oracle, None, "POST", &path, None, ctx.body_hash, ctx.signature_status, Some(ctx.request_id), now);
        if let Some(hint) = error_hint {
            entry = audit::with_error_hint(entry, &hint);
        }
        let _ = state.store.append(entry).await;
    }

    Json(body_json).into_response()
}
