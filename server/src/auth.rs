//! Oracle HMAC gate (C10) wired to axum: every oracle-facing handler
//! calls [`authenticate`] before touching its body, then writes an
//! audit row with the resulting `signature_status` regardless of
//! whether the request is ultimately accepted. Grounded on
//! `backend/src/api/deps.py::require_oracle_auth`.

use crate::state::AppState;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use synod_core::oracle::{self, OracleAuthContext, OracleAuthError, OracleHeaders};
use synod_core::store::AuditStore;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Runs the gate; on success returns the context the caller needs to
/// build its own `AuditEntry`. On failure the audit row for the failed
/// attempt is written here (there is no ledger/state mutation to pair
/// it with), and an HTTP response is returned directly.
pub async fn require_oracle_auth(state: &AppState, headers: &HeaderMap, method: &str, path: &str, body: &[u8]) -> Result<OracleAuthContext, Response> {
    let secret = match &state.config.oracle_hmac_secret {
        Some(secret) => secret.as_str(),
        None => return Err(auth_failure_response(StatusCode::FORBIDDEN, "oracle_hmac_not_configured")),
    };

    let oracle_headers = OracleHeaders {
        timestamp: header_str(headers, "x-request-timestamp"),
        request_id: header_str(headers, "x-request-id"),
        signature: header_str(headers, "x-signature"),
    };

    let result = oracle::authenticate(
        &*state.store,
        secret,
        oracle_headers,
        method,
        path,
        body,
        Utc::now().timestamp(),
        state.config.oracle_request_ttl_seconds,
        state.config.oracle_clock_skew_seconds,
        state.config.oracle_accept_legacy_signatures,
    )
    .await;

    match result {
        Ok(ctx) => Ok(ctx),
        Err(err) => {
            let body_hash = synod_core::crypto::hash_body(body);
            let request_id = header_str(headers, "x-request-id").map(str::to_string);
            let entry = synod_core::audit::new_entry(
                synod_core::models::ActorType::Oracle,
                None,
                method,
                path,
                None,
                body_hash,
                err.signature_status(),
                request_id,
                Utc::now(),
            );
            let entry = synod_core::audit::with_error_hint(entry, err.error_hint());
            let _ = state.store.append(entry).await;
            Err(auth_failure_response(status_for(err), err.error_hint()))
        }
    }
}

fn status_for(err: OracleAuthError) -> StatusCode {
    match err {
        OracleAuthError::MissingHeaders | OracleAuthError::Invalid => StatusCode::FORBIDDEN,
        OracleAuthError::Stale => StatusCode::FORBIDDEN,
        OracleAuthError::Replay => StatusCode::CONFLICT,
    }
}

fn auth_failure_response(status: StatusCode, hint: &str) -> Response {
    (status, Json(json!({ "success": false, "detail": hint }))).into_response()
}
