//! Oracle request gate (C10). Every oracle-authenticated request passes
//! through [`authenticate`] before its handler runs: header presence,
//! staleness, the nonce replay guard, then HMAC verification (v2, with
//! an optional v1 fallback). The caller attaches the returned context to
//! the audit row it writes alongside the request's side effects.
//!
//! Grounded on `backend/src/api/deps.py::require_oracle_auth`.

use crate::crypto::{hash_body, verify_oracle_v1, verify_oracle_v2};
use crate::models::SignatureStatus;
use crate::store::NonceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleAuthError {
    MissingHeaders,
    Stale,
    Replay,
    Invalid,
}

impl OracleAuthError {
    pub fn signature_status(self) -> SignatureStatus {
        match self {
            OracleAuthError::MissingHeaders | OracleAuthError::Invalid => SignatureStatus::Invalid,
            OracleAuthError::Stale => SignatureStatus::Stale,
            OracleAuthError::Replay => SignatureStatus::Replay,
        }
    }

    pub fn error_hint(self) -> &'static str {
        match self {
            OracleAuthError::MissingHeaders => "missing_required_oracle_headers",
            OracleAuthError::Stale => "stale_timestamp",
            OracleAuthError::Replay => "replay",
            OracleAuthError::Invalid => "invalid_signature",
        }
    }
}

/// The three oracle-auth headers, already extracted by the HTTP layer.
pub struct OracleHeaders<'a> {
    pub timestamp: Option<&'a str>,
    pub request_id: Option<&'a str>,
    pub signature: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct OracleAuthContext {
    pub body_hash: String,
    pub request_id: String,
    pub signature_status: SignatureStatus,
}

/// Runs the full gate described in spec.md §4.10. `now_unix` and the
/// parsed `ts` are both seconds-since-epoch; `accept_legacy` mirrors
/// `ORACLE_ACCEPT_LEGACY_SIGNATURES` (default off).
#[allow(clippy::too_many_arguments)]
pub async fn authenticate(
    nonces: &dyn NonceStore,
    secret: &str,
    headers: OracleHeaders<'_>,
    method: &str,
    path: &str,
    body: &[u8],
    now_unix: i64,
    ttl_seconds: i64,
    skew_seconds: i64,
    accept_legacy: bool,
) -> Result<OracleAuthContext, OracleAuthError> {
    let (Some(ts_str), Some(request_id), Some(signature)) = (headers.timestamp, headers.request_id, headers.signature) else {
        return Err(OracleAuthError::MissingHeaders);
    };

    let ts: i64 = ts_str.parse().map_err(|_| OracleAuthError::MissingHeaders)?;
    if (now_unix - ts).abs() > ttl_seconds + skew_seconds {
        return Err(OracleAuthError::Stale);
    }

    let inserted = nonces.insert_nonce(request_id).await.map_err(|_| OracleAuthError::Invalid)?;
    if !inserted {
        return Err(OracleAuthError::Replay);
    }

    let body_hash = hash_body(body);

    if verify_oracle_v2(secret, ts_str, request_id, method, path, &body_hash, signature) {
        return Ok(OracleAuthContext { body_hash, request_id: request_id.to_string(), signature_status: SignatureStatus::Ok });
    }

    if accept_legacy && verify_oracle_v1(secret, ts_str, &body_hash, signature) {
        return Ok(OracleAuthContext { body_hash, request_id: request_id.to_string(), signature_status: SignatureStatus::OkLegacy });
    }

    Err(OracleAuthError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sign_oracle_request_v2;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct StubNonces {
        seen: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl NonceStore for StubNonces {
        async fn insert_nonce(&self, request_id: &str) -> Result<bool> {
            Ok(self.seen.lock().unwrap().insert(request_id.to_string()))
        }
    }

    fn nonces() -> StubNonces {
        StubNonces { seen: Mutex::new(HashSet::new()) }
    }

    #[tokio::test]
    async fn missing_headers_fail_closed() {
        let store = nonces();
        let result = authenticate(&store, "secret", OracleHeaders { timestamp: None, request_id: None, signature: None }, "POST", "/p", b"{}", 1_700_000_000, 300, 5, false).await;
        assert_eq!(result.unwrap_err(), OracleAuthError::MissingHeaders);
    }

    #[tokio::test]
    async fn valid_v2_signature_succeeds() {
        let store = nonces();
        let body = b"{}";
        let body_hash = hash_body(body);
        let sig = sign_oracle_request_v2("secret", "1700000000", "req-1", "POST", "/p", &body_hash);
        let headers = OracleHeaders { timestamp: Some("1700000000"), request_id: Some("req-1"), signature: Some(&sig) };
        let ctx = authenticate(&store, "secret", headers, "POST", "/p", body, 1_700_000_000, 300, 5, false).await.unwrap();
        assert_eq!(ctx.signature_status, SignatureStatus::Ok);
    }

    #[tokio::test]
    async fn replayed_request_id_is_rejected() {
        let store = nonces();
        let body = b"{}";
        let body_hash = hash_body(body);
        let sig = sign_oracle_request_v2("secret", "1700000000", "req-1", "POST", "/p", &body_hash);
        let headers = || OracleHeaders { timestamp: Some("1700000000"), request_id: Some("req-1"), signature: Some(&sig) };
        authenticate(&store, "secret", headers(), "POST", "/p", body, 1_700_000_000, 300, 5, false).await.unwrap();
        let result = authenticate(&store, "secret", headers(), "POST", "/p", body, 1_700_000_000, 300, 5, false).await;
        assert_eq!(result.unwrap_err(), OracleAuthError::Replay);
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected() {
        let store = nonces();
        let body = b"{}";
        let body_hash = hash_body(body);
        let sig = sign_oracle_request_v2("secret", "1700000000", "req-1", "POST", "/p", &body_hash);
        let headers = OracleHeaders { timestamp: Some("1700000000"), request_id: Some("req-1"), signature: Some(&sig) };
        let result = authenticate(&store, "secret", headers, "POST", "/p", body, 1_700_001_000, 300, 5, false).await;
        assert_eq!(result.unwrap_err(), OracleAuthError::Stale);
    }

    #[tokio::test]
    async fn legacy_v1_only_succeeds_when_enabled() {
        let store = nonces();
        let body = b"{}";
        let body_hash = hash_body(body);
        let v1_sig = crate::crypto::sign_oracle_request_v1("secret", "1700000000", &body_hash);
        let headers = || OracleHeaders { timestamp: Some("1700000000"), request_id: Some("req-1"), signature: Some(&v1_sig) };

        let rejected = authenticate(&store, "secret", headers(), "POST", "/p", body, 1_700_000_000, 300, 5, false).await;
        assert_eq!(rejected.unwrap_err(), OracleAuthError::Invalid);

        let store = nonces();
        let ctx = authenticate(&store, "secret", headers(), "POST", "/p", body, 1_700_000_000, 300, 5, true).await.unwrap();
        assert_eq!(ctx.signature_status, SignatureStatus::OkLegacy);
    }
}
