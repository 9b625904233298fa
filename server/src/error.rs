//! Maps `synod_core::Error` onto HTTP responses per spec.md §7: a 1:1
//! mapping from error kind to status code, with a short stable `detail`
//! string. Gate blocks and oracle-auth failures are handled separately
//! at the call site since neither is represented as an `Error` — a
//! blocked outflow is a successful response, and an auth failure needs
//! its own audit row before a response is sent.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use synod_core::Error;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            Error::Validation { field } => (StatusCode::BAD_REQUEST, format!("validation:{field}")),
            Error::AuthInvalid => (StatusCode::FORBIDDEN, "auth_invalid".to_string()),
            Error::AuthStale => (StatusCode::FORBIDDEN, "auth_stale".to_string()),
            Error::AuthReplay => (StatusCode::CONFLICT, "auth_replay".to_string()),
            Error::NotFound(what) => (StatusCode::NOT_FOUND, format!("not_found:{what}")),
            Error::Conflict(what) => (StatusCode::CONFLICT, format!("conflict:{what}")),
            Error::ChainConfig(hint) => (StatusCode::BAD_GATEWAY, hint.clone()),
            Error::ChainTx(hint) => (StatusCode::BAD_GATEWAY, hint.clone()),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error".to_string()),
            Error::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error".to_string()),
        };
        (status, Json(json!({ "success": false, "detail": detail }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
