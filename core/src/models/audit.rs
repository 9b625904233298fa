use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Agent,
    Oracle,
    System,
}

/// Outcome of the HMAC gate (C10) for this request, or `NotApplicable`
/// for actors that never carry a signature (system-originated rows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Ok,
    OkLegacy,
    Invalid,
    Stale,
    Replay,
    NotApplicable,
}

/// One append-only audit row. Written in the same transaction as the
/// state change it describes (§4.12); `error_hint` is bounded to 255
/// chars and, for gate blocks, begins with `"br={blocked_reason};"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub audit_id: String,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub method: String,
    pub path: String,
    pub idempotency_key: Option<String>,
    pub body_hash: String,
    pub signature_status: SignatureStatus,
    pub request_id: Option<String>,
    pub tx_hash: Option<String>,
    pub error_hint: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub const ERROR_HINT_MAX_LEN: usize = 255;

    /// Truncates to the 255-char bound and redacts anything that looks
    /// like a raw hex private key, per spec.md §7.
    pub fn sanitize_error_hint(hint: &str) -> String {
        let redacted = redact_private_keys(hint);
        if redacted.len() > Self::ERROR_HINT_MAX_LEN {
            redacted.chars().take(Self::ERROR_HINT_MAX_LEN).collect()
        } else {
            redacted
        }
    }
}

fn redact_private_keys(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if input[i..].starts_with("0x") && input[i..].len() >= 66 && input[i + 2..i + 66].bytes().all(|b| b.is_ascii_hexdigit()) {
            out.push_str("0x<redacted>");
            i += 66;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_hex_private_keys() {
        let hint = format!("invalid_private_key:0x{}", "ab".repeat(32));
        let sanitized = AuditEntry::sanitize_error_hint(&hint);
        assert_eq!(sanitized, "invalid_private_key:0x<redacted>");
    }

    #[test]
    fn truncates_long_hints() {
        let hint = "e".repeat(400);
        let sanitized = AuditEntry::sanitize_error_hint(&hint);
        assert_eq!(sanitized.len(), AuditEntry::ERROR_HINT_MAX_LEN);
    }
}
