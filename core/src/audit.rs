//! Audit log helpers (C12). `AuditEntry` rows are written inline with
//! the state change they describe — these are just the constructors
//! shared by every call site so the `"br={reason};..."` convention for
//! gate blocks (spec.md §4.6) and the header sanitation (§7) aren't
//! reimplemented at each call site.

use crate::ids::audit_id;
use crate::models::{ActorType, AuditEntry, SignatureStatus};
use chrono::{DateTime, Utc};

#[allow(clippy::too_many_arguments)]
pub fn new_entry(
    actor_type: ActorType,
    actor_id: Option<String>,
    method: &str,
    path: &str,
    idempotency_key: Option<String>,
    body_hash: String,
    signature_status: SignatureStatus,
    request_id: Option<String>,
    now: DateTime<Utc>,
) -> AuditEntry {
    AuditEntry {
        audit_id: audit_id(),
        actor_type,
        actor_id,
        method: method.to_string(),
        path: path.to_string(),
        idempotency_key,
        body_hash,
        signature_status,
        request_id,
        tx_hash: None,
        error_hint: None,
        created_at: now,
    }
}

/// Formats a gate-block reason into the `"br={reason};..."` convention
/// and applies the standard 255-char / private-key redaction.
pub fn gate_block_hint(blocked_reason: &str) -> String {
    AuditEntry::sanitize_error_hint(&format!("br={blocked_reason};"))
}

pub fn with_error_hint(mut entry: AuditEntry, hint: &str) -> AuditEntry {
    entry.error_hint = Some(AuditEntry::sanitize_error_hint(hint));
    entry
}

pub fn with_tx_hash(mut entry: AuditEntry, tx_hash: &str) -> AuditEntry {
    entry.tx_hash = Some(tx_hash.to_string());
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_block_hint_carries_the_br_prefix() {
        assert_eq!(gate_block_hint("project_capital_address_missing"), "br=project_capital_address_missing;");
    }

    #[test]
    fn new_entry_defaults_tx_hash_and_error_hint_to_none() {
        let entry = new_entry(ActorType::Oracle, Some("agt_1".to_string()), "POST", "/x", None, "hash".to_string(), SignatureStatus::Ok, Some("req_1".to_string()), Utc::now());
        assert!(entry.tx_hash.is_none());
        assert!(entry.error_hint.is_none());
    }
}
