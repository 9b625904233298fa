//! Canonical-JSON idempotency keys for payload-derived outbox tasks
//! (`create_distribution`, `execute_distribution`, marketing deposits).
//! Grounded on `_derive_idempotency_key` in `backend/src/oracle_runner/
//! cli.py`: `json.dumps(payload, sort_keys=True, separators=(",", ":"))`
//! then `sha256(...).hexdigest()`. `serde_json::Value::Object` does not
//! sort keys on its own, so we rebuild into a `BTreeMap` first.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
            serde_json::to_value(sorted).expect("BTreeMap<String, Value> always serializes")
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Serializes `value` with sorted keys and no insignificant whitespace,
/// then hex-sha256s the result.
pub fn canonical_json_key(value: &Value) -> String {
    let canonical = canonicalize(value);
    let bytes = serde_json::to_vec(&canonical).expect("canonicalized value always serializes");
    hex::encode(Sha256::digest(bytes))
}

/// Deterministic key for a `create_distribution` task: spec.md §4.5
/// mandates the exact literal form `"create_distribution:{month}:{profit_sum}"`.
pub fn create_distribution_key(profit_month_id: &str, profit_sum_micro_usdc: i64) -> String {
    format!("create_distribution:{profit_month_id}:{profit_sum_micro_usdc}")
}

/// Deterministic key for an `execute_distribution` task, derived from the
/// canonical JSON of the recipient payload so identical resubmissions
/// collapse onto the same row regardless of caller.
pub fn execute_distribution_key(profit_month_id: &str, payload: &Value) -> String {
    format!("execute_distribution:{profit_month_id}:{}", canonical_json_key(payload))
}

/// Deterministic key for a marketing-fee deposit task: spec.md §4.9
/// mandates `"deposit_marketing_fee:{accrued_total}:{sent_total}"`.
pub fn deposit_marketing_fee_key(accrued_total: i64, sent_total: i64) -> String {
    format!("deposit_marketing_fee:{accrued_total}:{sent_total}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_the_hash() {
        let a = json!({ "b": 1, "a": 2 });
        let b = json!({ "a": 2, "b": 1 });
        assert_eq!(canonical_json_key(&a), canonical_json_key(&b));
    }

    #[test]
    fn nested_objects_are_also_sorted() {
        let a = json!({ "outer": { "z": 1, "y": 2 } });
        let b = json!({ "outer": { "y": 2, "z": 1 } });
        assert_eq!(canonical_json_key(&a), canonical_json_key(&b));
    }

    #[test]
    fn create_distribution_key_matches_spec_literal_form() {
        assert_eq!(create_distribution_key("202501", 100), "create_distribution:202501:100");
    }
}
