//! Crypto/HMAC primitives (C1): request body hashing, oracle HMAC
//! signing/verification (v2 default, v1 legacy behind a flag), and
//! PBKDF2 agent API-key hashing.
//!
//! Grounded on `backend/src/core/security.py`; constants and payload
//! shapes are reproduced exactly so the same (timestamp, request_id,
//! body) tuple verifies identically.

use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const PBKDF2_ITERATIONS: u32 = 200_000;
const PBKDF2_SALT_BYTES: usize = 16;
const PBKDF2_OUTPUT_BYTES: usize = 32;

/// `sha256(body)` as lowercase hex, exactly `hash_body` in the source.
pub fn hash_body(body: &[u8]) -> String {
    use sha2::Digest;
    hex::encode(Sha256::digest(body))
}

/// Oracle HMAC v2 payload: `"{ts}.{request_id}.{METHOD}.{path}.{body_hash}"`.
pub fn oracle_v2_payload(ts: &str, request_id: &str, method: &str, path: &str, body_hash: &str) -> String {
    format!("{ts}.{request_id}.{}.{path}.{body_hash}", method.to_ascii_uppercase())
}

/// Legacy oracle HMAC v1 payload: `"{ts}.{body_hash}"`.
pub fn oracle_v1_payload(ts: &str, body_hash: &str) -> String {
    format!("{ts}.{body_hash}")
}

fn hmac_hex(secret: &str, message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn sign_oracle_request_v2(secret: &str, ts: &str, request_id: &str, method: &str, path: &str, body_hash: &str) -> String {
    hmac_hex(secret, &oracle_v2_payload(ts, request_id, method, path, body_hash))
}

pub fn sign_oracle_request_v1(secret: &str, ts: &str, body_hash: &str) -> String {
    hmac_hex(secret, &oracle_v1_payload(ts, body_hash))
}

/// Constant-time hex-signature comparison.
pub fn signatures_match(expected_hex: &str, provided_hex: &str) -> bool {
    // Lengths leak via short-circuit in every implementation of this
    // comparison (including the Python source's `hmac.compare_digest`);
    // only the byte contents need constant-time treatment.
    if expected_hex.len() != provided_hex.len() {
        return false;
    }
    expected_hex.as_bytes().ct_eq(provided_hex.as_bytes()).into()
}

pub fn verify_oracle_v2(secret: &str, ts: &str, request_id: &str, method: &str, path: &str, body_hash: &str, signature: &str) -> bool {
    signatures_match(&sign_oracle_request_v2(secret, ts, request_id, method, path, body_hash), signature)
}

pub fn verify_oracle_v1(secret: &str, ts: &str, body_hash: &str, signature: &str) -> bool {
    signatures_match(&sign_oracle_request_v1(secret, ts, body_hash), signature)
}

/// PBKDF2-HMAC-SHA256 agent API-key hash, stored as
/// `pbkdf2_sha256$iterations$salt_hex$derived_hex`.
pub fn hash_api_key(api_key: &str) -> String {
    let mut salt = [0u8; PBKDF2_SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    hash_api_key_with_salt(api_key, &salt, PBKDF2_ITERATIONS)
}

fn hash_api_key_with_salt(api_key: &str, salt: &[u8], iterations: u32) -> String {
    let mut derived = [0u8; PBKDF2_OUTPUT_BYTES];
    pbkdf2_hmac::<Sha256>(api_key.as_bytes(), salt, iterations, &mut derived);
    format!("pbkdf2_sha256${iterations}${}${}", hex::encode(salt), hex::encode(derived))
}

/// Verifies `api_key` against a stored `pbkdf2_sha256$...` hash. Any
/// malformed stored hash fails closed (returns `false`).
pub fn verify_api_key(api_key: &str, stored_hash: &str) -> bool {
    let mut parts = stored_hash.split('$');
    let (Some(algorithm), Some(iterations), Some(salt_hex), Some(derived_hex), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if algorithm != "pbkdf2_sha256" {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else { return false };
    let Ok(salt) = hex::decode(salt_hex) else { return false };
    let Ok(expected) = hex::decode(derived_hex) else { return false };

    let mut derived = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(api_key.as_bytes(), &salt, iterations, &mut derived);
    derived.len() == expected.len() && bool::from(derived.ct_eq(&expected))
}

/// Generates a fresh `{agent_id}.{token}` API key plus its stored hash.
pub fn generate_agent_api_key(agent_id: &str) -> (String, String) {
    use base64::Engine;
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw);
    let api_key = format!("{agent_id}.{token}");
    let hash = hash_api_key(&api_key);
    (api_key, hash)
}

pub fn api_key_last4(api_key: &str) -> String {
    let len = api_key.len();
    api_key[len.saturating_sub(4)..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oracle_v2_payload_matches_source_format() {
        let payload = oracle_v2_payload("1700000000", "req-1", "post", "/api/v1/oracle/x", "deadbeef");
        assert_eq!(payload, "1700000000.req-1.POST./api/v1/oracle/x.deadbeef");
    }

    #[test]
    fn v2_round_trips() {
        let secret = "shh";
        let sig = sign_oracle_request_v2(secret, "1700000000", "req-1", "POST", "/p", "abc");
        assert!(verify_oracle_v2(secret, "1700000000", "req-1", "POST", "/p", "abc", &sig));
        assert!(!verify_oracle_v2(secret, "1700000000", "req-1", "POST", "/p", "abc", "wrong"));
    }

    #[test]
    fn v1_and_v2_are_distinguishable() {
        let secret = "shh";
        let v1 = sign_oracle_request_v1(secret, "1700000000", "abc");
        let v2 = sign_oracle_request_v2(secret, "1700000000", "req-1", "POST", "/p", "abc");
        assert_ne!(v1, v2);
    }

    #[test]
    fn api_key_round_trips() {
        let (api_key, hash) = generate_agent_api_key("agt_1");
        assert!(verify_api_key(&api_key, &hash));
        assert!(!verify_api_key("agt_1.wrong-token", &hash));
        assert_eq!(api_key_last4(&api_key).len(), 4);
    }

    #[test]
    fn verify_api_key_fails_closed_on_malformed_hash() {
        assert!(!verify_api_key("x", "not-a-valid-hash"));
        assert!(!verify_api_key("x", "pbkdf2_sha256$not-an-int$ab$cd"));
    }

    #[test]
    fn hash_body_matches_known_vector() {
        assert_eq!(
            hash_body(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
