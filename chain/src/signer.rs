//! Direct-submit signer: shells out to a local Node/`ethers` script,
//! exactly as `services/blockchain.py::submit_create_distribution_tx`
//! does, generalized from that function's single hardcoded
//! `createDistribution(...)` call to an arbitrary `(to, data, value)`
//! send — `synod_core::tx_outbox` already pre-encodes the calldata for
//! every task type, so this layer only needs to sign and broadcast it.

use alloy_primitives::Address;
use std::process::Stdio;
use std::time::Duration;
use synod_core::Error;
use tokio::process::Command;
use tokio::time::timeout;

const SEND_TX_SCRIPT: &str = r#"
const { JsonRpcProvider, Wallet } = require('ethers');
(async () => {
  const rpcUrl = process.env.RPC_URL;
  const privateKey = process.env.PRIVATE_KEY;
  const to = process.env.TO_ADDRESS;
  const data = process.env.CALL_DATA;
  const value = BigInt(process.env.VALUE_WEI);
  const provider = new JsonRpcProvider(rpcUrl);
  const wallet = new Wallet(privateKey, provider);
  const tx = await wallet.sendTransaction({ to, data, value });
  process.stdout.write(JSON.stringify({ tx_hash: tx.hash }));
})().catch((err) => {
  const message = err && err.message ? err.message : String(err);
  process.stderr.write(message);
  process.exit(1);
});
"#;

pub struct DirectSigner {
    pub rpc_url: String,
    pub private_key: String,
    pub contracts_dir: String,
}

impl DirectSigner {
    pub async fn send(&self, to: Address, data: &[u8], value_wei: u128) -> Result<String, Error> {
        let mut command = Command::new("node");
        command
            .arg("-e")
            .arg(SEND_TX_SCRIPT)
            .current_dir(&self.contracts_dir)
            .env("RPC_URL", &self.rpc_url)
            .env("PRIVATE_KEY", &self.private_key)
            .env("TO_ADDRESS", format!("{to:#x}"))
            .env("CALL_DATA", format!("0x{}", hex::encode(data)))
            .env("VALUE_WEI", value_wei.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = timeout(Duration::from_secs(45), command.output())
            .await
            .map_err(|_| Error::ChainTx("rpc_error:tx_submission_timed_out".to_string()))?
            .map_err(|err| Error::ChainTx(format!("rpc_error:spawn_failed:{err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(Error::ChainTx(sanitize_subprocess_error(&stdout, &stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: serde_json::Value = serde_json::from_str(&stdout).map_err(|_| Error::ChainTx("invalid_payload:unparseable_tx_response".to_string()))?;
        let tx_hash = parsed.get("tx_hash").and_then(|v| v.as_str()).ok_or_else(|| Error::ChainTx("invalid_payload:missing_tx_hash".to_string()))?;
        if !tx_hash.starts_with("0x") {
            return Err(Error::ChainTx("invalid_payload:malformed_tx_hash".to_string()));
        }
        Ok(tx_hash.to_string())
    }
}

/// Maps raw subprocess output onto the same small, fixed hint
/// vocabulary `services/blockchain.py::_sanitize_subprocess_error`
/// uses, after redacting anything private-key- or secret-shaped.
pub fn sanitize_subprocess_error(stdout: &str, stderr: &str) -> String {
    let combined = [stderr.trim(), stdout.trim()].into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");
    if combined.is_empty() {
        return "unknown_subprocess_error".to_string();
    }

    let redacted = redact_secrets(&combined);
    let lowered = redacted.to_lowercase();

    if lowered.contains("cannot find module") && lowered.contains("ethers") {
        return "MODULE_NOT_FOUND ethers".to_string();
    }
    if lowered.contains("node") && lowered.contains("not found") {
        return "node_runtime_not_found".to_string();
    }
    if lowered.contains("invalid private key") {
        return "invalid_private_key".to_string();
    }
    if lowered.contains("insufficient funds") {
        return "insufficient_funds".to_string();
    }
    if lowered.contains("nonce") && lowered.contains("low") {
        return "nonce_too_low".to_string();
    }
    if lowered.contains("rpc") || lowered.contains("network") {
        return "rpc_error".to_string();
    }

    let compact: String = redacted.split_whitespace().collect::<Vec<_>>().join(" ");
    compact.chars().take(160).collect()
}

fn redact_secrets(input: &str) -> String {
    const SENSITIVE_KEYS: [&str; 5] = ["private_key", "private-key", "hmac", "secret", "authorization"];
    input
        .split_whitespace()
        .map(|token| {
            let lowered = token.to_lowercase();
            if lowered.starts_with("0x") && token.len() >= 66 && token[2..].chars().all(|c| c.is_ascii_hexdigit()) {
                return "[redacted]".to_string();
            }
            if let Some((key, _value)) = token.split_once(['=', ':']) {
                if SENSITIVE_KEYS.iter().any(|candidate| key.to_lowercase().contains(candidate)) {
                    return format!("{key}=[redacted]");
                }
            }
            token.to_string()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_private_key_shaped_tokens() {
        let redacted = redact_secrets("wallet 0x1111111111111111111111111111111111111111111111111111111111111111 ok");
        assert!(redacted.contains("[redacted]"));
        assert!(!redacted.contains("0x1111"));
    }

    #[test]
    fn redacts_key_value_secrets() {
        let redacted = redact_secrets("PRIVATE_KEY=0xdeadbeef other=1");
        assert_eq!(redacted, "PRIVATE_KEY=[redacted] other=1");
    }

    #[test]
    fn maps_known_error_substrings_to_hints() {
        assert_eq!(sanitize_subprocess_error("", "insufficient funds for gas"), "insufficient_funds");
        assert_eq!(sanitize_subprocess_error("", "nonce too low"), "nonce_too_low");
        assert_eq!(sanitize_subprocess_error("", "invalid private key"), "invalid_private_key");
        assert_eq!(sanitize_subprocess_error("", "network error: could not detect network"), "rpc_error");
    }

    #[test]
    fn empty_output_yields_unknown() {
        assert_eq!(sanitize_subprocess_error("", ""), "unknown_subprocess_error");
    }
}
