//! Safe-mode relay (spec.md §4.7: "if Safe owner keys are configured,
//! `create_distribution`/`execute_distribution` build an EIP-712 Safe tx
//! and submit via the Safe API instead of a raw send"). The owner-keys
//! file format and permission/threshold checks are ported from
//! `scripts/safe_execution_preflight.py::_inspect_keys_file`; the relay
//! itself reuses the direct signer's node-subprocess technique, since
//! collecting owner signatures and calling `execTransaction` is still
//! just ethers/Safe SDK work the Rust side never needs to touch.

use alloy_primitives::Address;
use serde::Deserialize;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use synod_core::Error;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Clone, Deserialize)]
pub struct SafeOwnerKey {
    pub private_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SafeKeysFile {
    pub owners: Vec<SafeOwnerKey>,
    #[serde(default = "default_threshold")]
    pub threshold: usize,
}

fn default_threshold() -> usize {
    2
}

/// Mirrors `_inspect_keys_file`: the file must be group/other
/// unreadable, parse as JSON, and carry at least `threshold` usable
/// private keys.
pub fn load_safe_keys_file(path: &Path) -> Result<SafeKeysFile, Error> {
    let metadata = fs::metadata(path).map_err(|_| Error::ChainConfig("safe_keys_file_missing".to_string()))?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(Error::ChainConfig("safe_keys_file_permissions_too_open".to_string()));
    }

    let contents = fs::read_to_string(path).map_err(|_| Error::ChainConfig("safe_keys_file_unreadable".to_string()))?;
    let parsed: SafeKeysFile = serde_json::from_str(&contents).map_err(|_| Error::ChainConfig("safe_keys_file_invalid_json".to_string()))?;

    let usable_keys = parsed.owners.iter().filter(|owner| owner.private_key.starts_with("0x") && owner.private_key.len() >= 66).count();
    if usable_keys < parsed.threshold.max(1) {
        return Err(Error::ChainConfig("safe_keys_file_insufficient_keys_for_threshold".to_string()));
    }

    Ok(parsed)
}

const SAFE_EXEC_SCRIPT: &str = r#"
const { JsonRpcProvider, Wallet } = require('ethers');
const Safe = require('@safe-global/protocol-kit').default;
(async () => {
  const rpcUrl = process.env.RPC_URL;
  const safeAddress = process.env.SAFE_ADDRESS;
  const ownerKeys = JSON.parse(process.env.OWNER_KEYS);
  const to = process.env.TO_ADDRESS;
  const data = process.env.CALL_DATA;
  const value = process.env.VALUE_WEI;

  const provider = new JsonRpcProvider(rpcUrl);
  const signers = ownerKeys.map((key) => new Wallet(key, provider));

  const protocolKit = await Safe.init({ provider: rpcUrl, signer: ownerKeys[0], safeAddress });
  const safeTransaction = await protocolKit.createTransaction({ transactions: [{ to, data, value }] });

  let signedTx = safeTransaction;
  for (const signer of signers) {
    const kit = await Safe.init({ provider: rpcUrl, signer: signer.privateKey, safeAddress });
    signedTx = await kit.signTransaction(signedTx);
  }

  const executingKit = await Safe.init({ provider: rpcUrl, signer: ownerKeys[0], safeAddress });
  const response = await executingKit.executeTransaction(signedTx);
  process.stdout.write(JSON.stringify({ tx_hash: response.hash }));
})().catch((err) => {
  const message = err && err.message ? err.message : String(err);
  process.stderr.write(message);
  process.exit(1);
});
"#;

pub struct SafeSigner {
    pub rpc_url: String,
    pub safe_address: Address,
    pub owner_keys: Vec<String>,
    pub contracts_dir: String,
}

impl SafeSigner {
    pub async fn send(&self, to: Address, data: &[u8], value_wei: u128) -> Result<String, Error> {
        let owner_keys_json = serde_json::to_string(&self.owner_keys).map_err(|err| Error::Internal(err.into()))?;

        let mut command = Command::new("node");
        command
            .arg("-e")
            .arg(SAFE_EXEC_SCRIPT)
            .current_dir(&self.contracts_dir)
            .env("RPC_URL", &self.rpc_url)
            .env("SAFE_ADDRESS", format!("{:#x}", self.safe_address))
            .env("OWNER_KEYS", owner_keys_json)
            .env("TO_ADDRESS", format!("{to:#x}"))
            .env("CALL_DATA", format!("0x{}", hex::encode(data)))
            .env("VALUE_WEI", value_wei.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = timeout(Duration::from_secs(60), command.output())
            .await
            .map_err(|_| Error::ChainTx("rpc_error:safe_tx_submission_timed_out".to_string()))?
            .map_err(|err| Error::ChainTx(format!("rpc_error:spawn_failed:{err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(Error::ChainTx(crate::signer::sanitize_subprocess_error(&stdout, &stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: serde_json::Value = serde_json::from_str(&stdout).map_err(|_| Error::ChainTx("invalid_payload:unparseable_tx_response".to_string()))?;
        let tx_hash = parsed.get("tx_hash").and_then(|v| v.as_str()).ok_or_else(|| Error::ChainTx("invalid_payload:missing_tx_hash".to_string()))?;
        Ok(tx_hash.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct TempJsonFile {
        path: std::path::PathBuf,
    }

    impl TempJsonFile {
        fn write(contents: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "synod_chain_safe_keys_test_{:?}_{}.json",
                std::thread::current().id(),
                contents.len()
            ));
            let mut file = std::fs::File::create(&path).expect("create tempfile");
            file.write_all(contents.as_bytes()).unwrap();
            Self { path }
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TempJsonFile {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    #[test]
    fn rejects_world_readable_keys_file() {
        let file = TempJsonFile::write(r#"{"owners":[{"private_key":"0xaa"}],"threshold":1}"#);
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o644)).unwrap();
        let result = load_safe_keys_file(file.path());
        assert!(matches!(result, Err(Error::ChainConfig(ref hint)) if hint == "safe_keys_file_permissions_too_open"));
    }

    #[test]
    fn rejects_insufficient_keys_for_threshold() {
        let file = TempJsonFile::write(
            r#"{"owners":[{"private_key":"0x1111111111111111111111111111111111111111111111111111111111111111"}],"threshold":2}"#,
        );
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600)).unwrap();
        let result = load_safe_keys_file(file.path());
        assert!(matches!(result, Err(Error::ChainConfig(ref hint)) if hint == "safe_keys_file_insufficient_keys_for_threshold"));
    }
}
