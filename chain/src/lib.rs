//! `ChainClient` (C3/C4) implementation over raw JSON-RPC, plus the
//! direct-signer and Safe-mode relay write paths. Grounded on
//! `services/blockchain.py`, which plays the same role in the source
//! system: a small hand-rolled RPC client backing both the indexer's
//! reads and the outbox worker's writes.

pub mod abi;
pub mod rpc;
pub mod safe;
pub mod signer;

use abi::{decode_single_uint, decode_words, encode_address_arg, encode_uint256_arg};
use alloy_primitives::Address;
use async_trait::async_trait;
use rpc::RpcTransport;
use safe::{load_safe_keys_file, SafeSigner};
use serde_json::json;
use signer::DirectSigner;
use synod_core::config::Config;
use synod_core::indexer::{ChainClient, ChainTxRequest, DistributionView, TransferLog};
use synod_core::{Error, Result};

const TRANSFER_TOPIC0: &str = synod_core::indexer::TRANSFER_TOPIC0;
const BALANCE_OF_SELECTOR: &str = synod_core::indexer::BALANCE_OF_SELECTOR;
const GET_DISTRIBUTION_SELECTOR: &str = synod_core::indexer::GET_DISTRIBUTION_SELECTOR;

fn topic_for_address(address: Address) -> String {
    format!("0x{}", hex::encode(address.into_word()))
}

/// Either write path a `JsonRpcChainClient` can relay a transaction
/// through, selected once at construction from `Config::safe_mode_enabled`.
pub enum WriteRelay {
    Direct(DirectSigner),
    Safe(SafeSigner),
}

/// Production `ChainClient`: raw JSON-RPC reads (`eth_getLogs`,
/// `eth_call`, `eth_chainId`, `eth_blockNumber`) and a write path that is
/// either a direct signer or a Safe-mode relay, chosen once at startup.
pub struct JsonRpcChainClient {
    transport: RpcTransport,
    relay: WriteRelay,
}

impl JsonRpcChainClient {
    pub fn new(rpc_url: impl Into<String>, relay: WriteRelay) -> Self {
        Self { transport: RpcTransport::new(rpc_url), relay }
    }

    /// Builds the production client from a resolved [`Config`]: a direct
    /// signer unless both Safe owner settings are present, in which case
    /// writes are relayed through the Safe instead (spec.md §4.7).
    pub fn from_config(config: &Config) -> Result<Self> {
        let rpc_url = config.base_sepolia_rpc_url.clone().ok_or_else(|| Error::ChainConfig("base_sepolia_rpc_url_not_configured".to_string()))?;

        let relay = if config.safe_mode_enabled() {
            let safe_address: Address = config
                .safe_owner_address
                .as_deref()
                .ok_or_else(|| Error::ChainConfig("safe_owner_address_not_configured".to_string()))?
                .parse()
                .map_err(|_| Error::ChainConfig("safe_owner_address_invalid".to_string()))?;
            let keys_path = config.safe_owner_keys_file.as_deref().ok_or_else(|| Error::ChainConfig("safe_owner_keys_file_not_configured".to_string()))?;
            let keys_file = load_safe_keys_file(std::path::Path::new(keys_path))?;
            let owner_keys = keys_file.owners.into_iter().map(|owner| owner.private_key).collect();
            WriteRelay::Safe(SafeSigner { rpc_url: rpc_url.clone(), safe_address, owner_keys, contracts_dir: config.contracts_dir.clone() })
        } else {
            let private_key = config.oracle_signer_private_key.clone().ok_or_else(|| Error::ChainConfig("oracle_signer_private_key_not_configured".to_string()))?;
            WriteRelay::Direct(DirectSigner { rpc_url: rpc_url.clone(), private_key, contracts_dir: config.contracts_dir.clone() })
        };

        Ok(Self::new(rpc_url, relay))
    }

    /// One `eth_getLogs` call for `Transfer` events where `watched`
    /// addresses occupy the topic at `topic_index` (1 = `from`, 2 = `to`),
    /// mirroring `indexer/usdc_transfers.py`'s two-query scan.
    async fn get_logs_for_topic(&self, token: Address, watched: &[Address], topic_index: usize, from_block: i64, to_block: i64) -> Result<Vec<TransferLog>> {
        let mut topics: Vec<serde_json::Value> = vec![json!(TRANSFER_TOPIC0)];
        while topics.len() <= topic_index {
            topics.push(serde_json::Value::Null);
        }
        topics[topic_index] = json!(watched.iter().map(|a| topic_for_address(*a)).collect::<Vec<_>>());

        let params = json!([{
            "fromBlock": rpc::hex_int(from_block),
            "toBlock": rpc::hex_int(to_block),
            "address": format!("{token:#x}"),
            "topics": topics,
        }]);
        let result = self.transport.call("eth_getLogs", params).await?;
        let entries = result.as_array().cloned().unwrap_or_default();

        let mut logs = Vec::with_capacity(entries.len());
        for entry in entries {
            let tx_hash = entry.get("transactionHash").and_then(|v| v.as_str()).ok_or_else(|| Error::ChainTx("invalid_payload:missing_tx_hash".to_string()))?;
            let log_index_hex = entry.get("logIndex").and_then(|v| v.as_str()).ok_or_else(|| Error::ChainTx("invalid_payload:missing_log_index".to_string()))?;
            let block_number_hex = entry.get("blockNumber").and_then(|v| v.as_str()).ok_or_else(|| Error::ChainTx("invalid_payload:missing_block_number".to_string()))?;
            let entry_topics = entry.get("topics").and_then(|v| v.as_array()).ok_or_else(|| Error::ChainTx("invalid_payload:missing_topics".to_string()))?;
            let data = entry.get("data").and_then(|v| v.as_str()).ok_or_else(|| Error::ChainTx("invalid_payload:missing_data".to_string()))?;

            let from_address = address_from_topic(entry_topics.get(1))?;
            let to_address = address_from_topic(entry_topics.get(2))?;
            let amount_micro_usdc = decode_single_uint(data)?;

            logs.push(TransferLog {
                tx_hash: tx_hash.to_lowercase(),
                log_index: rpc::parse_hex_int(log_index_hex)?,
                token_address: format!("{token:#x}").to_lowercase(),
                from_address,
                to_address,
                amount_micro_usdc,
                block_number: rpc::parse_hex_int(block_number_hex)?,
            });
        }
        Ok(logs)
    }
}

fn address_from_topic(topic: Option<&serde_json::Value>) -> Result<String> {
    let topic = topic.and_then(|v| v.as_str()).ok_or_else(|| Error::ChainTx("invalid_payload:missing_address_topic".to_string()))?;
    let stripped = topic.strip_prefix("0x").ok_or_else(|| Error::ChainTx("invalid_payload:missing_0x_prefix".to_string()))?;
    if stripped.len() < 40 {
        return Err(Error::ChainTx("invalid_payload:short_address_topic".to_string()));
    }
    Ok(format!("0x{}", &stripped[stripped.len() - 40..]).to_lowercase())
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn chain_id(&self) -> Result<i64> {
        self.transport.call_hex_int("eth_chainId", json!([])).await
    }

    async fn latest_block_number(&self) -> Result<i64> {
        self.transport.call_hex_int("eth_blockNumber", json!([])).await
    }

    /// Matches `indexer/usdc_transfers.py`'s two-query scan: one
    /// `eth_getLogs` call with `watched` in the `from` topic, one with
    /// `watched` in the `to` topic, merged before return. Dedup against
    /// already-observed rows happens at the store layer via the
    /// `(chain_id, tx_hash, log_index)` unique index.
    async fn get_transfer_logs(&self, token: Address, watched: &[Address], from_block: i64, to_block: i64) -> Result<Vec<TransferLog>> {
        let mut outbound = self.get_logs_for_topic(token, watched, 1, from_block, to_block).await?;
        let inbound = self.get_logs_for_topic(token, watched, 2, from_block, to_block).await?;
        outbound.extend(inbound);
        Ok(outbound)
    }

    async fn balance_of(&self, token: Address, holder: Address) -> Result<i64> {
        let call_data = format!("0x{}{}", BALANCE_OF_SELECTOR.trim_start_matches("0x"), encode_address_arg(holder));
        let params = json!([{ "to": format!("{token:#x}"), "data": call_data }, "latest"]);
        let result = self.transport.call("eth_call", params).await?;
        let hex_data = result.as_str().ok_or_else(|| Error::ChainTx("invalid_payload:missing_eth_call_result".to_string()))?;
        decode_single_uint(hex_data)
    }

    async fn get_distribution(&self, registry: Address, distribution_id: u64) -> Result<DistributionView> {
        let call_data = format!("0x{}{}", GET_DISTRIBUTION_SELECTOR.trim_start_matches("0x"), encode_uint256_arg(distribution_id));
        let params = json!([{ "to": format!("{registry:#x}"), "data": call_data }, "latest"]);
        let result = self.transport.call("eth_call", params).await?;
        let hex_data = result.as_str().ok_or_else(|| Error::ChainTx("invalid_payload:missing_eth_call_result".to_string()))?;
        let words = decode_words(hex_data)?;
        if words.len() < 3 {
            return Err(Error::ChainTx("invalid_payload:short_get_distribution_tuple".to_string()));
        }
        Ok(DistributionView { total_profit_micro_usdc: words[0], distributed_micro_usdc: words[1], exists: words[2] != 0 })
    }

    async fn submit_tx(&self, request: ChainTxRequest) -> Result<String> {
        let tx_hash = match &self.relay {
            WriteRelay::Direct(signer) => signer.send(request.to, &request.data, request.value_wei).await?,
            WriteRelay::Safe(signer) => signer.send(request.to, &request.data, request.value_wei).await?,
        };
        Ok(tx_hash)
    }
}
