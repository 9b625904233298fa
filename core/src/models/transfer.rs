use crate::money::Micro;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical chain observation. `(chain_id, tx_hash, log_index)` is
/// unique — re-scanning a range never double-inserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedUsdcTransfer {
    pub chain_id: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub token_address: String,
    pub from_address: String,
    pub to_address: String,
    pub amount_micro_usdc: Micro,
    pub block_number: i64,
    pub observed_at: DateTime<Utc>,
}

/// Per-`(cursor_key, chain_id)` last confirmed block scanned. Advanced
/// only in the same transaction as the batch of dedup-inserts it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerCursor {
    pub cursor_key: String,
    pub chain_id: i64,
    pub last_block_number: i64,
}
