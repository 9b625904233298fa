use crate::money::Micro;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only revenue row. Never mutated; corrections are new rows with
/// an opposing-sign expense or capital event and their own idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueEvent {
    pub event_id: String,
    pub profit_month_id: String,
    pub project_id: Option<String>,
    pub amount_micro_usdc: Micro,
    pub tx_hash: Option<String>,
    pub source: String,
    pub category: Option<String>,
    pub idempotency_key: String,
    pub evidence_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseEvent {
    pub event_id: String,
    pub profit_month_id: String,
    pub project_id: Option<String>,
    pub amount_micro_usdc: Micro,
    pub tx_hash: Option<String>,
    pub source: String,
    pub category: Option<String>,
    pub idempotency_key: String,
    pub evidence_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Signed delta against a project's capital balance. Positive = inflow,
/// negative = outflow (e.g. a bounty payout funded from project capital).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCapitalEvent {
    pub event_id: String,
    pub project_id: String,
    pub profit_month_id: Option<String>,
    pub delta_micro_usdc: Micro,
    pub source: String,
    pub idempotency_key: String,
    pub evidence_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketingFeeBucket {
    ProjectRevenue,
    ProjectCapital,
    PlatformRevenue,
}

/// Derived fee per inflow (C9), keyed by `(chain_id, tx_hash, log_index,
/// to_address)` so re-deriving from the same observed transfer never
/// double-counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketingFeeAccrualEvent {
    pub event_id: String,
    pub chain_id: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub to_address: String,
    pub bucket: MarketingFeeBucket,
    pub gross_micro_usdc: Micro,
    pub fee_micro_usdc: Micro,
    pub bps: u32,
    pub created_at: DateTime<Utc>,
}
