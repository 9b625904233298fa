use crate::money::Micro;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// Proposal to distribute a month's settled profit as dividends. Created
/// only once a platform-scope `ReconciliationReport` is `ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionCreation {
    pub distribution_id: String,
    pub profit_month_id: String,
    pub total_amount_micro_usdc: Micro,
    pub recipient_count: i64,
    pub status: LifecycleStatus,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// One attempted on-chain execution of a `DistributionCreation`. A
/// creation may have several executions if earlier ones failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionExecution {
    pub execution_id: String,
    pub distribution_id: String,
    pub tx_hash: Option<String>,
    pub status: LifecycleStatus,
    pub error: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Per-recipient payout line within a completed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DividendPayout {
    pub payout_id: String,
    pub execution_id: String,
    pub recipient_address: String,
    pub amount_micro_usdc: Micro,
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}
