use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbox task lifecycle (§4.7/§4.8). Transitions only move forward;
/// `succeeded`/`failed`/`blocked` are terminal. For the tx outbox, a
/// retryable failure completes the row as `failed` and a fresh row
/// carrying the same semantic `idempotency_key` is enqueued in its
/// place — never a resurrected row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
    Blocked,
}

impl OutboxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Succeeded | OutboxStatus::Failed | OutboxStatus::Blocked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxTaskType {
    DepositProfit,
    DepositMarketingFee,
    CreateDistribution,
    ExecuteDistribution,
    UsdcTransfer,
}

/// A chain transaction queued for eventual submission (C7). `locked_by` +
/// `locked_at` are set together by the claim-next query, keyed by a
/// conditional update so a second worker that raced the claim detects it
/// lost (`ClaimOutcome::RaceLost`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxOutboxTask {
    pub task_id: String,
    pub task_type: TxTaskType,
    pub payload: Value,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub tx_hash: Option<String>,
    pub last_error_hint: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitTaskType {
    SurfaceCommit,
    ArtifactCommit,
    PrOpen,
    AutoMerge,
}

/// A git/repo-host mutation queued for the git-outbox runner (C8). Same
/// claim/conditional-update shape as `TxOutboxTask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitOutboxTask {
    pub task_id: String,
    pub task_type: GitTaskType,
    pub payload: Value,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub branch_name: Option<String>,
    pub commit_sha: Option<String>,
    /// Closed set of known keys: currently only `pr_url`.
    pub result_json: Option<Value>,
    pub last_error_hint: Option<String>,
    pub project_id: Option<String>,
    pub requested_by_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl GitOutboxTask {
    pub fn pr_url(&self) -> Option<&str> {
        self.result_json.as_ref()?.get("pr_url")?.as_str()
    }
}
