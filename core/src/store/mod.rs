#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "test-doubles")]
pub mod memory;

use crate::error::Result;
use crate::models::{
    AuditEntry, Bounty, DistributionCreation, DistributionExecution, DividendPayout,
    ExpenseEvent, GitOutboxTask, IndexerCursor, MarketingFeeAccrualEvent, ObservedUsdcTransfer,
    Project, ProjectCapitalEvent, ReconciliationReport, ReconciliationScope, RevenueEvent,
    Settlement, TxOutboxTask,
};
use async_trait::async_trait;

/// Outcome of an idempotent append: `created=false` means a prior row with
/// the same `idempotency_key` was returned instead of inserting a new one.
#[derive(Debug, Clone)]
pub struct Appended<T> {
    pub row: T,
    pub created: bool,
}

/// C2 — the append-only accounting ledger. Every insert here must commit
/// atomically with an `AuditEntry` row (§4.12); implementations are
/// expected to wrap both writes in a single transaction.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append_revenue_event(&self, event: RevenueEvent, audit: AuditEntry) -> Result<Appended<RevenueEvent>>;
    async fn append_expense_event(&self, event: ExpenseEvent, audit: AuditEntry) -> Result<Appended<ExpenseEvent>>;
    async fn append_project_capital_event(&self, event: ProjectCapitalEvent, audit: AuditEntry) -> Result<Appended<ProjectCapitalEvent>>;
    async fn append_marketing_fee_accrual(&self, event: MarketingFeeAccrualEvent) -> Result<Appended<MarketingFeeAccrualEvent>>;

    async fn revenue_sum_for_month(&self, profit_month_id: &str) -> Result<i64>;
    async fn expense_sum_for_month(&self, profit_month_id: &str) -> Result<i64>;
    async fn project_capital_balance(&self, project_id: &str) -> Result<i64>;
    async fn project_revenue_balance(&self, project_id: &str) -> Result<i64>;
    async fn marketing_fee_accrued_total(&self) -> Result<i64>;

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>>;
    /// Every non-archived project, consulted by the autonomy loop (C11)
    /// to drive per-project reconciliation each run.
    async fn list_active_projects(&self) -> Result<Vec<Project>>;
}

/// C3 — dedup store backing the observed-transfer indexer.
#[async_trait]
pub trait IndexerStore: Send + Sync {
    async fn insert_transfers(&self, transfers: Vec<ObservedUsdcTransfer>, cursor_key: &str, chain_id: i64, to_block: i64) -> Result<usize>;
    async fn get_cursor(&self, cursor_key: &str, chain_id: i64) -> Result<Option<IndexerCursor>>;
}

/// C4 — append-only reconciliation reports, read back by `latest`.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    async fn insert_report(&self, report: ReconciliationReport) -> Result<ReconciliationReport>;
    async fn latest_report(&self, scope: ReconciliationScope, scope_id: Option<&str>, profit_month_id: Option<&str>) -> Result<Option<ReconciliationReport>>;
}

/// C5 — monthly settlement rows and the distribution lifecycle tables.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn insert_settlement(&self, settlement: Settlement) -> Result<Settlement>;
    async fn latest_settlement(&self, profit_month_id: &str) -> Result<Option<Settlement>>;

    async fn insert_distribution_creation(&self, row: DistributionCreation) -> Result<Appended<DistributionCreation>>;
    async fn get_distribution_creation(&self, profit_month_id: &str) -> Result<Option<DistributionCreation>>;
    async fn insert_distribution_execution(&self, row: DistributionExecution) -> Result<DistributionExecution>;
    async fn insert_dividend_payout(&self, row: DividendPayout) -> Result<DividendPayout>;
}

/// C7 — the transaction outbox. Claim/complete semantics are described in
/// spec §4.7; `claim_next` returns `Ok(None)` with no candidate, and an
/// implementation detail (`race_lost`) is surfaced by returning a fresh
/// read rather than an error, since losing a race is not exceptional.
#[async_trait]
pub trait TxOutboxStore: Send + Sync {
    async fn enqueue(&self, task: TxOutboxTask) -> Result<Appended<TxOutboxTask>>;
    async fn claim_next(&self, worker_id: &str, lock_ttl_seconds: i64) -> Result<ClaimOutcome<TxOutboxTask>>;
    async fn mark_succeeded(&self, task_id: &str, locked_by: &str, tx_hash: Option<String>) -> Result<bool>;
    async fn mark_failed(&self, task_id: &str, locked_by: &str, error: &str) -> Result<bool>;
    async fn mark_blocked(&self, task_id: &str, locked_by: &str, error: &str) -> Result<bool>;
    async fn get_by_idempotency_key(&self, idempotency_key: &str) -> Result<Option<TxOutboxTask>>;
    async fn sum_amount_by_type_and_statuses(&self, task_type_label: &str, statuses: &[&str]) -> Result<i64>;
}

/// C8 — the git outbox; same claim/complete shape as `TxOutboxStore`.
#[async_trait]
pub trait GitOutboxStore: Send + Sync {
    async fn enqueue(&self, task: GitOutboxTask) -> Result<Appended<GitOutboxTask>>;
    async fn claim_next(&self, worker_id: &str, lock_ttl_seconds: i64) -> Result<ClaimOutcome<GitOutboxTask>>;
    async fn mark_succeeded(&self, task_id: &str, locked_by: &str, branch_name: Option<String>, commit_sha: Option<String>, pr_url: Option<String>) -> Result<bool>;
    async fn mark_failed(&self, task_id: &str, locked_by: &str, error: &str) -> Result<bool>;
    async fn get_by_idempotency_key(&self, idempotency_key: &str) -> Result<Option<GitOutboxTask>>;
}

/// Result of a claim-next attempt (§4.7 step 1).
#[derive(Debug, Clone)]
pub enum ClaimOutcome<T> {
    Claimed(T),
    NoTasks,
    RaceLost,
}

/// C10 — the replay guard. Insertion failing with a unique-violation is a
/// replay, not a store error; implementations translate that into `false`.
#[async_trait]
pub trait NonceStore: Send + Sync {
    async fn insert_nonce(&self, request_id: &str) -> Result<bool>;
}

/// C12 — append-only audit trail, queried only for tests/inspection here;
/// production writes happen inline with the ledger/gate calls they record.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry>;
    async fn list_by_request_id(&self, request_id: &str) -> Result<Vec<AuditEntry>>;
}

/// Minimal bounty store backing the in-scope `mark-paid` transition only.
#[async_trait]
pub trait BountyStore: Send + Sync {
    async fn get_bounty(&self, bounty_id: &str) -> Result<Option<Bounty>>;
    async fn mark_paid(&self, bounty_id: &str) -> Result<bool>;
}
