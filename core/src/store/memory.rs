//! In-memory test doubles for the `store` traits, gated behind the
//! `test-doubles` feature. Mirrors the shape (not the durability) of the
//! Postgres-backed implementation so unit tests can exercise C2-C12
//! logic without a database.

use super::{Appended, ClaimOutcome};
use crate::error::Result;
use crate::models::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    pub revenue_events: Mutex<Vec<RevenueEvent>>,
    pub expense_events: Mutex<Vec<ExpenseEvent>>,
    pub capital_events: Mutex<Vec<ProjectCapitalEvent>>,
    pub marketing_fee_events: Mutex<Vec<MarketingFeeAccrualEvent>>,
    pub projects: Mutex<HashMap<String, Project>>,
    pub transfers: Mutex<Vec<ObservedUsdcTransfer>>,
    pub cursors: Mutex<HashMap<(String, i64), IndexerCursor>>,
    pub reconciliation_reports: Mutex<Vec<ReconciliationReport>>,
    pub settlements: Mutex<Vec<Settlement>>,
    pub distribution_creations: Mutex<Vec<DistributionCreation>>,
    pub distribution_executions: Mutex<Vec<DistributionExecution>>,
    pub dividend_payouts: Mutex<Vec<DividendPayout>>,
    pub tx_outbox: Mutex<Vec<TxOutboxTask>>,
    pub git_outbox: Mutex<Vec<GitOutboxTask>>,
    pub nonces: Mutex<Vec<String>>,
    pub audit_log: Mutex<Vec<AuditEntry>>,
    pub bounties: Mutex<HashMap<String, Bounty>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_project(&self, project: Project) {
        self.projects.lock().unwrap().insert(project.project_id.clone(), project);
    }

    pub fn seed_bounty(&self, bounty: Bounty) {
        self.bounties.lock().unwrap().insert(bounty.bounty_id.clone(), bounty);
    }
}

#[async_trait]
impl super::LedgerStore for MemoryStore {
    async fn append_revenue_event(&self, event: RevenueEvent, audit: AuditEntry) -> Result<Appended<RevenueEvent>> {
        let mut events = self.revenue_events.lock().unwrap();
        if let Some(existing) = events.iter().find(|e| e.idempotency_key == event.idempotency_key) {
            return Ok(Appended { row: existing.clone(), created: false });
        }
        events.push(event.clone());
        self.audit_log.lock().unwrap().push(audit);
        Ok(Appended { row: event, created: true })
    }

    async fn append_expense_event(&self, event: ExpenseEvent, audit: AuditEntry) -> Result<Appended<ExpenseEvent>> {
        let mut events = self.expense_events.lock().unwrap();
        if let Some(existing) = events.iter().find(|e| e.idempotency_key == event.idempotency_key) {
            return Ok(Appended { row: existing.clone(), created: false });
        }
        events.push(event.clone());
        self.audit_log.lock().unwrap().push(audit);
        Ok(Appended { row: event, created: true })
    }

    async fn append_project_capital_event(&self, event: ProjectCapitalEvent, audit: AuditEntry) -> Result<Appended<ProjectCapitalEvent>> {
        let mut events = self.capital_events.lock().unwrap();
        if let Some(existing) = events.iter().find(|e| e.idempotency_key == event.idempotency_key) {
            return Ok(Appended { row: existing.clone(), created: false });
        }
        events.push(event.clone());
        self.audit_log.lock().unwrap().push(audit);
        Ok(Appended { row: event, created: true })
    }

    async fn append_marketing_fee_accrual(&self, event: MarketingFeeAccrualEvent) -> Result<Appended<MarketingFeeAccrualEvent>> {
        let mut events = self.marketing_fee_events.lock().unwrap();
        if let Some(existing) = events.iter().find(|e| {
            e.chain_id == event.chain_id && e.tx_hash == event.tx_hash && e.log_index == event.log_index && e.to_address == event.to_address
        }) {
            return Ok(Appended { row: existing.clone(), created: false });
        }
        events.push(event.clone());
        Ok(Appended { row: event, created: true })
    }

    async fn revenue_sum_for_month(&self, profit_month_id: &str) -> Result<i64> {
        Ok(self.revenue_events.lock().unwrap().iter().filter(|e| e.profit_month_id == profit_month_id).map(|e| e.amount_micro_usdc).sum())
    }

    async fn expense_sum_for_month(&self, profit_month_id: &str) -> Result<i64> {
        Ok(self.expense_events.lock().unwrap().iter().filter(|e| e.profit_month_id == profit_month_id).map(|e| e.amount_micro_usdc).sum())
    }

    async fn project_capital_balance(&self, project_id: &str) -> Result<i64> {
        Ok(self.capital_events.lock().unwrap().iter().filter(|e| e.project_id == project_id).map(|e| e.delta_micro_usdc).sum())
    }

    async fn project_revenue_balance(&self, project_id: &str) -> Result<i64> {
        Ok(self.revenue_events.lock().unwrap().iter().filter(|e| e.project_id.as_deref() == Some(project_id)).map(|e| e.amount_micro_usdc).sum())
    }

    async fn marketing_fee_accrued_total(&self) -> Result<i64> {
        Ok(self.marketing_fee_events.lock().unwrap().iter().map(|e| e.fee_micro_usdc).sum())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        Ok(self.projects.lock().unwrap().get(project_id).cloned())
    }

    async fn list_active_projects(&self) -> Result<Vec<Project>> {
        Ok(self.projects.lock().unwrap().values().filter(|p| !matches!(p.status, crate::models::ProjectStatus::Archived)).cloned().collect())
    }
}

#[async_trait]
impl super::IndexerStore for MemoryStore {
    async fn insert_transfers(&self, transfers: Vec<ObservedUsdcTransfer>, cursor_key: &str, chain_id: i64, to_block: i64) -> Result<usize> {
        let mut store = self.transfers.lock().unwrap();
        let mut inserted = 0;
        for transfer in transfers {
            let exists = store.iter().any(|t| t.chain_id == transfer.chain_id && t.tx_hash == transfer.tx_hash && t.log_index == transfer.log_index);
            if !exists {
                store.push(transfer);
                inserted += 1;
            }
        }
        let mut cursors = self.cursors.lock().unwrap();
        let key = (cursor_key.to_string(), chain_id);
        let current = cursors.get(&key).map(|c| c.last_block_number).unwrap_or(0);
        cursors.insert(key.clone(), IndexerCursor { cursor_key: cursor_key.to_string(), chain_id, last_block_number: current.max(to_block) });
        Ok(inserted)
    }

    async fn get_cursor(&self, cursor_key: &str, chain_id: i64) -> Result<Option<IndexerCursor>> {
        Ok(self.cursors.lock().unwrap().get(&(cursor_key.to_string(), chain_id)).cloned())
    }
}

#[async_trait]
impl super::ReconciliationStore for MemoryStore {
    async fn insert_report(&self, report: ReconciliationReport) -> Result<ReconciliationReport> {
        self.reconciliation_reports.lock().unwrap().push(report.clone());
        Ok(report)
    }

    async fn latest_report(&self, scope: ReconciliationScope, scope_id: Option<&str>, profit_month_id: Option<&str>) -> Result<Option<ReconciliationReport>> {
        let reports = self.reconciliation_reports.lock().unwrap();
        Ok(reports
            .iter()
            .filter(|r| r.scope == scope && r.scope_id.as_deref() == scope_id && r.profit_month_id.as_deref() == profit_month_id)
            .max_by_key(|r| r.computed_at)
            .cloned())
    }
}

#[async_trait]
impl super::SettlementStore for MemoryStore {
    async fn insert_settlement(&self, settlement: Settlement) -> Result<Settlement> {
        self.settlements.lock().unwrap().push(settlement.clone());
        Ok(settlement)
    }

    async fn latest_settlement(&self, profit_month_id: &str) -> Result<Option<Settlement>> {
        Ok(self.settlements.lock().unwrap().iter().filter(|s| s.profit_month_id == profit_month_id).max_by_key(|s| s.computed_at).cloned())
    }

    async fn insert_distribution_creation(&self, row: DistributionCreation) -> Result<Appended<DistributionCreation>> {
        let mut rows = self.distribution_creations.lock().unwrap();
        if let Some(existing) = rows.iter().find(|r| r.idempotency_key == row.idempotency_key) {
            return Ok(Appended { row: existing.clone(), created: false });
        }
        rows.push(row.clone());
        Ok(Appended { row, created: true })
    }

    async fn get_distribution_creation(&self, profit_month_id: &str) -> Result<Option<DistributionCreation>> {
        Ok(self.distribution_creations.lock().unwrap().iter().find(|r| r.profit_month_id == profit_month_id).cloned())
    }

    async fn insert_distribution_execution(&self, row: DistributionExecution) -> Result<DistributionExecution> {
        self.distribution_executions.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn insert_dividend_payout(&self, row: DividendPayout) -> Result<DividendPayout> {
        self.dividend_payouts.lock().unwrap().push(row.clone());
        Ok(row)
    }
}

fn claim_next_generic<T: Clone>(
    rows: &mut [T],
    worker_id: &str,
    lock_ttl_seconds: i64,
    status_of: impl Fn(&T) -> OutboxStatus,
    locked_at_of: impl Fn(&T) -> Option<chrono::DateTime<chrono::Utc>>,
    set_claimed: impl Fn(&mut T, &str, chrono::DateTime<chrono::Utc>),
) -> ClaimOutcome<T> {
    let now = chrono::Utc::now();
    if let Some(row) = rows.iter_mut().find(|r| status_of(r) == OutboxStatus::Pending) {
        set_claimed(row, worker_id, now);
        return ClaimOutcome::Claimed(row.clone());
    }
    if let Some(row) = rows.iter_mut().find(|r| {
        status_of(r) == OutboxStatus::Processing && locked_at_of(r).map(|t| (now - t).num_seconds() >= lock_ttl_seconds).unwrap_or(false)
    }) {
        set_claimed(row, worker_id, now);
        return ClaimOutcome::Claimed(row.clone());
    }
    ClaimOutcome::NoTasks
}

#[async_trait]
impl super::TxOutboxStore for MemoryStore {
    async fn enqueue(&self, task: TxOutboxTask) -> Result<Appended<TxOutboxTask>> {
        let mut tasks = self.tx_outbox.lock().unwrap();
        if let Some(existing) = tasks.iter().find(|t| t.idempotency_key == task.idempotency_key && !t.status.is_terminal()) {
            return Ok(Appended { row: existing.clone(), created: false });
        }
        tasks.push(task.clone());
        Ok(Appended { row: task, created: true })
    }

    async fn claim_next(&self, worker_id: &str, lock_ttl_seconds: i64) -> Result<ClaimOutcome<TxOutboxTask>> {
        let mut tasks = self.tx_outbox.lock().unwrap();
        Ok(claim_next_generic(
            &mut tasks,
            worker_id,
            lock_ttl_seconds,
            |t| t.status,
            |t| t.locked_at,
            |t, worker, now| {
                t.status = OutboxStatus::Processing;
                t.locked_by = Some(worker.to_string());
                t.locked_at = Some(now);
                t.attempts += 1;
            },
        ))
    }

    async fn mark_succeeded(&self, task_id: &str, locked_by: &str, tx_hash: Option<String>) -> Result<bool> {
        let mut tasks = self.tx_outbox.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| t.task_id == task_id && t.locked_by.as_deref() == Some(locked_by)) {
            task.status = OutboxStatus::Succeeded;
            task.tx_hash = tx_hash;
            return Ok(true);
        }
        Ok(false)
    }

    async fn mark_failed(&self, task_id: &str, locked_by: &str, error: &str) -> Result<bool> {
        let mut tasks = self.tx_outbox.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| t.task_id == task_id && t.locked_by.as_deref() == Some(locked_by)) {
            task.status = OutboxStatus::Failed;
            task.last_error_hint = Some(error.to_string());
            return Ok(true);
        }
        Ok(false)
    }

    async fn mark_blocked(&self, task_id: &str, locked_by: &str, error: &str) -> Result<bool> {
        let mut tasks = self.tx_outbox.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| t.task_id == task_id && t.locked_by.as_deref() == Some(locked_by)) {
            task.status = OutboxStatus::Blocked;
            task.last_error_hint = Some(error.to_string());
            return Ok(true);
        }
        Ok(false)
    }

    async fn get_by_idempotency_key(&self, idempotency_key: &str) -> Result<Option<TxOutboxTask>> {
        Ok(self.tx_outbox.lock().unwrap().iter().find(|t| t.idempotency_key == idempotency_key).cloned())
    }

    async fn sum_amount_by_type_and_statuses(&self, task_type_label: &str, statuses: &[&str]) -> Result<i64> {
        let tasks = self.tx_outbox.lock().unwrap();
        let sum = tasks
            .iter()
            .filter(|t| tx_task_type_label(t.task_type) == task_type_label)
            .filter(|t| statuses.iter().any(|s| s.eq_ignore_ascii_case(status_label(t.status))))
            .filter_map(|t| t.payload.get("amount_micro_usdc").and_then(|v| v.as_i64()))
            .sum();
        Ok(sum)
    }
}

fn status_label(status: OutboxStatus) -> &'static str {
    match status {
        OutboxStatus::Pending => "pending",
        OutboxStatus::Processing => "processing",
        OutboxStatus::Succeeded => "succeeded",
        OutboxStatus::Failed => "failed",
        OutboxStatus::Blocked => "blocked",
    }
}

fn tx_task_type_label(task_type: TxTaskType) -> &'static str {
    match task_type {
        TxTaskType::DepositProfit => "deposit_profit",
        TxTaskType::DepositMarketingFee => "deposit_marketing_fee",
        TxTaskType::CreateDistribution => "create_distribution",
        TxTaskType::ExecuteDistribution => "execute_distribution",
        TxTaskType::UsdcTransfer => "usdc_transfer",
    }
}

#[async_trait]
impl super::GitOutboxStore for MemoryStore {
    async fn enqueue(&self, task: GitOutboxTask) -> Result<Appended<GitOutboxTask>> {
        let mut tasks = self.git_outbox.lock().unwrap();
        if let Some(existing) = tasks.iter().find(|t| t.idempotency_key == task.idempotency_key) {
            return Ok(Appended { row: existing.clone(), created: false });
        }
        tasks.push(task.clone());
        Ok(Appended { row: task, created: true })
    }

    async fn claim_next(&self, worker_id: &str, lock_ttl_seconds: i64) -> Result<ClaimOutcome<GitOutboxTask>> {
        let mut tasks = self.git_outbox.lock().unwrap();
        Ok(claim_next_generic(
            &mut tasks,
            worker_id,
            lock_ttl_seconds,
            |t| t.status,
            |t| t.locked_at,
            |t, worker, now| {
                t.status = OutboxStatus::Processing;
                t.locked_by = Some(worker.to_string());
                t.locked_at = Some(now);
                t.attempts += 1;
            },
        ))
    }

    async fn mark_succeeded(&self, task_id: &str, locked_by: &str, branch_name: Option<String>, commit_sha: Option<String>, pr_url: Option<String>) -> Result<bool> {
        let mut tasks = self.git_outbox.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| t.task_id == task_id && t.locked_by.as_deref() == Some(locked_by)) {
            task.status = OutboxStatus::Succeeded;
            task.branch_name = branch_name;
            task.commit_sha = commit_sha;
            task.result_json = pr_url.map(|url| serde_json::json!({ "pr_url": url }));
            return Ok(true);
        }
        Ok(false)
    }

    async fn mark_failed(&self, task_id: &str, locked_by: &str, error: &str) -> Result<bool> {
        let mut tasks = self.git_outbox.lock().unwrap();
        if let Some(task) = tasks.iter_mut().find(|t| t.task_id == task_id && t.locked_by.as_deref() == Some(locked_by)) {
            task.status = OutboxStatus::Failed;
            task.last_error_hint = Some(error.to_string());
            return Ok(true);
        }
        Ok(false)
    }

    async fn get_by_idempotency_key(&self, idempotency_key: &str) -> Result<Option<GitOutboxTask>> {
        Ok(self.git_outbox.lock().unwrap().iter().find(|t| t.idempotency_key == idempotency_key).cloned())
    }
}

#[async_trait]
impl super::NonceStore for MemoryStore {
    async fn insert_nonce(&self, request_id: &str) -> Result<bool> {
        let mut nonces = self.nonces.lock().unwrap();
        if nonces.iter().any(|n| n == request_id) {
            return Ok(false);
        }
        nonces.push(request_id.to_string());
        Ok(true)
    }
}

#[async_trait]
impl super::AuditStore for MemoryStore {
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry> {
        self.audit_log.lock().unwrap().push(entry.clone());
        Ok(entry)
    }

    async fn list_by_request_id(&self, request_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(self.audit_log.lock().unwrap().iter().filter(|e| e.request_id.as_deref() == Some(request_id)).cloned().collect())
    }
}

#[async_trait]
impl super::BountyStore for MemoryStore {
    async fn get_bounty(&self, bounty_id: &str) -> Result<Option<Bounty>> {
        Ok(self.bounties.lock().unwrap().get(bounty_id).cloned())
    }

    async fn mark_paid(&self, bounty_id: &str) -> Result<bool> {
        let mut bounties = self.bounties.lock().unwrap();
        if let Some(bounty) = bounties.get_mut(bounty_id) {
            bounty.status = BountyStatus::Paid;
            return Ok(true);
        }
        Ok(false)
    }
}
