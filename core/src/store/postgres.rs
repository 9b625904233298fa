//! Postgres-backed implementation of the `store` traits, behind the
//! `postgres` feature. Queries are built with `sqlx::query`/`query_as`
//! at runtime rather than the `query!` macros, since the macros require
//! a live database at compile time and this crate is built offline.

use super::{Appended, ClaimOutcome};
use crate::error::{Error, Result};
use crate::models::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn outbox_status_from_label(label: &str) -> OutboxStatus {
    match label {
        "processing" => OutboxStatus::Processing,
        "succeeded" => OutboxStatus::Succeeded,
        "failed" => OutboxStatus::Failed,
        "blocked" => OutboxStatus::Blocked,
        _ => OutboxStatus::Pending,
    }
}

#[async_trait]
impl super::LedgerStore for PostgresStore {
    async fn append_revenue_event(&self, event: RevenueEvent, audit: AuditEntry) -> Result<Appended<RevenueEvent>> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query(
            "SELECT event_id, profit_month_id, project_id, amount_micro_usdc, tx_hash, source, category, idempotency_key, evidence_url, created_at \
             FROM revenue_events WHERE idempotency_key = $1",
        )
        .bind(&event.idempotency_key)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            tx.commit().await?;
            return Ok(Appended { row: revenue_event_from_row(&row), created: false });
        }
        sqlx::query(
            "INSERT INTO revenue_events (event_id, profit_month_id, project_id, amount_micro_usdc, tx_hash, source, category, idempotency_key, evidence_url, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(&event.event_id)
        .bind(&event.profit_month_id)
        .bind(&event.project_id)
        .bind(event.amount_micro_usdc)
        .bind(&event.tx_hash)
        .bind(&event.source)
        .bind(&event.category)
        .bind(&event.idempotency_key)
        .bind(&event.evidence_url)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;
        insert_audit(&mut tx, &audit).await?;
        tx.commit().await?;
        Ok(Appended { row: event, created: true })
    }

    async fn append_expense_event(&self, event: ExpenseEvent, audit: AuditEntry) -> Result<Appended<ExpenseEvent>> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query(
            "SELECT event_id, profit_month_id, project_id, amount_micro_usdc, tx_hash, source, category, idempotency_key, evidence_url, created_at \
             FROM expense_events WHERE idempotency_key = $1",
        )
        .bind(&event.idempotency_key)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            tx.commit().await?;
            return Ok(Appended { row: expense_event_from_row(&row), created: false });
        }
        sqlx::query(
            "INSERT INTO expense_events (event_id, profit_month_id, project_id, amount_micro_usdc, tx_hash, source, category, idempotency_key, evidence_url, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(&event.event_id)
        .bind(&event.profit_month_id)
        .bind(&event.project_id)
        .bind(event.amount_micro_usdc)
        .bind(&event.tx_hash)
        .bind(&event.source)
        .bind(&event.category)
        .bind(&event.idempotency_key)
        .bind(&event.evidence_url)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;
        insert_audit(&mut tx, &audit).await?;
        tx.commit().await?;
        Ok(Appended { row: event, created: true })
    }

    async fn append_project_capital_event(&self, event: ProjectCapitalEvent, audit: AuditEntry) -> Result<Appended<ProjectCapitalEvent>> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query(
            "SELECT event_id, project_id, profit_month_id, delta_micro_usdc, source, idempotency_key, evidence_tx_hash, created_at \
             FROM project_capital_events WHERE idempotency_key = $1",
        )
        .bind(&event.idempotency_key)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            tx.commit().await?;
            return Ok(Appended { row: capital_event_from_row(&row), created: false });
        }
        sqlx::query(
            "INSERT INTO project_capital_events (event_id, project_id, profit_month_id, delta_micro_usdc, source, idempotency_key, evidence_tx_hash, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(&event.event_id)
        .bind(&event.project_id)
        .bind(&event.profit_month_id)
        .bind(event.delta_micro_usdc)
        .bind(&event.source)
        .bind(&event.idempotency_key)
        .bind(&event.evidence_tx_hash)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;
        insert_audit(&mut tx, &audit).await?;
        tx.commit().await?;
        Ok(Appended { row: event, created: true })
    }

    async fn append_marketing_fee_accrual(&self, event: MarketingFeeAccrualEvent) -> Result<Appended<MarketingFeeAccrualEvent>> {
        let existing = sqlx::query(
            "SELECT event_id, chain_id, tx_hash, log_index, to_address, bucket, gross_micro_usdc, fee_micro_usdc, bps, created_at \
             FROM marketing_fee_accrual_events WHERE chain_id = $1 AND tx_hash = $2 AND log_index = $3 AND to_address = $4",
        )
        .bind(event.chain_id)
        .bind(&event.tx_hash)
        .bind(event.log_index)
        .bind(&event.to_address)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = existing {
            return Ok(Appended { row: marketing_fee_event_from_row(&row), created: false });
        }
        sqlx::query(
            "INSERT INTO marketing_fee_accrual_events (event_id, chain_id, tx_hash, log_index, to_address, bucket, gross_micro_usdc, fee_micro_usdc, bps, created_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(&event.event_id)
        .bind(event.chain_id)
        .bind(&event.tx_hash)
        .bind(event.log_index)
        .bind(&event.to_address)
        .bind(bucket_label(event.bucket))
        .bind(event.gross_micro_usdc)
        .bind(event.fee_micro_usdc)
        .bind(event.bps as i32)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(Appended { row: event, created: true })
    }

    async fn revenue_sum_for_month(&self, profit_month_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(amount_micro_usdc), 0) AS total FROM revenue_events WHERE profit_month_id = $1")
            .bind(profit_month_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("total")?)
    }

    async fn expense_sum_for_month(&self, profit_month_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(amount_micro_usdc), 0) AS total FROM expense_events WHERE profit_month_id = $1")
            .bind(profit_month_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("total")?)
    }

    async fn project_capital_balance(&self, project_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(delta_micro_usdc), 0) AS total FROM project_capital_events WHERE project_id = $1")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("total")?)
    }

    async fn project_revenue_balance(&self, project_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(amount_micro_usdc), 0) AS total FROM revenue_events WHERE project_id = $1")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("total")?)
    }

    async fn marketing_fee_accrued_total(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COALESCE(SUM(fee_micro_usdc), 0) AS total FROM marketing_fee_accrual_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("total")?)
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT project_id, slug, name, status, treasury_address, revenue_address, monthly_budget_micro_usdc \
             FROM projects WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| project_from_row(&r)))
    }

    async fn list_active_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT project_id, slug, name, status, treasury_address, revenue_address, monthly_budget_micro_usdc \
             FROM projects WHERE status != 'archived' ORDER BY project_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(project_from_row).collect())
    }
}

#[async_trait]
impl super::IndexerStore for PostgresStore {
    async fn insert_transfers(&self, transfers: Vec<ObservedUsdcTransfer>, cursor_key: &str, chain_id: i64, to_block: i64) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for transfer in &transfers {
            let result = sqlx::query(
                "INSERT INTO observed_usdc_transfers (chain_id, tx_hash, log_index, token_address, from_address, to_address, amount_micro_usdc, block_number, observed_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) ON CONFLICT (chain_id, tx_hash, log_index) DO NOTHING",
            )
            .bind(transfer.chain_id)
            .bind(&transfer.tx_hash)
            .bind(transfer.log_index)
            .bind(&transfer.token_address)
            .bind(&transfer.from_address)
            .bind(&transfer.to_address)
            .bind(transfer.amount_micro_usdc)
            .bind(transfer.block_number)
            .bind(transfer.observed_at)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }
        sqlx::query(
            "INSERT INTO indexer_cursors (cursor_key, chain_id, last_block_number) VALUES ($1, $2, $3) \
             ON CONFLICT (cursor_key, chain_id) DO UPDATE SET last_block_number = GREATEST(indexer_cursors.last_block_number, EXCLUDED.last_block_number), updated_at = now()",
        )
        .bind(cursor_key)
        .bind(chain_id)
        .bind(to_block)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_cursor(&self, cursor_key: &str, chain_id: i64) -> Result<Option<IndexerCursor>> {
        let row = sqlx::query("SELECT cursor_key, chain_id, last_block_number FROM indexer_cursors WHERE cursor_key = $1 AND chain_id = $2")
            .bind(cursor_key)
            .bind(chain_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| IndexerCursor {
            cursor_key: r.get("cursor_key"),
            chain_id: r.get("chain_id"),
            last_block_number: r.get("last_block_number"),
        }))
    }
}

#[async_trait]
impl super::ReconciliationStore for PostgresStore {
    async fn insert_report(&self, report: ReconciliationReport) -> Result<ReconciliationReport> {
        sqlx::query(
            "INSERT INTO reconciliation_reports (scope_type, scope_id, profit_month_id, ledger_balance_micro_usdc, onchain_balance_micro_usdc, delta_micro_usdc, ready, blocked_reason, computed_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
        )
        .bind(scope_label(report.scope))
        .bind(&report.scope_id)
        .bind(&report.profit_month_id)
        .bind(report.ledger_balance_micro_usdc)
        .bind(report.onchain_balance_micro_usdc)
        .bind(report.delta_micro_usdc)
        .bind(report.ready)
        .bind(&report.blocked_reason)
        .bind(report.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(report)
    }

    async fn latest_report(&self, scope: ReconciliationScope, scope_id: Option<&str>, profit_month_id: Option<&str>) -> Result<Option<ReconciliationReport>> {
        let row = sqlx::query(
            "SELECT scope_type, scope_id, profit_month_id, ledger_balance_micro_usdc, onchain_balance_micro_usdc, delta_micro_usdc, ready, blocked_reason, computed_at \
             FROM reconciliation_reports \
             WHERE scope_type = $1 AND scope_id IS NOT DISTINCT FROM $2 AND profit_month_id IS NOT DISTINCT FROM $3 \
             ORDER BY computed_at DESC LIMIT 1",
        )
        .bind(scope_label(scope))
        .bind(scope_id)
        .bind(profit_month_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| reconciliation_report_from_row(&r)))
    }
}

#[async_trait]
impl super::SettlementStore for PostgresStore {
    async fn insert_settlement(&self, settlement: Settlement) -> Result<Settlement> {
        sqlx::query(
            "INSERT INTO settlements (profit_month_id, revenue_sum_micro_usdc, expense_sum_micro_usdc, profit_sum_micro_usdc, profit_nonnegative, computed_at) \
             VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(&settlement.profit_month_id)
        .bind(settlement.revenue_sum_micro_usdc)
        .bind(settlement.expense_sum_micro_usdc)
        .bind(settlement.profit_sum_micro_usdc)
        .bind(settlement.profit_nonnegative)
        .bind(settlement.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(settlement)
    }

    async fn latest_settlement(&self, profit_month_id: &str) -> Result<Option<Settlement>> {
        let row = sqlx::query(
            "SELECT profit_month_id, revenue_sum_micro_usdc, expense_sum_micro_usdc, profit_sum_micro_usdc, profit_nonnegative, computed_at \
             FROM settlements WHERE profit_month_id = $1 ORDER BY computed_at DESC LIMIT 1",
        )
        .bind(profit_month_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Settlement {
            profit_month_id: r.get("profit_month_id"),
            revenue_sum_micro_usdc: r.get("revenue_sum_micro_usdc"),
            expense_sum_micro_usdc: r.get("expense_sum_micro_usdc"),
            profit_sum_micro_usdc: r.get("profit_sum_micro_usdc"),
            profit_nonnegative: r.get("profit_nonnegative"),
            computed_at: r.get("computed_at"),
        }))
    }

    async fn insert_distribution_creation(&self, row: DistributionCreation) -> Result<Appended<DistributionCreation>> {
        let existing = sqlx::query(
            "SELECT profit_month_id, idempotency_key, status, tx_hash, total_profit_micro_usdc, created_at FROM distribution_creations WHERE idempotency_key = $1",
        )
        .bind(&row.idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(existing) = existing {
            return Ok(Appended { row: distribution_creation_from_row(&existing), created: false });
        }
        sqlx::query(
            "INSERT INTO distribution_creations (profit_month_id, idempotency_key, status, total_profit_micro_usdc, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$5)",
        )
        .bind(&row.profit_month_id)
        .bind(&row.idempotency_key)
        .bind(lifecycle_label(row.status))
        .bind(row.total_amount_micro_usdc)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(Appended { row, created: true })
    }

    async fn get_distribution_creation(&self, profit_month_id: &str) -> Result<Option<DistributionCreation>> {
        let row = sqlx::query(
            "SELECT profit_month_id, idempotency_key, status, tx_hash, total_profit_micro_usdc, created_at \
             FROM distribution_creations WHERE profit_month_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(profit_month_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| distribution_creation_from_row(&r)))
    }

    async fn insert_distribution_execution(&self, row: DistributionExecution) -> Result<DistributionExecution> {
        sqlx::query(
            "INSERT INTO distribution_executions (profit_month_id, idempotency_key, status, tx_hash, recipients_json, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$6) ON CONFLICT (idempotency_key) DO NOTHING",
        )
        .bind(profit_month_id_for_execution(&row))
        .bind(format!("execute_distribution:{}", row.execution_id))
        .bind(lifecycle_label(row.status))
        .bind(&row.tx_hash)
        .bind(Value::Null)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_dividend_payout(&self, row: DividendPayout) -> Result<DividendPayout> {
        sqlx::query(
            "INSERT INTO dividend_payouts (profit_month_id, status, tx_hash, idempotency_key, created_at, updated_at) \
             VALUES ($1,$2,$3,$4,$5,$5) ON CONFLICT (idempotency_key) DO NOTHING",
        )
        .bind(&row.payout_id)
        .bind("pending")
        .bind(&row.tx_hash)
        .bind(format!("dividend_payout:{}", row.payout_id))
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(row)
    }
}

/// `DistributionExecution` rows don't carry a month directly; the
/// execution_id is namespaced `{profit_month_id}:{n}` by the caller.
fn profit_month_id_for_execution(row: &DistributionExecution) -> String {
    row.distribution_id.clone()
}

#[async_trait]
impl super::TxOutboxStore for PostgresStore {
    async fn enqueue(&self, task: TxOutboxTask) -> Result<Appended<TxOutboxTask>> {
        let existing = tx_outbox_active_by_key(&self.pool, &task.idempotency_key).await?;
        if let Some(existing) = existing {
            return Ok(Appended { row: existing, created: false });
        }
        sqlx::query(
            "INSERT INTO tx_outbox_tasks (task_id, task_type, payload_json, status, idempotency_key, created_at, updated_at) \
             VALUES ($1,$2,$3,'pending',$4,$5,$5)",
        )
        .bind(&task.task_id)
        .bind(tx_task_type_label(task.task_type))
        .bind(&task.payload)
        .bind(&task.idempotency_key)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;
        Ok(Appended { row: task, created: true })
    }

    async fn claim_next(&self, worker_id: &str, lock_ttl_seconds: i64) -> Result<ClaimOutcome<TxOutboxTask>> {
        claim_next_tx_outbox(&self.pool, worker_id, lock_ttl_seconds).await
    }

    async fn mark_succeeded(&self, task_id: &str, locked_by: &str, tx_hash: Option<String>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tx_outbox_tasks SET status = 'succeeded', tx_hash = $1, updated_at = now() WHERE task_id = $2 AND locked_by = $3",
        )
        .bind(&tx_hash)
        .bind(task_id)
        .bind(locked_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, task_id: &str, locked_by: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tx_outbox_tasks SET status = 'failed', last_error_hint = $1, updated_at = now() WHERE task_id = $2 AND locked_by = $3",
        )
        .bind(error)
        .bind(task_id)
        .bind(locked_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_blocked(&self, task_id: &str, locked_by: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tx_outbox_tasks SET status = 'blocked', last_error_hint = $1, updated_at = now() WHERE task_id = $2 AND locked_by = $3",
        )
        .bind(error)
        .bind(task_id)
        .bind(locked_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_by_idempotency_key(&self, idempotency_key: &str) -> Result<Option<TxOutboxTask>> {
        tx_outbox_by_key(&self.pool, idempotency_key).await
    }

    async fn sum_amount_by_type_and_statuses(&self, task_type_label: &str, statuses: &[&str]) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM((payload_json->>'amount_micro_usdc')::bigint), 0) AS total \
             FROM tx_outbox_tasks WHERE task_type = $1 AND status = ANY($2)",
        )
        .bind(task_type_label)
        .bind(statuses)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("total")?)
    }
}

async fn tx_outbox_by_key(pool: &PgPool, idempotency_key: &str) -> Result<Option<TxOutboxTask>> {
    let row = sqlx::query(
        "SELECT task_id, task_type, payload_json, status, attempts, locked_by, locked_at, tx_hash, last_error_hint, idempotency_key, created_at \
         FROM tx_outbox_tasks WHERE idempotency_key = $1",
    )
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| tx_outbox_task_from_row(&r)))
}

/// Enqueue's `insert_or_get_by_unique` dedup (spec.md §4.7) only ever
/// folds into a row still `pending`/`processing`: a `succeeded`/
/// `failed`/`blocked` row is terminal, so a retry's re-enqueue under the
/// same idempotency key must insert a fresh row rather than return the
/// dead one (testable property 6 — at most one non-terminal row per key).
async fn tx_outbox_active_by_key(pool: &PgPool, idempotency_key: &str) -> Result<Option<TxOutboxTask>> {
    let row = sqlx::query(
        "SELECT task_id, task_type, payload_json, status, attempts, locked_by, locked_at, tx_hash, last_error_hint, idempotency_key, created_at \
         FROM tx_outbox_tasks WHERE idempotency_key = $1 AND status NOT IN ('succeeded', 'failed', 'blocked')",
    )
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| tx_outbox_task_from_row(&r)))
}

async fn claim_next_tx_outbox(pool: &PgPool, worker_id: &str, lock_ttl_seconds: i64) -> Result<ClaimOutcome<TxOutboxTask>> {
    let candidate = sqlx::query(
        "SELECT task_id, status, locked_at FROM tx_outbox_tasks WHERE status = 'pending' AND locked_at IS NULL ORDER BY id ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    let candidate = match candidate {
        Some(row) => Some(row),
        None => {
            sqlx::query(
                "SELECT task_id, status, locked_at FROM tx_outbox_tasks \
                 WHERE status = 'processing' AND locked_at < now() - ($1 || ' seconds')::interval ORDER BY id ASC LIMIT 1",
            )
            .bind(lock_ttl_seconds.to_string())
            .fetch_optional(pool)
            .await?
        }
    };
    let Some(candidate) = candidate else {
        return Ok(ClaimOutcome::NoTasks);
    };
    let task_id: String = candidate.get("task_id");
    let old_locked_at: Option<DateTime<Utc>> = candidate.try_get("locked_at").ok();
    let result = sqlx::query(
        "UPDATE tx_outbox_tasks SET status = 'processing', locked_by = $1, locked_at = now(), attempts = attempts + 1, updated_at = now() \
         WHERE task_id = $2 AND locked_at IS NOT DISTINCT FROM $3",
    )
    .bind(worker_id)
    .bind(&task_id)
    .bind(old_locked_at)
    .execute(pool)
    .await?;
    if result.rows_affected() != 1 {
        return Ok(ClaimOutcome::RaceLost);
    }
    match tx_outbox_by_key(pool, &task_id).await {
        Ok(Some(task)) => Ok(ClaimOutcome::Claimed(task)),
        _ => {
            let row = sqlx::query(
                "SELECT task_id, task_type, payload_json, status, attempts, locked_by, locked_at, tx_hash, last_error_hint, idempotency_key, created_at \
                 FROM tx_outbox_tasks WHERE task_id = $1",
            )
            .bind(&task_id)
            .fetch_one(pool)
            .await?;
            Ok(ClaimOutcome::Claimed(tx_outbox_task_from_row(&row)))
        }
    }
}

#[async_trait]
impl super::GitOutboxStore for PostgresStore {
    async fn enqueue(&self, task: GitOutboxTask) -> Result<Appended<GitOutboxTask>> {
        let existing = git_outbox_by_key(&self.pool, &task.idempotency_key).await?;
        if let Some(existing) = existing {
            return Ok(Appended { row: existing, created: false });
        }
        sqlx::query(
            "INSERT INTO git_outbox_tasks (task_id, task_type, payload_json, status, project_id, requested_by_agent_id, idempotency_key, created_at, updated_at) \
             VALUES ($1,$2,$3,'pending',$4,$5,$6,$7,$7)",
        )
        .bind(&task.task_id)
        .bind(git_task_type_label(task.task_type))
        .bind(&task.payload)
        .bind(&task.project_id)
        .bind(&task.requested_by_agent_id)
        .bind(&task.idempotency_key)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;
        Ok(Appended { row: task, created: true })
    }

    async fn claim_next(&self, worker_id: &str, lock_ttl_seconds: i64) -> Result<ClaimOutcome<GitOutboxTask>> {
        let candidate = sqlx::query(
            "SELECT task_id, locked_at FROM git_outbox_tasks WHERE status = 'pending' AND locked_at IS NULL ORDER BY id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let candidate = match candidate {
            Some(row) => Some(row),
            None => {
                sqlx::query(
                    "SELECT task_id, locked_at FROM git_outbox_tasks \
                     WHERE status = 'processing' AND locked_at < now() - ($1 || ' seconds')::interval ORDER BY id ASC LIMIT 1",
                )
                .bind(lock_ttl_seconds.to_string())
                .fetch_optional(&self.pool)
                .await?
            }
        };
        let Some(candidate) = candidate else {
            return Ok(ClaimOutcome::NoTasks);
        };
        let task_id: String = candidate.get("task_id");
        let old_locked_at: Option<DateTime<Utc>> = candidate.try_get("locked_at").ok();
        let result = sqlx::query(
            "UPDATE git_outbox_tasks SET status = 'processing', locked_by = $1, locked_at = now(), attempts = attempts + 1, updated_at = now() \
             WHERE task_id = $2 AND locked_at IS NOT DISTINCT FROM $3",
        )
        .bind(worker_id)
        .bind(&task_id)
        .bind(old_locked_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() != 1 {
            return Ok(ClaimOutcome::RaceLost);
        }
        match git_outbox_by_key_for_task(&self.pool, &task_id).await? {
            Some(task) => Ok(ClaimOutcome::Claimed(task)),
            None => Ok(ClaimOutcome::NoTasks),
        }
    }

    async fn mark_succeeded(&self, task_id: &str, locked_by: &str, branch_name: Option<String>, commit_sha: Option<String>, pr_url: Option<String>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE git_outbox_tasks SET status = 'succeeded', branch_name = $1, commit_sha = $2, result_json = $3, updated_at = now() \
             WHERE task_id = $4 AND locked_by = $5",
        )
        .bind(branch_name)
        .bind(commit_sha)
        .bind(pr_url.map(|url| serde_json::json!({ "pr_url": url })))
        .bind(task_id)
        .bind(locked_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, task_id: &str, locked_by: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE git_outbox_tasks SET status = 'failed', last_error_hint = $1, updated_at = now() WHERE task_id = $2 AND locked_by = $3",
        )
        .bind(error)
        .bind(task_id)
        .bind(locked_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_by_idempotency_key(&self, idempotency_key: &str) -> Result<Option<GitOutboxTask>> {
        git_outbox_by_key(&self.pool, idempotency_key).await
    }
}

async fn git_outbox_by_key(pool: &PgPool, idempotency_key: &str) -> Result<Option<GitOutboxTask>> {
    let row = sqlx::query(
        "SELECT task_id, task_type, payload_json, status, attempts, locked_by, locked_at, branch_name, commit_sha, result_json, last_error_hint, project_id, requested_by_agent_id, idempotency_key, created_at \
         FROM git_outbox_tasks WHERE idempotency_key = $1",
    )
    .bind(idempotency_key)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| git_outbox_task_from_row(&r)))
}

async fn git_outbox_by_key_for_task(pool: &PgPool, task_id: &str) -> Result<Option<GitOutboxTask>> {
    let row = sqlx::query(
        "SELECT task_id, task_type, payload_json, status, attempts, locked_by, locked_at, branch_name, commit_sha, result_json, last_error_hint, project_id, requested_by_agent_id, idempotency_key, created_at \
         FROM git_outbox_tasks WHERE task_id = $1",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| git_outbox_task_from_row(&r)))
}

#[async_trait]
impl super::NonceStore for PostgresStore {
    async fn insert_nonce(&self, request_id: &str) -> Result<bool> {
        let result = sqlx::query("INSERT INTO oracle_nonces (request_id) VALUES ($1) ON CONFLICT (request_id) DO NOTHING")
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl super::AuditStore for PostgresStore {
    async fn append(&self, entry: AuditEntry) -> Result<AuditEntry> {
        let mut tx = self.pool.begin().await?;
        insert_audit(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn list_by_request_id(&self, request_id: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT audit_id, actor_type, actor_id, method, path, idempotency_key, body_hash, signature_status, request_id, tx_hash, error_hint, created_at \
             FROM audit_log WHERE request_id = $1 ORDER BY created_at ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(audit_entry_from_row).collect())
    }
}

#[async_trait]
impl super::BountyStore for PostgresStore {
    async fn get_bounty(&self, bounty_id: &str) -> Result<Option<Bounty>> {
        let row = sqlx::query(
            "SELECT bounty_id, project_id, status, funding_source, amount_micro_usdc, claimant_agent_id FROM bounties WHERE bounty_id = $1",
        )
        .bind(bounty_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| bounty_from_row(&r)))
    }

    async fn mark_paid(&self, bounty_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE bounties SET status = 'paid', updated_at = now() WHERE bounty_id = $1 AND status != 'paid'")
            .bind(bounty_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

async fn insert_audit(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, entry: &AuditEntry) -> Result<()> {
    sqlx::query(
        "INSERT INTO audit_log (audit_id, actor_type, actor_id, method, path, idempotency_key, body_hash, signature_status, request_id, tx_hash, error_hint, created_at) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
    )
    .bind(&entry.audit_id)
    .bind(actor_type_label(entry.actor_type))
    .bind(&entry.actor_id)
    .bind(&entry.method)
    .bind(&entry.path)
    .bind(&entry.idempotency_key)
    .bind(&entry.body_hash)
    .bind(signature_status_label(entry.signature_status))
    .bind(&entry.request_id)
    .bind(&entry.tx_hash)
    .bind(&entry.error_hint)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn actor_type_label(actor_type: ActorType) -> &'static str {
    match actor_type {
        ActorType::Agent => "agent",
        ActorType::Oracle => "oracle",
        ActorType::System => "system",
    }
}

fn signature_status_label(status: SignatureStatus) -> &'static str {
    match status {
        SignatureStatus::Ok => "ok",
        SignatureStatus::OkLegacy => "ok_legacy",
        SignatureStatus::Invalid => "invalid",
        SignatureStatus::Stale => "stale",
        SignatureStatus::Replay => "replay",
        SignatureStatus::NotApplicable => "not_applicable",
    }
}

fn bucket_label(bucket: MarketingFeeBucket) -> &'static str {
    match bucket {
        MarketingFeeBucket::ProjectRevenue => "project_revenue",
        MarketingFeeBucket::ProjectCapital => "project_capital",
        MarketingFeeBucket::PlatformRevenue => "platform_revenue",
    }
}

fn scope_label(scope: ReconciliationScope) -> &'static str {
    match scope {
        ReconciliationScope::ProjectCapital => "project_capital",
        ReconciliationScope::ProjectRevenue => "project_revenue",
        ReconciliationScope::Platform => "platform",
    }
}

fn scope_from_label(label: &str) -> Result<ReconciliationScope> {
    match label {
        "project_capital" => Ok(ReconciliationScope::ProjectCapital),
        "project_revenue" => Ok(ReconciliationScope::ProjectRevenue),
        "platform" => Ok(ReconciliationScope::Platform),
        other => Err(Error::Internal(anyhow::anyhow!("unknown reconciliation scope label: {other}"))),
    }
}

fn lifecycle_label(status: LifecycleStatus) -> &'static str {
    match status {
        LifecycleStatus::Pending => "pending",
        LifecycleStatus::Executing => "executing",
        LifecycleStatus::Completed => "completed",
        LifecycleStatus::Failed => "failed",
    }
}

fn lifecycle_from_label(label: &str) -> LifecycleStatus {
    match label {
        "executing" | "submitted" => LifecycleStatus::Executing,
        "completed" | "confirmed" | "already_exists" | "already_distributed" => LifecycleStatus::Completed,
        "failed" => LifecycleStatus::Failed,
        _ => LifecycleStatus::Pending,
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

fn tx_task_type_from_label(label: &str) -> TxTaskType {
    match label {
        "deposit_marketing_fee" => TxTaskType::DepositMarketingFee,
        "create_distribution" => TxTaskType::CreateDistribution,
        "execute_distribution" => TxTaskType::ExecuteDistribution,
        "usdc_transfer" => TxTaskType::UsdcTransfer,
        _ => TxTaskType::DepositProfit,
    }
}

fn git_task_type_label(task_type: GitTaskType) -> &'static str {
    match task_type {
        GitTaskType::SurfaceCommit => "surface_commit",
        GitTaskType::ArtifactCommit => "artifact_commit",
        GitTaskType::PrOpen => "pr_open",
        GitTaskType::AutoMerge => "auto_merge",
    }
}

fn git_task_type_from_label(label: &str) -> GitTaskType {
    match label {
        "artifact_commit" => GitTaskType::ArtifactCommit,
        "pr_open" => GitTaskType::PrOpen,
        "auto_merge" => GitTaskType::AutoMerge,
        _ => GitTaskType::SurfaceCommit,
    }
}

fn revenue_event_from_row(row: &sqlx::postgres::PgRow) -> RevenueEvent {
    RevenueEvent {
        event_id: row.get("event_id"),
        profit_month_id: row.get("profit_month_id"),
        project_id: row.get("project_id"),
        amount_micro_usdc: row.get("amount_micro_usdc"),
        tx_hash: row.get("tx_hash"),
        source: row.get("source"),
        category: row.get("category"),
        idempotency_key: row.get("idempotency_key"),
        evidence_url: row.get("evidence_url"),
        created_at: row.get("created_at"),
    }
}

fn expense_event_from_row(row: &sqlx::postgres::PgRow) -> ExpenseEvent {
    ExpenseEvent {
        event_id: row.get("event_id"),
        profit_month_id: row.get("profit_month_id"),
        project_id: row.get("project_id"),
        amount_micro_usdc: row.get("amount_micro_usdc"),
        tx_hash: row.get("tx_hash"),
        source: row.get("source"),
        category: row.get("category"),
        idempotency_key: row.get("idempotency_key"),
        evidence_url: row.get("evidence_url"),
        created_at: row.get("created_at"),
    }
}

fn capital_event_from_row(row: &sqlx::postgres::PgRow) -> ProjectCapitalEvent {
    ProjectCapitalEvent {
        event_id: row.get("event_id"),
        project_id: row.get("project_id"),
        profit_month_id: row.get("profit_month_id"),
        delta_micro_usdc: row.get("delta_micro_usdc"),
        source: row.get("source"),
        idempotency_key: row.get("idempotency_key"),
        evidence_tx_hash: row.get("evidence_tx_hash"),
        created_at: row.get("created_at"),
    }
}

fn marketing_fee_event_from_row(row: &sqlx::postgres::PgRow) -> MarketingFeeAccrualEvent {
    let bucket_label: String = row.get("bucket");
    let bucket = match bucket_label.as_str() {
        "project_capital" => MarketingFeeBucket::ProjectCapital,
        "platform_revenue" => MarketingFeeBucket::PlatformRevenue,
        _ => MarketingFeeBucket::ProjectRevenue,
    };
    MarketingFeeAccrualEvent {
        event_id: row.get("event_id"),
        chain_id: row.get("chain_id"),
        tx_hash: row.get("tx_hash"),
        log_index: row.get("log_index"),
        to_address: row.get("to_address"),
        bucket,
        gross_micro_usdc: row.get("gross_micro_usdc"),
        fee_micro_usdc: row.get("fee_micro_usdc"),
        bps: row.get::<i32, _>("bps") as u32,
        created_at: row.get("created_at"),
    }
}

fn project_from_row(row: &sqlx::postgres::PgRow) -> Project {
    let status_label: String = row.get("status");
    let status = match status_label.as_str() {
        "fundraising" => ProjectStatus::Fundraising,
        "active" => ProjectStatus::Active,
        "paused" => ProjectStatus::Paused,
        "archived" => ProjectStatus::Archived,
        _ => ProjectStatus::Draft,
    };
    Project {
        project_id: row.get("project_id"),
        slug: row.get("slug"),
        name: row.get("name"),
        status,
        treasury_address: row.get("treasury_address"),
        revenue_address: row.get("revenue_address"),
        monthly_budget_micro_usdc: row.get("monthly_budget_micro_usdc"),
    }
}

fn reconciliation_report_from_row(row: &sqlx::postgres::PgRow) -> ReconciliationReport {
    let scope_label: String = row.get("scope_type");
    ReconciliationReport {
        scope: scope_from_label(&scope_label).unwrap_or(ReconciliationScope::Platform),
        scope_id: row.get("scope_id"),
        profit_month_id: row.get("profit_month_id"),
        ledger_balance_micro_usdc: row.get("ledger_balance_micro_usdc"),
        onchain_balance_micro_usdc: row.get("onchain_balance_micro_usdc"),
        delta_micro_usdc: row.get("delta_micro_usdc"),
        ready: row.get("ready"),
        blocked_reason: row.get("blocked_reason"),
        computed_at: row.get("computed_at"),
    }
}

fn distribution_creation_from_row(row: &sqlx::postgres::PgRow) -> DistributionCreation {
    let status_label: String = row.get("status");
    DistributionCreation {
        distribution_id: row.get("idempotency_key"),
        profit_month_id: row.get("profit_month_id"),
        total_amount_micro_usdc: row.get("total_profit_micro_usdc"),
        recipient_count: 0,
        status: lifecycle_from_label(&status_label),
        idempotency_key: row.get("idempotency_key"),
        created_at: row.get("created_at"),
    }
}

fn tx_outbox_task_from_row(row: &sqlx::postgres::PgRow) -> TxOutboxTask {
    let status_label: String = row.get("status");
    let type_label: String = row.get("task_type");
    TxOutboxTask {
        task_id: row.get("task_id"),
        task_type: tx_task_type_from_label(&type_label),
        payload: row.get("payload_json"),
        idempotency_key: row.get("idempotency_key"),
        status: outbox_status_from_label(&status_label),
        attempts: row.get("attempts"),
        locked_by: row.get("locked_by"),
        locked_at: row.get("locked_at"),
        tx_hash: row.get("tx_hash"),
        last_error_hint: row.get("last_error_hint"),
        created_at: row.get("created_at"),
    }
}

fn git_outbox_task_from_row(row: &sqlx::postgres::PgRow) -> GitOutboxTask {
    let status_label: String = row.get("status");
    let type_label: String = row.get("task_type");
    let result_json: Option<Value> = row.get("result_json");
    GitOutboxTask {
        task_id: row.get("task_id"),
        task_type: git_task_type_from_label(&type_label),
        payload: row.get("payload_json"),
        idempotency_key: row.get("idempotency_key"),
        status: outbox_status_from_label(&status_label),
        attempts: row.get("attempts"),
        locked_by: row.get("locked_by"),
        locked_at: row.get("locked_at"),
        branch_name: row.get("branch_name"),
        commit_sha: row.get("commit_sha"),
        result_json,
        last_error_hint: row.get("last_error_hint"),
        project_id: row.get("project_id"),
        requested_by_agent_id: row.get("requested_by_agent_id"),
        created_at: row.get("created_at"),
    }
}

fn audit_entry_from_row(row: &sqlx::postgres::PgRow) -> AuditEntry {
    let actor_label: String = row.get("actor_type");
    let sig_label: String = row.get("signature_status");
    AuditEntry {
        audit_id: row.get("audit_id"),
        actor_type: match actor_label.as_str() {
            "oracle" => ActorType::Oracle,
            "system" => ActorType::System,
            _ => ActorType::Agent,
        },
        actor_id: row.get("actor_id"),
        method: row.get("method"),
        path: row.get("path"),
        idempotency_key: row.get("idempotency_key"),
        body_hash: row.get("body_hash"),
        signature_status: match sig_label.as_str() {
            "ok_legacy" => SignatureStatus::OkLegacy,
            "invalid" => SignatureStatus::Invalid,
            "stale" => SignatureStatus::Stale,
            "replay" => SignatureStatus::Replay,
            "not_applicable" => SignatureStatus::NotApplicable,
            _ => SignatureStatus::Ok,
        },
        request_id: row.get("request_id"),
        tx_hash: row.get("tx_hash"),
        error_hint: row.get("error_hint"),
        created_at: row.get("created_at"),
    }
}

fn bounty_from_row(row: &sqlx::postgres::PgRow) -> Bounty {
    let status_label: String = row.get("status");
    let funding_label: String = row.get("funding_source");
    Bounty {
        bounty_id: row.get("bounty_id"),
        project_id: row.get("project_id"),
        status: match status_label.as_str() {
            "claimed" => BountyStatus::Claimed,
            "submitted" => BountyStatus::Submitted,
            "eligible_for_payout" => BountyStatus::EligibleForPayout,
            "paid" => BountyStatus::Paid,
            _ => BountyStatus::Open,
        },
        funding_source: match funding_label.as_str() {
            "platform_revenue" => BountyFundingSource::PlatformRevenue,
            _ => BountyFundingSource::ProjectCapital,
        },
        amount_micro_usdc: row.get("amount_micro_usdc"),
        claimant_agent_id: row.get("claimant_agent_id"),
    }
}
