//! Settlement engine (C5) — monthly profit computation and the
//! distribution lifecycle (`create_distribution` / `execute_distribution`).
//! Modeled on the settlement/distribution surface in
//! `backend/src/api/v1/oracle_settlement.py`, `backend/src/api/v1/settlement.py`
//! and `backend/src/schemas/settlement.py`.

use crate::error::{Error, Result};
use crate::ids::tx_outbox_task_id;
use crate::idempotency::create_distribution_key;
use crate::indexer::ChainClient;
use crate::models::{BlockedReason, ReconciliationScope, Settlement, TxOutboxTask, TxTaskType};
use crate::money::{Micro, ProfitMonth};
use crate::store::{LedgerStore, NonceStore, ReconciliationStore, SettlementStore, TxOutboxStore};
use crate::tx_outbox::{enqueue_or_execute, CreateDistributionPayload, ExecuteDistributionPayload, SyncOrEnqueueOutcome};
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde_json::json;

pub const MAX_STAKER_RECIPIENTS: usize = 200;
pub const MAX_AUTHOR_RECIPIENTS: usize = 50;

/// Computes `revenue_sum - expense_sum` for `month` and appends a new
/// `Settlement` row. Settlements are append-only; callers consult
/// `latest_settlement` for the authoritative figure.
pub async fn compute_settlement(ledger: &dyn LedgerStore, settlement: &dyn SettlementStore, month: &ProfitMonth, now: DateTime<Utc>) -> Result<Settlement> {
    let revenue_sum = ledger.revenue_sum_for_month(month.as_str()).await?;
    let expense_sum = ledger.expense_sum_for_month(month.as_str()).await?;
    let profit_sum = revenue_sum - expense_sum;
    let row = Settlement {
        profit_month_id: month.as_str().to_string(),
        revenue_sum_micro_usdc: revenue_sum,
        expense_sum_micro_usdc: expense_sum,
        profit_sum_micro_usdc: profit_sum,
        profit_nonnegative: profit_sum >= 0,
        computed_at: now,
    };
    settlement.insert_settlement(row).await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateDistributionOutcome {
    Blocked { blocked_reason: String },
    AlreadyExists,
    Enqueued { task_id: String, idempotency_key: String, created: bool },
    ExecutedSynchronously { idempotency_key: String, tx_hash: Option<String>, already_done: bool },
}

pub fn month_as_distribution_id(month: &ProfitMonth) -> Result<u64> {
    month.as_str().parse().map_err(|_| Error::validation("profit_month_id"))
}

/// `create_distribution` is allowed only when the latest platform
/// reconciliation is `ready`, the settled profit is strictly positive,
/// and the on-chain registry does not already carry a distribution for
/// the month.
#[allow(clippy::too_many_arguments)]
pub async fn create_distribution(
    reconciliation: &dyn ReconciliationStore,
    outbox: &dyn TxOutboxStore,
    settlement: &dyn SettlementStore,
    nonces: &dyn NonceStore,
    chain: &dyn ChainClient,
    tx_outbox_enabled: bool,
    registry: Address,
    month: &ProfitMonth,
    profit_sum_micro_usdc: Micro,
    now: DateTime<Utc>,
) -> Result<CreateDistributionOutcome> {
    let latest = reconciliation.latest_report(ReconciliationScope::Platform, None, Some(month.as_str())).await?;
    let ready = latest.as_ref().map(|report| report.ready).unwrap_or(false);
    if !ready {
        let reason = latest
            .and_then(|report| report.blocked_reason)
            .unwrap_or_else(|| BlockedReason::ReconciliationMissing.namespaced(ReconciliationScope::Platform));
        return Ok(CreateDistributionOutcome::Blocked { blocked_reason: reason });
    }

    if profit_sum_micro_usdc <= 0 {
        return Ok(CreateDistributionOutcome::Blocked { blocked_reason: BlockedReason::NegativeProfit.namespaced(ReconciliationScope::Platform) });
    }

    let distribution_id = month_as_distribution_id(month)?;
    let view = chain.get_distribution(registry, distribution_id).await?;
    if view.exists {
        return Ok(CreateDistributionOutcome::AlreadyExists);
    }

    let idempotency_key = create_distribution_key(month.as_str(), profit_sum_micro_usdc);
    let payload = CreateDistributionPayload { registry, distribution_id, profit_sum_micro_usdc };
    let task = TxOutboxTask {
        task_id: tx_outbox_task_id(),
        task_type: TxTaskType::CreateDistribution,
        payload: serde_json::to_value(&payload).map_err(|err| Error::Internal(err.into()))?,
        idempotency_key: idempotency_key.clone(),
        status: crate::models::OutboxStatus::Pending,
        attempts: 0,
        locked_by: None,
        locked_at: None,
        tx_hash: None,
        last_error_hint: None,
        created_at: now,
    };
    match enqueue_or_execute(outbox, settlement, chain, nonces, tx_outbox_enabled, task).await? {
        SyncOrEnqueueOutcome::Enqueued { task_id, idempotency_key, created } => Ok(CreateDistributionOutcome::Enqueued { task_id, idempotency_key, created }),
        SyncOrEnqueueOutcome::ExecutedNow { idempotency_key, tx_hash, already_done } => Ok(CreateDistributionOutcome::ExecutedSynchronously { idempotency_key, tx_hash, already_done }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteDistributionOutcome {
    Blocked { blocked_reason: String },
    AlreadyDistributed,
    Enqueued { task_id: String, idempotency_key: String, created: bool },
    ExecutedSynchronously { idempotency_key: String, tx_hash: Option<String>, already_done: bool },
}

pub struct ExecuteDistributionRequest {
    pub month: ProfitMonth,
    pub registry: Address,
    pub distribution_creation_id: String,
    pub profit_sum_micro_usdc: Micro,
    pub stakers: Vec<Address>,
    pub staker_shares: Vec<Micro>,
    pub authors: Vec<Address>,
    pub author_shares: Vec<Micro>,
}

/// `execute_distribution` requires the distribution to exist on-chain
/// and not already be distributed, equal-length recipient/share vectors
/// within the spec's caps, and shares summing exactly to the settled
/// profit.
pub async fn execute_distribution(
    outbox: &dyn TxOutboxStore,
    settlement: &dyn SettlementStore,
    nonces: &dyn NonceStore,
    chain: &dyn ChainClient,
    tx_outbox_enabled: bool,
    request: ExecuteDistributionRequest,
    now: DateTime<Utc>,
) -> Result<ExecuteDistributionOutcome> {
    let distribution_id = month_as_distribution_id(&request.month)?;
    let view = chain.get_distribution(request.registry, distribution_id).await?;
    if !view.exists {
        return Ok(ExecuteDistributionOutcome::Blocked { blocked_reason: "distribution_not_created".to_string() });
    }
    if view.distributed_micro_usdc > 0 {
        return Ok(ExecuteDistributionOutcome::AlreadyDistributed);
    }

    if request.stakers.len() != request.staker_shares.len() || request.authors.len() != request.author_shares.len() {
        return Ok(ExecuteDistributionOutcome::Blocked { blocked_reason: "recipient_shares_length_mismatch".to_string() });
    }
    if request.stakers.len() > MAX_STAKER_RECIPIENTS {
        return Ok(ExecuteDistributionOutcome::Blocked { blocked_reason: "stakers_cap_exceeded".to_string() });
    }
    if request.authors.len() > MAX_AUTHOR_RECIPIENTS {
        return Ok(ExecuteDistributionOutcome::Blocked { blocked_reason: "authors_cap_exceeded".to_string() });
    }
    let share_sum: Micro = request.staker_shares.iter().chain(request.author_shares.iter()).sum();
    if share_sum != request.profit_sum_micro_usdc {
        return Ok(ExecuteDistributionOutcome::Blocked { blocked_reason: "share_sum_mismatch".to_string() });
    }

    let payload = ExecuteDistributionPayload {
        registry: request.registry,
        distribution_id,
        distribution_creation_id: request.distribution_creation_id.clone(),
        stakers: request.stakers.clone(),
        staker_shares: request.staker_shares.clone(),
        authors: request.authors.clone(),
        author_shares: request.author_shares.clone(),
    };
    let payload_value = serde_json::to_value(&payload).map_err(|err| Error::Internal(err.into()))?;
    let idempotency_key = crate::idempotency::execute_distribution_key(request.month.as_str(), &json!({ "distribution_creation_id": request.distribution_creation_id }));
    let task = TxOutboxTask {
        task_id: tx_outbox_task_id(),
        task_type: TxTaskType::ExecuteDistribution,
        payload: payload_value,
        idempotency_key: idempotency_key.clone(),
        status: crate::models::OutboxStatus::Pending,
        attempts: 0,
        locked_by: None,
        locked_at: None,
        tx_hash: None,
        last_error_hint: None,
        created_at: now,
    };
    match enqueue_or_execute(outbox, settlement, chain, nonces, tx_outbox_enabled, task).await? {
        SyncOrEnqueueOutcome::Enqueued { task_id, idempotency_key, created } => Ok(ExecuteDistributionOutcome::Enqueued { task_id, idempotency_key, created }),
        SyncOrEnqueueOutcome::ExecutedNow { idempotency_key, tx_hash, already_done } => Ok(ExecuteDistributionOutcome::ExecutedSynchronously { idempotency_key, tx_hash, already_done }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_id_parses_from_month_key() {
        let month = ProfitMonth::parse("202501").unwrap();
        assert_eq!(month_as_distribution_id(&month).unwrap(), 202501);
    }
}
