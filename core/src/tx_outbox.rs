//! Transaction outbox (C7) — durable at-most-once on-chain submission.
//! The worker claims a task, dispatches it to the `ChainClient` by task
//! type, and on success records the result both on the task row and (for
//! the distribution lifecycle) on the dedicated `DistributionCreation`/
//! `DistributionExecution`/`DividendPayout` tables, keyed by the task's
//! `idempotency_key`, per spec.md §4.7 step 3.
//!
//! Grounded on `oracle_runner/cli.py`'s tx-submission step and
//! `services/blockchain.py`'s RPC call shapes; the Safe-mode EIP-712
//! relay path is a `ChainClient` implementation detail in the sibling
//! `chain` crate, invisible here.

use crate::error::{Error, Result};
use crate::ids::{distribution_execution_id, distribution_id as new_distribution_id, payout_id};
use crate::indexer::{ChainClient, ChainTxRequest};
use crate::models::{DistributionCreation, DistributionExecution, DividendPayout, LifecycleStatus, TxOutboxTask};
use crate::store::{Appended, ClaimOutcome, NonceStore, SettlementStore, TxOutboxStore};
use alloy_primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositProfitPayload {
    pub distributor: Address,
    pub amount_micro_usdc: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositMarketingFeePayload {
    pub treasury: Address,
    pub amount_micro_usdc: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDistributionPayload {
    pub registry: Address,
    pub distribution_id: u64,
    pub profit_sum_micro_usdc: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteDistributionPayload {
    pub registry: Address,
    pub distribution_id: u64,
    pub distribution_creation_id: String,
    pub stakers: Vec<Address>,
    pub staker_shares: Vec<i64>,
    pub authors: Vec<Address>,
    pub author_shares: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsdcTransferPayload {
    pub token: Address,
    pub to: Address,
    pub amount_micro_usdc: i64,
}

/// Distinguishes a failure the worker should let retry (next claim finds
/// the task `pending` again) from one that can never succeed without
/// operator intervention.
pub enum TxExecutionError {
    Retryable(String),
    NonRetryable(String),
}

impl TxExecutionError {
    fn hint(&self) -> &str {
        match self {
            TxExecutionError::Retryable(hint) => hint,
            TxExecutionError::NonRetryable(hint) => hint,
        }
    }
}

impl From<crate::error::Error> for TxExecutionError {
    fn from(err: crate::error::Error) -> Self {
        match err {
            crate::error::Error::ChainConfig(hint) => TxExecutionError::NonRetryable(hint),
            other => TxExecutionError::Retryable(other.to_string()),
        }
    }
}

fn invalid_payload(err: serde_json::Error) -> TxExecutionError {
    TxExecutionError::NonRetryable(format!("invalid_payload:{err}"))
}

async fn execute(chain: &dyn ChainClient, task: &crate::models::TxOutboxTask) -> std::result::Result<String, TxExecutionError> {
    use crate::models::TxTaskType::*;
    match task.task_type {
        DepositProfit => {
            let payload: DepositProfitPayload = serde_json::from_value(task.payload.clone()).map_err(invalid_payload)?;
            let data = encode_deposit_call(payload.amount_micro_usdc);
            Ok(chain.submit_tx(ChainTxRequest { to: payload.distributor, data, value_wei: 0 }).await?)
        }
        DepositMarketingFee => {
            let payload: DepositMarketingFeePayload = serde_json::from_value(task.payload.clone()).map_err(invalid_payload)?;
            let data = encode_deposit_call(payload.amount_micro_usdc);
            Ok(chain.submit_tx(ChainTxRequest { to: payload.treasury, data, value_wei: 0 }).await?)
        }
        CreateDistribution => {
            let payload: CreateDistributionPayload = serde_json::from_value(task.payload.clone()).map_err(invalid_payload)?;
            let data = encode_create_distribution_call(payload.distribution_id, payload.profit_sum_micro_usdc);
            Ok(chain.submit_tx(ChainTxRequest { to: payload.registry, data, value_wei: 0 }).await?)
        }
        ExecuteDistribution => {
            let payload: ExecuteDistributionPayload = serde_json::from_value(task.payload.clone()).map_err(invalid_payload)?;
            let data = encode_execute_distribution_call(&payload);
            Ok(chain.submit_tx(ChainTxRequest { to: payload.registry, data, value_wei: 0 }).await?)
        }
        UsdcTransfer => {
            let payload: UsdcTransferPayload = serde_json::from_value(task.payload.clone()).map_err(invalid_payload)?;
            let data = encode_transfer_call(payload.to, payload.amount_micro_usdc);
            Ok(chain.submit_tx(ChainTxRequest { to: payload.token, data, value_wei: 0 }).await?)
        }
    }
}

/// ABI-encoding is intentionally minimal: these calls are built and
/// submitted as opaque calldata by the chain client, which is the only
/// place that needs to reason about the target contract's selectors.
fn encode_deposit_call(amount_micro_usdc: i64) -> Vec<u8> {
    amount_micro_usdc.to_be_bytes().to_vec()
}

fn encode_create_distribution_call(distribution_id: u64, profit_sum_micro_usdc: i64) -> Vec<u8> {
    let mut data = distribution_id.to_be_bytes().to_vec();
    data.extend_from_slice(&profit_sum_micro_usdc.to_be_bytes());
    data
}

fn encode_execute_distribution_call(payload: &ExecuteDistributionPayload) -> Vec<u8> {
    let mut data = payload.distribution_id.to_be_bytes().to_vec();
    for share in &payload.staker_shares {
        data.extend_from_slice(&share.to_be_bytes());
    }
    for share in &payload.author_shares {
        data.extend_from_slice(&share.to_be_bytes());
    }
    data
}

fn encode_transfer_call(to: Address, amount_micro_usdc: i64) -> Vec<u8> {
    let mut data = to.to_vec();
    data.extend_from_slice(&amount_micro_usdc.to_be_bytes());
    data
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxWorkerOutcome {
    NoTasks,
    RaceLost,
    Succeeded { task_id: String, tx_hash: String },
    /// `task_id` is the row that just completed as `failed`;
    /// `requeued_task_id` is the fresh `pending` row carrying the same
    /// `idempotency_key` that a future claim will pick up.
    Retrying { task_id: String, requeued_task_id: String, hint: String },
    Blocked { task_id: String, hint: String },
}

/// Claims and runs a single tx-outbox task end to end. Retryable errors
/// complete the claimed row as terminal `failed` (`mark_failed`) and a
/// fresh `pending` row carrying the same semantic `idempotency_key` is
/// enqueued in its place, per spec.md §4.7 step 4 — the existing row
/// never comes back to life, a new one takes over. Non-retryable
/// configuration errors terminate the claimed row as `blocked` with no
/// replacement.
pub async fn process_next(
    outbox: &dyn TxOutboxStore,
    settlement: &dyn SettlementStore,
    chain: &dyn ChainClient,
    worker_id: &str,
    lock_ttl_seconds: i64,
) -> Result<TxWorkerOutcome> {
    let task = match outbox.claim_next(worker_id, lock_ttl_seconds).await? {
        ClaimOutcome::NoTasks => return Ok(TxWorkerOutcome::NoTasks),
        ClaimOutcome::RaceLost => return Ok(TxWorkerOutcome::RaceLost),
        ClaimOutcome::Claimed(task) => task,
    };

    match execute(chain, &task).await {
        Ok(tx_hash) => {
            record_distribution_side_effects(settlement, &task, &tx_hash).await?;
            outbox.mark_succeeded(&task.task_id, worker_id, Some(tx_hash.clone())).await?;
            Ok(TxWorkerOutcome::Succeeded { task_id: task.task_id, tx_hash })
        }
        Err(err) => {
            let hint = err.hint().to_string();
            match err {
                TxExecutionError::Retryable(_) => {
                    outbox.mark_failed(&task.task_id, worker_id, &hint).await?;
                    let requeued = TxOutboxTask {
                        task_id: crate::ids::tx_outbox_task_id(),
                        task_type: task.task_type,
                        payload: task.payload.clone(),
                        idempotency_key: task.idempotency_key.clone(),
                        status: crate::models::OutboxStatus::Pending,
                        attempts: 0,
                        locked_by: None,
                        locked_at: None,
                        tx_hash: None,
                        last_error_hint: None,
                        created_at: Utc::now(),
                    };
                    let Appended { row, .. } = outbox.enqueue(requeued).await?;
                    Ok(TxWorkerOutcome::Retrying { task_id: task.task_id, requeued_task_id: row.task_id, hint })
                }
                TxExecutionError::NonRetryable(_) => {
                    outbox.mark_blocked(&task.task_id, worker_id, &hint).await?;
                    Ok(TxWorkerOutcome::Blocked { task_id: task.task_id, hint })
                }
            }
        }
    }
}

/// Outcome of routing a would-be outbox task through
/// [`enqueue_or_execute`]. `ExecutedNow` is only produced when the
/// outbox is disabled; `already_done=true` means a prior synchronous
/// call with the same idempotency key already ran this action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOrEnqueueOutcome {
    Enqueued { task_id: String, idempotency_key: String, created: bool },
    ExecutedNow { idempotency_key: String, tx_hash: Option<String>, already_done: bool },
}

/// Routes a prepared task through the outbox, or — when
/// `tx_outbox_enabled` is false — runs it inline instead of
/// materializing a row, per the synchronous-mode contract: the task's
/// own `idempotency_key` is inserted into the nonce table as the
/// dedup/audit key, so a repeated call with the same key is a no-op
/// rather than a second submission.
pub async fn enqueue_or_execute(
    outbox: &dyn TxOutboxStore,
    settlement: &dyn SettlementStore,
    chain: &dyn ChainClient,
    nonces: &dyn NonceStore,
    tx_outbox_enabled: bool,
    task: TxOutboxTask,
) -> Result<SyncOrEnqueueOutcome> {
    if tx_outbox_enabled {
        let Appended { row, created } = outbox.enqueue(task).await?;
        return Ok(SyncOrEnqueueOutcome::Enqueued { task_id: row.task_id, idempotency_key: row.idempotency_key, created });
    }

    let idempotency_key = task.idempotency_key.clone();
    if !nonces.insert_nonce(&idempotency_key).await? {
        return Ok(SyncOrEnqueueOutcome::ExecutedNow { idempotency_key, tx_hash: None, already_done: true });
    }

    match execute(chain, &task).await {
        Ok(tx_hash) => {
            record_distribution_side_effects(settlement, &task, &tx_hash).await?;
            Ok(SyncOrEnqueueOutcome::ExecutedNow { idempotency_key, tx_hash: Some(tx_hash), already_done: false })
        }
        Err(err) => Err(Error::ChainTx(err.hint().to_string())),
    }
}

async fn record_distribution_side_effects(settlement: &dyn SettlementStore, task: &crate::models::TxOutboxTask, tx_hash: &str) -> Result<()> {
    use crate::models::TxTaskType::*;
    let now = Utc::now();
    match task.task_type {
        CreateDistribution => {
            let payload: CreateDistributionPayload = match serde_json::from_value(task.payload.clone()) {
                Ok(payload) => payload,
                Err(_) => return Ok(()),
            };
            settlement
                .insert_distribution_creation(DistributionCreation {
                    distribution_id: new_distribution_id(),
                    profit_month_id: payload.distribution_id.to_string(),
                    total_amount_micro_usdc: payload.profit_sum_micro_usdc,
                    recipient_count: 0,
                    status: LifecycleStatus::Completed,
                    idempotency_key: task.idempotency_key.clone(),
                    created_at: now,
                })
                .await?;
            Ok(())
        }
        ExecuteDistribution => {
            let payload: ExecuteDistributionPayload = match serde_json::from_value(task.payload.clone()) {
                Ok(payload) => payload,
                Err(_) => return Ok(()),
            };
            let execution = DistributionExecution {
                execution_id: distribution_execution_id(),
                distribution_id: payload.distribution_creation_id.clone(),
                tx_hash: Some(tx_hash.to_string()),
                status: LifecycleStatus::Completed,
                error: None,
                executed_at: Some(now),
                created_at: now,
            };
            let execution = settlement.insert_distribution_execution(execution).await?;

            for (recipient, amount) in payload.stakers.iter().zip(payload.staker_shares.iter()).chain(payload.authors.iter().zip(payload.author_shares.iter())) {
                settlement
                    .insert_dividend_payout(DividendPayout {
                        payout_id: payout_id(),
                        execution_id: execution.execution_id.clone(),
                        recipient_address: format!("{recipient:#x}"),
                        amount_micro_usdc: *amount,
                        tx_hash: Some(tx_hash.to_string()),
                        created_at: now,
                    })
                    .await?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{DistributionView, TransferLog};
    use crate::models::{DistributionCreation, DistributionExecution, DividendPayout, OutboxStatus, Settlement, TxTaskType};
    use crate::store::{Appended, ClaimOutcome};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn chain_config_errors_are_non_retryable() {
        let err: TxExecutionError = crate::error::Error::ChainConfig("no signer".to_string()).into();
        assert!(matches!(err, TxExecutionError::NonRetryable(_)));
    }

    #[test]
    fn chain_tx_errors_are_retryable() {
        let err: TxExecutionError = crate::error::Error::ChainTx("rpc timeout".to_string()).into();
        assert!(matches!(err, TxExecutionError::Retryable(_)));
    }

    struct StubChain;

    #[async_trait]
    impl ChainClient for StubChain {
        async fn chain_id(&self) -> Result<i64> {
            Ok(1)
        }
        async fn latest_block_number(&self) -> Result<i64> {
            Ok(0)
        }
        async fn get_transfer_logs(&self, _token: Address, _watched: &[Address], _from_block: i64, _to_block: i64) -> Result<Vec<TransferLog>> {
            Ok(vec![])
        }
        async fn balance_of(&self, _token: Address, _holder: Address) -> Result<i64> {
            Ok(0)
        }
        async fn get_distribution(&self, _registry: Address, _distribution_id: u64) -> Result<DistributionView> {
            Ok(DistributionView { total_profit_micro_usdc: 0, distributed_micro_usdc: 0, exists: false })
        }
        async fn submit_tx(&self, _request: ChainTxRequest) -> Result<String> {
            Ok("0xdeadbeef".to_string())
        }
    }

    struct NoopOutbox;

    #[async_trait]
    impl TxOutboxStore for NoopOutbox {
        async fn enqueue(&self, task: TxOutboxTask) -> Result<Appended<TxOutboxTask>> {
            Ok(Appended { row: task, created: true })
        }
        async fn claim_next(&self, _worker_id: &str, _lock_ttl_seconds: i64) -> Result<ClaimOutcome<TxOutboxTask>> {
            Ok(ClaimOutcome::NoTasks)
        }
        async fn mark_succeeded(&self, _task_id: &str, _locked_by: &str, _tx_hash: Option<String>) -> Result<bool> {
            Ok(true)
        }
        async fn mark_failed(&self, _task_id: &str, _locked_by: &str, _error: &str) -> Result<bool> {
            Ok(true)
        }
        async fn mark_blocked(&self, _task_id: &str, _locked_by: &str, _error: &str) -> Result<bool> {
            Ok(true)
        }
        async fn get_by_idempotency_key(&self, _idempotency_key: &str) -> Result<Option<TxOutboxTask>> {
            Ok(None)
        }
        async fn sum_amount_by_type_and_statuses(&self, _task_type_label: &str, _statuses: &[&str]) -> Result<i64> {
            Ok(0)
        }
    }

    struct NoopSettlement;

    #[async_trait]
    impl SettlementStore for NoopSettlement {
        async fn insert_settlement(&self, settlement: Settlement) -> Result<Settlement> {
            Ok(settlement)
        }
        async fn latest_settlement(&self, _profit_month_id: &str) -> Result<Option<Settlement>> {
            Ok(None)
        }
        async fn insert_distribution_creation(&self, row: DistributionCreation) -> Result<Appended<DistributionCreation>> {
            Ok(Appended { row, created: true })
        }
        async fn get_distribution_creation(&self, _profit_month_id: &str) -> Result<Option<DistributionCreation>> {
            Ok(None)
        }
        async fn insert_distribution_execution(&self, row: DistributionExecution) -> Result<DistributionExecution> {
            Ok(row)
        }
        async fn insert_dividend_payout(&self, row: DividendPayout) -> Result<DividendPayout> {
            Ok(row)
        }
    }

    struct StubNonces {
        seen: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl NonceStore for StubNonces {
        async fn insert_nonce(&self, request_id: &str) -> Result<bool> {
            Ok(self.seen.lock().unwrap().insert(request_id.to_string()))
        }
    }

    fn sample_task(idempotency_key: &str) -> TxOutboxTask {
        TxOutboxTask {
            task_id: "tx_1".to_string(),
            task_type: TxTaskType::DepositMarketingFee,
            payload: serde_json::json!({ "treasury": "0x0000000000000000000000000000000000000001", "amount_micro_usdc": 10 }),
            idempotency_key: idempotency_key.to_string(),
            status: OutboxStatus::Pending,
            attempts: 0,
            locked_by: None,
            locked_at: None,
            tx_hash: None,
            last_error_hint: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn disabled_outbox_executes_inline_instead_of_enqueuing() {
        let nonces = StubNonces { seen: Mutex::new(HashSet::new()) };
        let outcome = enqueue_or_execute(&NoopOutbox, &NoopSettlement, &StubChain, &nonces, false, sample_task("dep:1")).await.unwrap();
        match outcome {
            SyncOrEnqueueOutcome::ExecutedNow { tx_hash, already_done, .. } => {
                assert_eq!(tx_hash.as_deref(), Some("0xdeadbeef"));
                assert!(!already_done);
            }
            other => panic!("expected ExecutedNow, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_synchronous_call_with_same_key_is_a_noop() {
        let nonces = StubNonces { seen: Mutex::new(HashSet::new()) };
        let first = enqueue_or_execute(&NoopOutbox, &NoopSettlement, &StubChain, &nonces, false, sample_task("dep:2")).await.unwrap();
        assert!(matches!(first, SyncOrEnqueueOutcome::ExecutedNow { already_done: false, .. }));

        let second = enqueue_or_execute(&NoopOutbox, &NoopSettlement, &StubChain, &nonces, false, sample_task("dep:2")).await.unwrap();
        assert!(matches!(second, SyncOrEnqueueOutcome::ExecutedNow { already_done: true, .. }));
    }

    #[tokio::test]
    async fn enabled_outbox_enqueues_instead_of_executing() {
        let nonces = StubNonces { seen: Mutex::new(HashSet::new()) };
        let outcome = enqueue_or_execute(&NoopOutbox, &NoopSettlement, &StubChain, &nonces, true, sample_task("dep:3")).await.unwrap();
        assert!(matches!(outcome, SyncOrEnqueueOutcome::Enqueued { created: true, .. }));
    }

    struct FailingChain;

    #[async_trait]
    impl ChainClient for FailingChain {
        async fn chain_id(&self) -> Result<i64> {
            Ok(1)
        }
        async fn latest_block_number(&self) -> Result<i64> {
            Ok(0)
        }
        async fn get_transfer_logs(&self, _token: Address, _watched: &[Address], _from_block: i64, _to_block: i64) -> Result<Vec<TransferLog>> {
            Ok(vec![])
        }
        async fn balance_of(&self, _token: Address, _holder: Address) -> Result<i64> {
            Ok(0)
        }
        async fn get_distribution(&self, _registry: Address, _distribution_id: u64) -> Result<DistributionView> {
            Ok(DistributionView { total_profit_micro_usdc: 0, distributed_micro_usdc: 0, exists: false })
        }
        async fn submit_tx(&self, _request: ChainTxRequest) -> Result<String> {
            Err(crate::error::Error::ChainTx("rpc timeout".to_string()))
        }
    }

    /// Mimics the store's real dedup rule (active rows only) so the
    /// retry-requeue path can be exercised end to end.
    struct FakeOutbox {
        tasks: Mutex<Vec<TxOutboxTask>>,
    }

    #[async_trait]
    impl TxOutboxStore for FakeOutbox {
        async fn enqueue(&self, task: TxOutboxTask) -> Result<Appended<TxOutboxTask>> {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(existing) = tasks.iter().find(|t| t.idempotency_key == task.idempotency_key && !t.status.is_terminal()) {
                return Ok(Appended { row: existing.clone(), created: false });
            }
            tasks.push(task.clone());
            Ok(Appended { row: task, created: true })
        }
        async fn claim_next(&self, worker_id: &str, _lock_ttl_seconds: i64) -> Result<ClaimOutcome<TxOutboxTask>> {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(t) = tasks.iter_mut().find(|t| t.status == OutboxStatus::Pending) {
                t.status = OutboxStatus::Processing;
                t.locked_by = Some(worker_id.to_string());
                t.attempts += 1;
                return Ok(ClaimOutcome::Claimed(t.clone()));
            }
            Ok(ClaimOutcome::NoTasks)
        }
        async fn mark_succeeded(&self, task_id: &str, locked_by: &str, tx_hash: Option<String>) -> Result<bool> {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(t) = tasks.iter_mut().find(|t| t.task_id == task_id && t.locked_by.as_deref() == Some(locked_by)) {
                t.status = OutboxStatus::Succeeded;
                t.tx_hash = tx_hash;
                return Ok(true);
            }
            Ok(false)
        }
        async fn mark_failed(&self, task_id: &str, locked_by: &str, error: &str) -> Result<bool> {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(t) = tasks.iter_mut().find(|t| t.task_id == task_id && t.locked_by.as_deref() == Some(locked_by)) {
                t.status = OutboxStatus::Failed;
                t.last_error_hint = Some(error.to_string());
                return Ok(true);
            }
            Ok(false)
        }
        async fn mark_blocked(&self, task_id: &str, locked_by: &str, error: &str) -> Result<bool> {
            let mut tasks = self.tasks.lock().unwrap();
            if let Some(t) = tasks.iter_mut().find(|t| t.task_id == task_id && t.locked_by.as_deref() == Some(locked_by)) {
                t.status = OutboxStatus::Blocked;
                t.last_error_hint = Some(error.to_string());
                return Ok(true);
            }
            Ok(false)
        }
        async fn get_by_idempotency_key(&self, idempotency_key: &str) -> Result<Option<TxOutboxTask>> {
            Ok(self.tasks.lock().unwrap().iter().find(|t| t.idempotency_key == idempotency_key).cloned())
        }
        async fn sum_amount_by_type_and_statuses(&self, _task_type_label: &str, _statuses: &[&str]) -> Result<i64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn retryable_failure_completes_as_failed_and_requeues_a_fresh_pending_row() {
        let outbox = FakeOutbox { tasks: Mutex::new(vec![sample_task("dep:retry")]) };
        let outcome = process_next(&outbox, &NoopSettlement, &FailingChain, "w1", 60).await.unwrap();

        let (failed_id, requeued_id) = match outcome {
            TxWorkerOutcome::Retrying { task_id, requeued_task_id, .. } => (task_id, requeued_task_id),
            other => panic!("expected Retrying, got {other:?}"),
        };
        assert_ne!(failed_id, requeued_id);

        let tasks = outbox.tasks.lock().unwrap();
        let original = tasks.iter().find(|t| t.task_id == failed_id).unwrap();
        assert_eq!(original.status, OutboxStatus::Failed);

        let requeued = tasks.iter().find(|t| t.task_id == requeued_id).unwrap();
        assert_eq!(requeued.status, OutboxStatus::Pending);
        assert_eq!(requeued.idempotency_key, original.idempotency_key);
    }
}
