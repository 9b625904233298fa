//! Marketing-fee accrual (C9). Every inflow derives a fee event at a
//! configured bps, keyed by the inflow's own unique identity so
//! re-deriving from the same observed transfer never double-counts; a
//! settlement-deposit task tops up the gap between what has accrued and
//! what has already been sent (or is in flight).
//!
//! Grounded on `backend/src/core/marketing_fee.py`.

use crate::error::Error;
use crate::error::Result;
use crate::ids::{marketing_fee_event_id, tx_outbox_task_id};
use crate::idempotency::deposit_marketing_fee_key;
use crate::indexer::ChainClient;
use crate::models::{MarketingFeeAccrualEvent, MarketingFeeBucket, OutboxStatus, TxOutboxTask, TxTaskType};
use crate::money::Micro;
use crate::store::{Appended, LedgerStore, NonceStore, SettlementStore, TxOutboxStore};
use crate::tx_outbox::{enqueue_or_execute, DepositMarketingFeePayload, SyncOrEnqueueOutcome};
use alloy_primitives::Address;
use chrono::{DateTime, Utc};

/// `fee = floor(gross * bps / 10_000)`. Widened to `i128` so a
/// near-`i64::MAX` gross amount cannot overflow mid-multiplication.
pub fn compute_fee(gross_micro_usdc: Micro, bps: u32) -> Micro {
    ((gross_micro_usdc as i128 * bps as i128) / 10_000) as Micro
}

pub async fn accrue_fee(
    ledger: &dyn LedgerStore,
    chain_id: i64,
    tx_hash: &str,
    log_index: i64,
    to_address: &str,
    bucket: MarketingFeeBucket,
    gross_micro_usdc: Micro,
    bps: u32,
    now: DateTime<Utc>,
) -> Result<Appended<MarketingFeeAccrualEvent>> {
    let event = MarketingFeeAccrualEvent {
        event_id: marketing_fee_event_id(),
        chain_id,
        tx_hash: tx_hash.to_string(),
        log_index,
        to_address: to_address.to_string(),
        bucket,
        gross_micro_usdc,
        fee_micro_usdc: compute_fee(gross_micro_usdc, bps),
        bps,
        created_at: now,
    };
    ledger.append_marketing_fee_accrual(event).await
}

const DEPOSIT_STATUSES: [&str; 3] = ["pending", "processing", "succeeded"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketingDepositOutcome {
    AlreadyFunded,
    Enqueued { task_id: String, idempotency_key: String, created: bool },
    ExecutedSynchronously { idempotency_key: String, tx_hash: Option<String>, already_done: bool },
}

/// `pending_delta = accrued_total - sent_total`, where `sent_total` only
/// counts tasks in `pending|processing|succeeded` (a `blocked`/`failed`
/// deposit never happened, so it must not suppress a fresh attempt).
#[allow(clippy::too_many_arguments)]
pub async fn plan_marketing_deposit(
    ledger: &dyn LedgerStore,
    outbox: &dyn TxOutboxStore,
    settlement: &dyn SettlementStore,
    nonces: &dyn NonceStore,
    chain: &dyn ChainClient,
    tx_outbox_enabled: bool,
    treasury: Address,
    now: DateTime<Utc>,
) -> Result<MarketingDepositOutcome> {
    let accrued_total = ledger.marketing_fee_accrued_total().await?;
    let sent_total = outbox.sum_amount_by_type_and_statuses("deposit_marketing_fee", &DEPOSIT_STATUSES).await?;
    let pending_delta = accrued_total - sent_total;
    if pending_delta <= 0 {
        return Ok(MarketingDepositOutcome::AlreadyFunded);
    }

    let idempotency_key = deposit_marketing_fee_key(accrued_total, sent_total);
    let payload = DepositMarketingFeePayload { treasury, amount_micro_usdc: pending_delta };
    let task = TxOutboxTask {
        task_id: tx_outbox_task_id(),
        task_type: TxTaskType::DepositMarketingFee,
        payload: serde_json::to_value(&payload).map_err(|err| Error::Internal(err.into()))?,
        idempotency_key: idempotency_key.clone(),
        status: OutboxStatus::Pending,
        attempts: 0,
        locked_by: None,
        locked_at: None,
        tx_hash: None,
        last_error_hint: None,
        created_at: now,
    };
    match enqueue_or_execute(outbox, settlement, chain, nonces, tx_outbox_enabled, task).await? {
        SyncOrEnqueueOutcome::Enqueued { task_id, idempotency_key, created } => Ok(MarketingDepositOutcome::Enqueued { task_id, idempotency_key, created }),
        SyncOrEnqueueOutcome::ExecutedNow { idempotency_key, tx_hash, already_done } => Ok(MarketingDepositOutcome::ExecutedSynchronously { idempotency_key, tx_hash, already_done }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_rounds_down() {
        assert_eq!(compute_fee(999, 250), 24);
        assert_eq!(compute_fee(1_000_000, 100), 10_000);
    }

    #[test]
    fn zero_bps_disables_accrual() {
        assert_eq!(compute_fee(1_000_000, 0), 0);
    }

    #[test]
    fn large_gross_does_not_overflow() {
        assert_eq!(compute_fee(i64::MAX, 10_000), i64::MAX);
    }
}
