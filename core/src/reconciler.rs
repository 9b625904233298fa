//! Reconciler (C4) — compares a ledger-derived balance against the
//! corresponding on-chain balance for one of the three scopes (project
//! capital, project revenue, platform) and appends a
//! [`ReconciliationReport`]. Every call produces a row, even an
//! unconfigured or RPC-failed one, so the gate (C6) always has a latest
//! row to consult.
//!
//! Grounded on `backend/src/core/reconciliation.py`'s per-scope
//! reconcile functions; generalized into one scope-parameterized
//! routine since the three scopes differ only in which address and
//! which ledger sum feed it.

use crate::error::Result;
use crate::indexer::ChainClient;
use crate::models::{BlockedReason, ReconciliationReport, ReconciliationScope};
use crate::money::Micro;
use crate::store::ReconciliationStore;
use alloy_primitives::Address;
use chrono::{DateTime, Utc};

async fn unconfigured(
    store: &dyn ReconciliationStore,
    scope: ReconciliationScope,
    scope_id: Option<&str>,
    profit_month_id: Option<&str>,
    reason: BlockedReason,
    now: DateTime<Utc>,
) -> Result<ReconciliationReport> {
    let report = ReconciliationReport::unconfigured(scope, scope_id.map(str::to_string), profit_month_id.map(str::to_string), reason, now);
    store.insert_report(report).await
}

/// Core routine shared by the three scope wrappers below. `anchor_address`
/// is the on-chain account whose token balance is compared against
/// `ledger_balance_micro_usdc`; `chain` is `None` when no RPC endpoint is
/// configured at all (distinct from an RPC call that fails, which yields
/// `RpcError` instead of `RpcNotConfigured`).
#[allow(clippy::too_many_arguments)]
pub async fn reconcile(
    store: &dyn ReconciliationStore,
    scope: ReconciliationScope,
    scope_id: Option<&str>,
    profit_month_id: Option<&str>,
    anchor_address: Option<&str>,
    ledger_balance_micro_usdc: Micro,
    chain: Option<&dyn ChainClient>,
    token: Address,
    now: DateTime<Utc>,
) -> Result<ReconciliationReport> {
    let Some(anchor) = anchor_address else {
        return unconfigured(store, scope, scope_id, profit_month_id, BlockedReason::AddressMissing, now).await;
    };

    let Some(chain) = chain else {
        return unconfigured(store, scope, scope_id, profit_month_id, BlockedReason::RpcNotConfigured, now).await;
    };

    let address: Address = match anchor.parse() {
        Ok(address) => address,
        Err(_) => return unconfigured(store, scope, scope_id, profit_month_id, BlockedReason::AddressMissing, now).await,
    };

    let onchain_balance = match chain.balance_of(token, address).await {
        Ok(balance) => balance,
        Err(_) => return unconfigured(store, scope, scope_id, profit_month_id, BlockedReason::RpcError, now).await,
    };

    let report = ReconciliationReport::evaluate(scope, scope_id.map(str::to_string), profit_month_id.map(str::to_string), ledger_balance_micro_usdc, onchain_balance, now);
    store.insert_report(report).await
}

pub async fn reconcile_project_capital(store: &dyn ReconciliationStore, chain: Option<&dyn ChainClient>, token: Address, project_id: &str, treasury_address: Option<&str>, ledger_balance_micro_usdc: Micro, now: DateTime<Utc>) -> Result<ReconciliationReport> {
    reconcile(store, ReconciliationScope::ProjectCapital, Some(project_id), None, treasury_address, ledger_balance_micro_usdc, chain, token, now).await
}

pub async fn reconcile_project_revenue(store: &dyn ReconciliationStore, chain: Option<&dyn ChainClient>, token: Address, project_id: &str, revenue_address: Option<&str>, ledger_balance_micro_usdc: Micro, now: DateTime<Utc>) -> Result<ReconciliationReport> {
    reconcile(store, ReconciliationScope::ProjectRevenue, Some(project_id), None, revenue_address, ledger_balance_micro_usdc, chain, token, now).await
}

/// Platform-scope reconciliation consults the latest `Settlement.profit_sum`
/// for the month as the ledger side, and `balanceOf(distributor)` as the
/// on-chain side, per spec.md §4.5.
pub async fn reconcile_platform(store: &dyn ReconciliationStore, chain: Option<&dyn ChainClient>, token: Address, profit_month_id: &str, distributor_address: Option<&str>, profit_sum_micro_usdc: Micro, now: DateTime<Utc>) -> Result<ReconciliationReport> {
    reconcile(store, ReconciliationScope::Platform, None, Some(profit_month_id), distributor_address, profit_sum_micro_usdc, chain, token, now).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{ChainTxRequest, DistributionView, TransferLog};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubChain {
        balance: Result<Micro>,
    }

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
            match &self.balance {
                Ok(balance) => Ok(*balance),
                Err(_) => Err(crate::error::Error::ChainTx("rpc down".to_string())),
            }
        }
        async fn get_distribution(&self, _registry: Address, _distribution_id: u64) -> Result<DistributionView> {
            Ok(DistributionView { total_profit_micro_usdc: 0, distributed_micro_usdc: 0, exists: false })
        }
        async fn submit_tx(&self, _request: ChainTxRequest) -> Result<String> {
            Ok("0xdeadbeef".to_string())
        }
    }

    struct StubStore {
        inserted: Mutex<Vec<ReconciliationReport>>,
    }

    #[async_trait]
    impl ReconciliationStore for StubStore {
        async fn insert_report(&self, report: ReconciliationReport) -> Result<ReconciliationReport> {
            self.inserted.lock().unwrap().push(report.clone());
            Ok(report)
        }
        async fn latest_report(&self, _scope: ReconciliationScope, _scope_id: Option<&str>, _profit_month_id: Option<&str>) -> Result<Option<ReconciliationReport>> {
            Ok(self.inserted.lock().unwrap().last().cloned())
        }
    }

    fn token() -> Address {
        "0x0000000000000000000000000000000000000001".parse().unwrap()
    }

    #[tokio::test]
    async fn missing_anchor_yields_address_missing() {
        let store = StubStore { inserted: Mutex::new(vec![]) };
        let chain = StubChain { balance: Ok(0) };
        let report = reconcile_project_capital(&store, Some(&chain), token(), "proj_1", None, 100, Utc::now()).await.unwrap();
        assert!(!report.ready);
        assert_eq!(report.blocked_reason.as_deref(), Some("project_capital_address_missing"));
    }

    #[tokio::test]
    async fn matching_balances_are_ready() {
        let store = StubStore { inserted: Mutex::new(vec![]) };
        let chain = StubChain { balance: Ok(100) };
        let report = reconcile_project_capital(&store, Some(&chain), token(), "proj_1", Some("0x0000000000000000000000000000000000000002"), 100, Utc::now()).await.unwrap();
        assert!(report.ready);
        assert_eq!(report.delta_micro_usdc, Some(0));
    }

    #[tokio::test]
    async fn rpc_failure_yields_rpc_error() {
        let store = StubStore { inserted: Mutex::new(vec![]) };
        let chain = StubChain { balance: Err(crate::error::Error::ChainTx("down".to_string())) };
        let report = reconcile_project_capital(&store, Some(&chain), token(), "proj_1", Some("0x0000000000000000000000000000000000000002"), 100, Utc::now()).await.unwrap();
        assert_eq!(report.blocked_reason.as_deref(), Some("rpc_error"));
    }

    #[tokio::test]
    async fn no_chain_client_yields_rpc_not_configured() {
        let store = StubStore { inserted: Mutex::new(vec![]) };
        let report = reconcile_project_capital(&store, None, token(), "proj_1", Some("0x0000000000000000000000000000000000000002"), 100, Utc::now()).await.unwrap();
        assert_eq!(report.blocked_reason.as_deref(), Some("rpc_not_configured"));
    }
}
