use crate::money::Micro;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationScope {
    ProjectCapital,
    ProjectRevenue,
    Platform,
}

impl ReconciliationScope {
    /// The prefix used to namespace this scope's `blocked_reason`
    /// strings, e.g. `project_capital_reconciliation_missing`.
    pub fn reason_prefix(self) -> &'static str {
        match self {
            ReconciliationScope::ProjectCapital => "project_capital",
            ReconciliationScope::ProjectRevenue => "project_revenue",
            ReconciliationScope::Platform => "platform",
        }
    }
}

/// Machine-readable reason a call was refused. Carries its own namespace
/// prefix (`project_capital_*`, `project_revenue_*`, `platform_*`) so the
/// gate (§4.6) can emit a single unambiguous string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    AddressMissing,
    ReconciliationMissing,
    NotReconciled,
    ReconciliationStale,
    BalanceMismatch,
    NegativeProfit,
    RpcNotConfigured,
    RpcError,
    SpendPolicyPerBountyExceeded,
    SpendPolicyPerDayExceeded,
    SpendPolicyPerMonthExceeded,
    InsufficientProjectCapital,
}

impl BlockedReason {
    /// Renders `"{scope_prefix}_{reason}"`, e.g.
    /// `project_capital_reconciliation_missing`, matching spec.md §4.6.
    pub fn namespaced(&self, scope: ReconciliationScope) -> String {
        let prefix = scope.reason_prefix();
        match self {
            BlockedReason::AddressMissing => format!("{prefix}_address_missing"),
            BlockedReason::ReconciliationMissing => format!("{prefix}_reconciliation_missing"),
            BlockedReason::NotReconciled => format!("{prefix}_not_reconciled"),
            BlockedReason::ReconciliationStale => format!("{prefix}_reconciliation_stale"),
            BlockedReason::BalanceMismatch => "balance_mismatch".to_string(),
            BlockedReason::NegativeProfit => "negative_profit".to_string(),
            BlockedReason::RpcNotConfigured => "rpc_not_configured".to_string(),
            BlockedReason::RpcError => "rpc_error".to_string(),
            BlockedReason::SpendPolicyPerBountyExceeded => "project_spend_policy_per_bounty_exceeded".to_string(),
            BlockedReason::SpendPolicyPerDayExceeded => "project_spend_policy_per_day_exceeded".to_string(),
            BlockedReason::SpendPolicyPerMonthExceeded => "project_spend_policy_per_month_exceeded".to_string(),
            BlockedReason::InsufficientProjectCapital => "insufficient_project_capital".to_string(),
        }
    }
}

/// A reconciliation snapshot for one scope. Append-only; callers always
/// consult `max(computed_at)` per scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub scope: ReconciliationScope,
    /// `project_id` for project-scoped rows; `None` for platform.
    pub scope_id: Option<String>,
    /// Platform rows only.
    pub profit_month_id: Option<String>,
    pub ledger_balance_micro_usdc: Option<Micro>,
    pub onchain_balance_micro_usdc: Option<Micro>,
    pub delta_micro_usdc: Option<Micro>,
    pub ready: bool,
    pub blocked_reason: Option<String>,
    pub computed_at: DateTime<Utc>,
}

impl ReconciliationReport {
    /// `ready = (delta == 0 AND ledger_balance >= 0)`.
    pub fn evaluate(scope: ReconciliationScope, scope_id: Option<String>, profit_month_id: Option<String>, ledger_balance: Micro, onchain_balance: Micro, now: DateTime<Utc>) -> Self {
        let delta = onchain_balance - ledger_balance;
        let ready = delta == 0 && ledger_balance >= 0;
        let blocked_reason = if ready {
            None
        } else if delta != 0 {
            Some(BlockedReason::BalanceMismatch.namespaced(scope))
        } else {
            Some(BlockedReason::NegativeProfit.namespaced(scope))
        };
        ReconciliationReport {
            scope,
            scope_id,
            profit_month_id,
            ledger_balance_micro_usdc: Some(ledger_balance),
            onchain_balance_micro_usdc: Some(onchain_balance),
            delta_micro_usdc: Some(delta),
            ready,
            blocked_reason,
            computed_at: now,
        }
    }

    pub fn unconfigured(scope: ReconciliationScope, scope_id: Option<String>, profit_month_id: Option<String>, reason: BlockedReason, now: DateTime<Utc>) -> Self {
        ReconciliationReport {
            scope,
            scope_id,
            profit_month_id,
            ledger_balance_micro_usdc: None,
            onchain_balance_micro_usdc: None,
            delta_micro_usdc: None,
            ready: false,
            blocked_reason: Some(reason.namespaced(scope)),
            computed_at: now,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age_seconds: i64) -> bool {
        (now - self.computed_at).num_seconds() > max_age_seconds
    }
}
