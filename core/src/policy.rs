//! Spend-policy & fail-closed gate (C6). Asserts, in order, the six
//! conditions of spec.md §4.6; the first failing condition produces a
//! single machine `blocked_reason` string. The gate never mutates state
//! and never raises — a blocked outflow is a successful `GateOutcome`,
//! not an `Error` (spec.md §7 "never throws").
//!
//! Grounded on `backend/src/core/spend_policy.py::assert_outflow_allowed`
//! and the bounty `mark_paid` gate call in `backend/src/api/v1/
//! bounties.py`.

use crate::models::{BlockedReason, ReconciliationReport, ReconciliationScope};
use crate::money::Micro;
use chrono::{DateTime, Utc};

/// Per-bounty / per-day / per-month caps, all optional (an absent cap is
/// never exceeded).
#[derive(Debug, Clone, Copy, Default)]
pub struct SpendCaps {
    pub per_bounty_micro_usdc: Option<Micro>,
    pub per_day_micro_usdc: Option<Micro>,
    pub per_month_micro_usdc: Option<Micro>,
}

/// Pre-fetched facts the gate decides against. The caller is responsible
/// for reading these from the store; the gate itself performs no I/O.
#[derive(Debug, Clone)]
pub struct GateContext {
    pub anchor_configured: bool,
    pub reconciliation: Option<ReconciliationReport>,
    pub now: DateTime<Utc>,
    pub max_age_seconds: i64,
    pub amount_micro_usdc: Micro,
    pub caps: SpendCaps,
    /// Sum already spent against this specific bounty/operation (0 for a
    /// first attempt); compared against `per_bounty_micro_usdc`.
    pub spent_on_this_outflow_micro_usdc: Micro,
    pub spent_today_micro_usdc: Micro,
    pub spent_this_month_micro_usdc: Micro,
    /// `Some(remaining_capital)` only when the outflow is funded from
    /// project capital; `None` when funded from platform/project revenue.
    pub remaining_project_capital_micro_usdc: Option<Micro>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Allowed,
    Blocked { blocked_reason: String },
}

impl GateOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateOutcome::Allowed)
    }

    pub fn blocked_reason(&self) -> Option<&str> {
        match self {
            GateOutcome::Blocked { blocked_reason } => Some(blocked_reason),
            GateOutcome::Allowed => None,
        }
    }
}

fn blocked(scope: ReconciliationScope, reason: BlockedReason) -> GateOutcome {
    GateOutcome::Blocked { blocked_reason: reason.namespaced(scope) }
}

/// Evaluates spec.md §4.6 conditions 1-6 in order against `ctx`.
pub fn gate_outflow(scope: ReconciliationScope, ctx: &GateContext) -> GateOutcome {
    if !ctx.anchor_configured {
        return blocked(scope, BlockedReason::AddressMissing);
    }

    let Some(report) = &ctx.reconciliation else {
        return blocked(scope, BlockedReason::ReconciliationMissing);
    };

    if !(report.ready && report.delta_micro_usdc == Some(0)) {
        return blocked(scope, BlockedReason::NotReconciled);
    }

    if report.is_stale(ctx.now, ctx.max_age_seconds) {
        return blocked(scope, BlockedReason::ReconciliationStale);
    }

    if let Some(cap) = ctx.caps.per_bounty_micro_usdc {
        if ctx.spent_on_this_outflow_micro_usdc + ctx.amount_micro_usdc > cap {
            return blocked(scope, BlockedReason::SpendPolicyPerBountyExceeded);
        }
    }
    if let Some(cap) = ctx.caps.per_day_micro_usdc {
        if ctx.spent_today_micro_usdc + ctx.amount_micro_usdc > cap {
            return blocked(scope, BlockedReason::SpendPolicyPerDayExceeded);
        }
    }
    if let Some(cap) = ctx.caps.per_month_micro_usdc {
        if ctx.spent_this_month_micro_usdc + ctx.amount_micro_usdc > cap {
            return blocked(scope, BlockedReason::SpendPolicyPerMonthExceeded);
        }
    }

    if let Some(remaining) = ctx.remaining_project_capital_micro_usdc {
        if remaining < ctx.amount_micro_usdc {
            return blocked(scope, BlockedReason::InsufficientProjectCapital);
        }
    }

    GateOutcome::Allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_report(scope: ReconciliationScope, computed_at: DateTime<Utc>) -> ReconciliationReport {
        ReconciliationReport {
            scope,
            scope_id: Some("proj_1".to_string()),
            profit_month_id: None,
            ledger_balance_micro_usdc: Some(1_000_000),
            onchain_balance_micro_usdc: Some(1_000_000),
            delta_micro_usdc: Some(0),
            ready: true,
            blocked_reason: None,
            computed_at,
        }
    }

    fn base_ctx(now: DateTime<Utc>) -> GateContext {
        GateContext {
            anchor_configured: true,
            reconciliation: Some(ready_report(ReconciliationScope::ProjectCapital, now)),
            now,
            max_age_seconds: 3600,
            amount_micro_usdc: 1_000,
            caps: SpendCaps::default(),
            spent_on_this_outflow_micro_usdc: 0,
            spent_today_micro_usdc: 0,
            spent_this_month_micro_usdc: 0,
            remaining_project_capital_micro_usdc: None,
        }
    }

    #[test]
    fn missing_anchor_blocks_first() {
        let now = Utc::now();
        let mut ctx = base_ctx(now);
        ctx.anchor_configured = false;
        let outcome = gate_outflow(ReconciliationScope::ProjectCapital, &ctx);
        assert_eq!(outcome.blocked_reason(), Some("project_capital_address_missing"));
    }

    #[test]
    fn missing_reconciliation_blocks() {
        let now = Utc::now();
        let mut ctx = base_ctx(now);
        ctx.reconciliation = None;
        let outcome = gate_outflow(ReconciliationScope::ProjectCapital, &ctx);
        assert_eq!(outcome.blocked_reason(), Some("project_capital_reconciliation_missing"));
    }

    #[test]
    fn not_ready_blocks() {
        let now = Utc::now();
        let mut ctx = base_ctx(now);
        let mut report = ready_report(ReconciliationScope::ProjectCapital, now);
        report.ready = false;
        ctx.reconciliation = Some(report);
        let outcome = gate_outflow(ReconciliationScope::ProjectCapital, &ctx);
        assert_eq!(outcome.blocked_reason(), Some("project_capital_not_reconciled"));
    }

    #[test]
    fn stale_reconciliation_blocks() {
        let now = Utc::now();
        let mut ctx = base_ctx(now);
        ctx.reconciliation = Some(ready_report(ReconciliationScope::ProjectCapital, now - chrono::Duration::seconds(7200)));
        let outcome = gate_outflow(ReconciliationScope::ProjectCapital, &ctx);
        assert_eq!(outcome.blocked_reason(), Some("project_capital_reconciliation_stale"));
    }

    #[test]
    fn insufficient_capital_blocks_after_caps() {
        let now = Utc::now();
        let mut ctx = base_ctx(now);
        ctx.remaining_project_capital_micro_usdc = Some(500);
        let outcome = gate_outflow(ReconciliationScope::ProjectCapital, &ctx);
        assert_eq!(outcome.blocked_reason(), Some("insufficient_project_capital"));
    }

    #[test]
    fn fully_satisfied_context_is_allowed() {
        let now = Utc::now();
        let ctx = base_ctx(now);
        assert!(gate_outflow(ReconciliationScope::ProjectCapital, &ctx).is_allowed());
    }

    #[test]
    fn per_day_cap_exceeded_blocks() {
        let now = Utc::now();
        let mut ctx = base_ctx(now);
        ctx.caps.per_day_micro_usdc = Some(1_500);
        ctx.spent_today_micro_usdc = 1_000;
        let outcome = gate_outflow(ReconciliationScope::ProjectCapital, &ctx);
        assert_eq!(outcome.blocked_reason(), Some("project_spend_policy_per_day_exceeded"));
    }
}
