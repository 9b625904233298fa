//! Autonomy loop (C11) — a single-run orchestrator that drives
//! indexer → ledger/accrual → reconciler → settlement → outbox
//! enqueues to completion for one month, idempotently. Grounded on
//! `oracle_runner/cli.py`'s `run-month` command, generalized into one
//! in-process routine (no HTTP hop back into the service it already is).
//!
//! The orchestrator itself only sequences the steps and reports a
//! result; all decision logic lives in [`crate::reconciler`],
//! [`crate::settlement_engine`], [`crate::marketing`] and
//! [`crate::policy`].

use crate::indexer::{run_indexer_tick, ChainClient, IndexerRun};
use crate::marketing::plan_marketing_deposit;
use crate::models::Project;
use crate::money::{Micro, ProfitMonth};
use crate::reconciler::{reconcile_platform, reconcile_project_capital, reconcile_project_revenue};
use crate::settlement_engine::{
    compute_settlement, create_distribution, execute_distribution, month_as_distribution_id, CreateDistributionOutcome, ExecuteDistributionOutcome, ExecuteDistributionRequest,
    MAX_AUTHOR_RECIPIENTS, MAX_STAKER_RECIPIENTS,
};
use crate::store::{IndexerStore, LedgerStore, NonceStore, ReconciliationStore, SettlementStore, TxOutboxStore};
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A weighted recipient entering the distribution-execution synthesis
/// (step 6): either a project originator (author pool) or a capital
/// contributor (staker pool).
#[derive(Debug, Clone)]
pub struct WeightedRecipient {
    pub address: Address,
    pub weight_micro_usdc: Micro,
}

/// Splits `total` proportionally across `pool` (truncated to `cap`
/// entries by descending weight), using the largest-remainder method so
/// shares sum exactly to `total` — the residue from integer division is
/// absorbed by the largest share, per spec.md §4.11 step 6.
pub fn allocate_shares(pool: &[WeightedRecipient], total: Micro, cap: usize) -> Vec<(Address, Micro)> {
    if pool.is_empty() || total <= 0 {
        return vec![];
    }
    let mut ranked: Vec<&WeightedRecipient> = pool.iter().collect();
    ranked.sort_by(|a, b| b.weight_micro_usdc.cmp(&a.weight_micro_usdc));
    ranked.truncate(cap);

    let weight_sum: i128 = ranked.iter().map(|r| r.weight_micro_usdc as i128).sum();
    if weight_sum <= 0 {
        return vec![];
    }

    let mut shares: Vec<(Address, Micro)> = ranked
        .iter()
        .map(|r| ((*r).address, ((r.weight_micro_usdc as i128 * total as i128) / weight_sum) as Micro))
        .collect();

    let allocated: Micro = shares.iter().map(|(_, amount)| *amount).sum();
    let residue = total - allocated;
    if residue != 0 {
        if let Some(first) = shares.first_mut() {
            first.1 += residue;
        }
    }
    shares
}

/// Splits `total` between the staker and author pools in proportion to
/// each pool's aggregate weight, before either pool is itself split
/// proportionally among its members by [`allocate_shares`]. The residue
/// from the top-level split is absorbed by the staker side, mirroring
/// `allocate_shares`'s own residue rule.
fn split_total_between_pools(total: Micro, stakers: &[WeightedRecipient], authors: &[WeightedRecipient]) -> (Micro, Micro) {
    let staker_weight: i128 = stakers.iter().map(|r| r.weight_micro_usdc as i128).sum();
    let author_weight: i128 = authors.iter().map(|r| r.weight_micro_usdc as i128).sum();
    let combined_weight = staker_weight + author_weight;
    if combined_weight <= 0 || total <= 0 {
        return (0, 0);
    }
    let staker_total = ((staker_weight * total as i128) / combined_weight) as Micro;
    (staker_total, total - staker_total)
}

/// Builds the `execute_distribution` recipient payload (step 6): the
/// settled profit is split between the staker and author pools by
/// aggregate weight, then each pool's share is allocated among its own
/// members by [`allocate_shares`], respecting the stakers≤200/authors≤50
/// caps. Σshares always equals `total` exactly.
fn synthesize_distribution_shares(staker_pool: &[WeightedRecipient], author_pool: &[WeightedRecipient], total: Micro) -> (Vec<Address>, Vec<Micro>, Vec<Address>, Vec<Micro>) {
    let (staker_total, author_total) = split_total_between_pools(total, staker_pool, author_pool);
    let (stakers, staker_shares): (Vec<Address>, Vec<Micro>) = allocate_shares(staker_pool, staker_total, MAX_STAKER_RECIPIENTS).into_iter().unzip();
    let (authors, author_shares): (Vec<Address>, Vec<Micro>) = allocate_shares(author_pool, author_total, MAX_AUTHOR_RECIPIENTS).into_iter().unzip();
    (stakers, staker_shares, authors, author_shares)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationOutcome {
    pub scope_id: Option<String>,
    pub ready: bool,
    pub blocked_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub profit_month_id: String,
    pub indexer_inserted: usize,
    pub project_reconciliations: Vec<ReconciliationOutcome>,
    pub platform_ready: bool,
    pub platform_blocked_reason: Option<String>,
    pub profit_sum_micro_usdc: Micro,
    pub create_distribution: Option<String>,
    pub execute_distribution: Option<String>,
    pub marketing_deposit: Option<String>,
    pub payout_pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Indexer,
    Settlement,
    Reconcile,
    CreateDistribution,
    ExecuteDistribution,
    ConfirmPayout,
}

/// Exit-code mapping resolved in spec.md §6/§4.11. `10` supersedes `0`
/// only when the run otherwise succeeded but the payout is still
/// unconfirmed.
pub fn exit_code(stage_error: Option<(RunStage, bool)>, payout_pending: bool) -> i32 {
    match stage_error {
        None if payout_pending => 10,
        None => 0,
        Some((RunStage::Settlement, _)) => 2,
        Some((RunStage::Reconcile, true)) => 3,
        Some((RunStage::Reconcile, false)) => 4,
        Some((RunStage::CreateDistribution, true)) => 5,
        Some((RunStage::CreateDistribution, false)) => 6,
        Some((RunStage::ExecuteDistribution, true)) => 7,
        Some((RunStage::ExecuteDistribution, false)) => 8,
        Some((RunStage::ConfirmPayout, _)) => 9,
        Some((RunStage::Indexer, _)) => 1,
    }
}

fn stage_line(stage: &str, status: &str, detail: Option<&str>) {
    match detail {
        Some(detail) => tracing::info!(target: "autonomy", "stage={stage} status={status} detail={detail}"),
        None => tracing::info!(target: "autonomy", "stage={stage} status={status}"),
    }
}

pub struct AutonomyRun<'a> {
    pub ledger: &'a dyn LedgerStore,
    pub indexer_store: &'a dyn IndexerStore,
    pub reconciliation: &'a dyn ReconciliationStore,
    pub settlement: &'a dyn SettlementStore,
    pub outbox: &'a dyn TxOutboxStore,
    pub nonces: &'a dyn NonceStore,
    pub chain: &'a dyn ChainClient,
    pub tx_outbox_enabled: bool,
    pub token_address: Address,
    pub registry_address: Address,
    pub indexer: IndexerRun,
    pub projects: Vec<Project>,
    pub project_capital_max_age_seconds: i64,
    pub project_revenue_max_age_seconds: i64,
    pub platform_max_age_seconds: i64,
    pub distributor_address: Option<String>,
    pub marketing_treasury_address: Option<Address>,
    /// Capital-contributor pool for step 6's staker share, weighted by
    /// whatever metric the agent/governance surface feeding this run
    /// computed (e.g. capital contributed). Sourced from outside this
    /// subsystem; an empty pool makes `execute_distribution` block on
    /// `share_sum_mismatch` rather than invent recipients.
    pub staker_pool: Vec<WeightedRecipient>,
    /// Project-originator pool for step 6's author share, weighted by
    /// per-project profit share.
    pub author_pool: Vec<WeightedRecipient>,
}

/// Runs every step of spec.md §4.11 for one month, in order, logging a
/// `stage=<name> status=<start|ok|blocked|error>` line per step and
/// returning a summary plus the resolved exit code.
pub async fn run_once(run: &AutonomyRun<'_>, month: &ProfitMonth, now: DateTime<Utc>) -> (RunSummary, i32) {
    stage_line("indexer", "start", None);
    let indexer_inserted = match run_indexer_tick(run.chain, run.indexer_store, &run.indexer).await {
        Ok(outcome) => {
            stage_line("indexer", "ok", Some(&outcome.inserted.to_string()));
            outcome.inserted
        }
        Err(err) => {
            stage_line("indexer", "error", Some(&err.to_string()));
            return (
                RunSummary {
                    profit_month_id: month.as_str().to_string(),
                    indexer_inserted: 0,
                    project_reconciliations: vec![],
                    platform_ready: false,
                    platform_blocked_reason: None,
                    profit_sum_micro_usdc: 0,
                    create_distribution: None,
                    execute_distribution: None,
                    marketing_deposit: None,
                    payout_pending: false,
                },
                exit_code(Some((RunStage::Indexer, false)), false),
            );
        }
    };

    let mut project_reconciliations = Vec::with_capacity(run.projects.len() * 2);
    for project in &run.projects {
        let capital_balance = run.ledger.project_capital_balance(&project.project_id).await.unwrap_or(0);
        let capital_report = reconcile_project_capital(run.reconciliation, Some(run.chain), run.token_address, &project.project_id, project.treasury_address.as_deref(), capital_balance, now)
            .await
            .ok();
        if let Some(report) = capital_report {
            project_reconciliations.push(ReconciliationOutcome { scope_id: report.scope_id, ready: report.ready, blocked_reason: report.blocked_reason });
        }

        let revenue_balance = run.ledger.project_revenue_balance(&project.project_id).await.unwrap_or(0);
        let revenue_report = reconcile_project_revenue(run.reconciliation, Some(run.chain), run.token_address, &project.project_id, project.revenue_address.as_deref(), revenue_balance, now)
            .await
            .ok();
        if let Some(report) = revenue_report {
            project_reconciliations.push(ReconciliationOutcome { scope_id: report.scope_id, ready: report.ready, blocked_reason: report.blocked_reason });
        }
    }
    stage_line("project_reconciliation", "ok", Some(&project_reconciliations.len().to_string()));

    stage_line("settlement", "start", None);
    let settlement = match compute_settlement(run.ledger, run.settlement, month, now).await {
        Ok(settlement) => {
            stage_line("settlement", "ok", Some(&settlement.profit_sum_micro_usdc.to_string()));
            settlement
        }
        Err(err) => {
            stage_line("settlement", "error", Some(&err.to_string()));
            return (
                RunSummary {
                    profit_month_id: month.as_str().to_string(),
                    indexer_inserted,
                    project_reconciliations,
                    platform_ready: false,
                    platform_blocked_reason: None,
                    profit_sum_micro_usdc: 0,
                    create_distribution: None,
                    execute_distribution: None,
                    marketing_deposit: None,
                    payout_pending: false,
                },
                exit_code(Some((RunStage::Settlement, false)), false),
            );
        }
    };

    stage_line("reconcile", "start", None);
    let platform_report = match reconcile_platform(run.reconciliation, Some(run.chain), run.token_address, month.as_str(), run.distributor_address.as_deref(), settlement.profit_sum_micro_usdc, now).await {
        Ok(report) => report,
        Err(err) => {
            stage_line("reconcile", "error", Some(&err.to_string()));
            return (
                RunSummary {
                    profit_month_id: month.as_str().to_string(),
                    indexer_inserted,
                    project_reconciliations,
                    platform_ready: false,
                    platform_blocked_reason: None,
                    profit_sum_micro_usdc: settlement.profit_sum_micro_usdc,
                    create_distribution: None,
                    execute_distribution: None,
                    marketing_deposit: None,
                    payout_pending: false,
                },
                exit_code(Some((RunStage::Reconcile, true)), false),
            );
        }
    };

    if platform_report.ready {
        stage_line("reconcile", "ok", None);
    } else {
        stage_line("reconcile", "blocked", platform_report.blocked_reason.as_deref());
    }

    let mut create_distribution_outcome = None;
    if platform_report.ready {
        stage_line("create_distribution", "start", None);
        match create_distribution(run.reconciliation, run.outbox, run.settlement, run.nonces, run.chain, run.tx_outbox_enabled, run.registry_address, month, settlement.profit_sum_micro_usdc, now).await {
            Ok(CreateDistributionOutcome::Enqueued { task_id, .. }) => {
                stage_line("create_distribution", "ok", Some(&task_id));
                create_distribution_outcome = Some(format!("enqueued:{task_id}"));
            }
            Ok(CreateDistributionOutcome::ExecutedSynchronously { tx_hash, already_done, .. }) => {
                let detail = tx_hash.as_deref().unwrap_or(if already_done { "already_done" } else { "" });
                stage_line("create_distribution", "ok", Some(detail));
                create_distribution_outcome = Some(format!("executed:{detail}"));
            }
            Ok(CreateDistributionOutcome::AlreadyExists) => {
                stage_line("create_distribution", "ok", Some("already_exists"));
                create_distribution_outcome = Some("already_exists".to_string());
            }
            Ok(CreateDistributionOutcome::Blocked { blocked_reason }) => {
                stage_line("create_distribution", "blocked", Some(&blocked_reason));
                create_distribution_outcome = Some(format!("blocked:{blocked_reason}"));
            }
            Err(err) => {
                stage_line("create_distribution", "error", Some(&err.to_string()));
                return (
                    RunSummary {
                        profit_month_id: month.as_str().to_string(),
                        indexer_inserted,
                        project_reconciliations,
                        platform_ready: platform_report.ready,
                        platform_blocked_reason: platform_report.blocked_reason.clone(),
                        profit_sum_micro_usdc: settlement.profit_sum_micro_usdc,
                        create_distribution: None,
                        execute_distribution: None,
                        marketing_deposit: None,
                        payout_pending: false,
                    },
                    exit_code(Some((RunStage::CreateDistribution, false)), false),
                );
            }
        }
    }

    let mut execute_distribution_outcome = None;
    let mut payout_pending = true;
    if platform_report.ready {
        stage_line("execute_distribution", "start", None);
        match run.settlement.get_distribution_creation(month.as_str()).await {
            Ok(Some(creation)) => {
                let (stakers, staker_shares, authors, author_shares) = synthesize_distribution_shares(&run.staker_pool, &run.author_pool, settlement.profit_sum_micro_usdc);
                let request = ExecuteDistributionRequest {
                    month: month.clone(),
                    registry: run.registry_address,
                    distribution_creation_id: creation.distribution_id.clone(),
                    profit_sum_micro_usdc: settlement.profit_sum_micro_usdc,
                    stakers,
                    staker_shares,
                    authors,
                    author_shares,
                };
                match execute_distribution(run.outbox, run.settlement, run.nonces, run.chain, run.tx_outbox_enabled, request, now).await {
                    Ok(ExecuteDistributionOutcome::Enqueued { task_id, .. }) => {
                        stage_line("execute_distribution", "ok", Some(&task_id));
                        execute_distribution_outcome = Some(format!("enqueued:{task_id}"));
                    }
                    Ok(ExecuteDistributionOutcome::ExecutedSynchronously { tx_hash, already_done, .. }) => {
                        let detail = tx_hash.as_deref().unwrap_or(if already_done { "already_done" } else { "" });
                        stage_line("execute_distribution", "ok", Some(detail));
                        execute_distribution_outcome = Some(format!("executed:{detail}"));
                    }
                    Ok(ExecuteDistributionOutcome::AlreadyDistributed) => {
                        stage_line("execute_distribution", "ok", Some("already_distributed"));
                        execute_distribution_outcome = Some("already_distributed".to_string());
                    }
                    Ok(ExecuteDistributionOutcome::Blocked { blocked_reason }) => {
                        stage_line("execute_distribution", "blocked", Some(&blocked_reason));
                        execute_distribution_outcome = Some(format!("blocked:{blocked_reason}"));
                    }
                    Err(err) => {
                        stage_line("execute_distribution", "error", Some(&err.to_string()));
                        return (
                            RunSummary {
                                profit_month_id: month.as_str().to_string(),
                                indexer_inserted,
                                project_reconciliations,
                                platform_ready: platform_report.ready,
                                platform_blocked_reason: platform_report.blocked_reason.clone(),
                                profit_sum_micro_usdc: settlement.profit_sum_micro_usdc,
                                create_distribution: create_distribution_outcome,
                                execute_distribution: None,
                                marketing_deposit: None,
                                payout_pending: true,
                            },
                            exit_code(Some((RunStage::ExecuteDistribution, true)), true),
                        );
                    }
                }
            }
            Ok(None) => {
                stage_line("execute_distribution", "blocked", Some("distribution_not_yet_created"));
                execute_distribution_outcome = Some("blocked:distribution_not_yet_created".to_string());
            }
            Err(err) => {
                stage_line("execute_distribution", "error", Some(&err.to_string()));
                return (
                    RunSummary {
                        profit_month_id: month.as_str().to_string(),
                        indexer_inserted,
                        project_reconciliations,
                        platform_ready: platform_report.ready,
                        platform_blocked_reason: platform_report.blocked_reason.clone(),
                        profit_sum_micro_usdc: settlement.profit_sum_micro_usdc,
                        create_distribution: create_distribution_outcome,
                        execute_distribution: None,
                        marketing_deposit: None,
                        payout_pending: true,
                    },
                    exit_code(Some((RunStage::ExecuteDistribution, true)), true),
                );
            }
        }

        stage_line("confirm_payout", "start", None);
        match month_as_distribution_id(month) {
            Ok(distribution_id) => match run.chain.get_distribution(run.registry_address, distribution_id).await {
                Ok(view) => {
                    payout_pending = !(view.exists && view.distributed_micro_usdc >= settlement.profit_sum_micro_usdc);
                    stage_line("confirm_payout", if payout_pending { "pending" } else { "ok" }, None);
                }
                Err(err) => {
                    stage_line("confirm_payout", "error", Some(&err.to_string()));
                    return (
                        RunSummary {
                            profit_month_id: month.as_str().to_string(),
                            indexer_inserted,
                            project_reconciliations,
                            platform_ready: platform_report.ready,
                            platform_blocked_reason: platform_report.blocked_reason.clone(),
                            profit_sum_micro_usdc: settlement.profit_sum_micro_usdc,
                            create_distribution: create_distribution_outcome,
                            execute_distribution: execute_distribution_outcome,
                            marketing_deposit: None,
                            payout_pending: true,
                        },
                        exit_code(Some((RunStage::ConfirmPayout, true)), true),
                    );
                }
            },
            Err(err) => {
                stage_line("confirm_payout", "error", Some(&err.to_string()));
                return (
                    RunSummary {
                        profit_month_id: month.as_str().to_string(),
                        indexer_inserted,
                        project_reconciliations,
                        platform_ready: platform_report.ready,
                        platform_blocked_reason: platform_report.blocked_reason.clone(),
                        profit_sum_micro_usdc: settlement.profit_sum_micro_usdc,
                        create_distribution: create_distribution_outcome,
                        execute_distribution: execute_distribution_outcome,
                        marketing_deposit: None,
                        payout_pending: true,
                    },
                    exit_code(Some((RunStage::ConfirmPayout, true)), true),
                );
            }
        }
    }

    let mut marketing_deposit_outcome = None;
    if let Some(treasury) = run.marketing_treasury_address {
        stage_line("marketing_deposit", "start", None);
        match plan_marketing_deposit(run.ledger, run.outbox, run.settlement, run.nonces, run.chain, run.tx_outbox_enabled, treasury, now).await {
            Ok(outcome) => {
                let label = match outcome {
                    crate::marketing::MarketingDepositOutcome::AlreadyFunded => "already_funded".to_string(),
                    crate::marketing::MarketingDepositOutcome::Enqueued { task_id, .. } => format!("enqueued:{task_id}"),
                    crate::marketing::MarketingDepositOutcome::ExecutedSynchronously { tx_hash, already_done, .. } => {
                        format!("executed:{}", tx_hash.as_deref().unwrap_or(if already_done { "already_done" } else { "" }))
                    }
                };
                stage_line("marketing_deposit", "ok", Some(&label));
                marketing_deposit_outcome = Some(label);
            }
            Err(err) => stage_line("marketing_deposit", "error", Some(&err.to_string())),
        }
    }

    let ready = platform_report.ready;
    let summary = RunSummary {
        profit_month_id: month.as_str().to_string(),
        indexer_inserted,
        project_reconciliations,
        platform_ready: ready,
        platform_blocked_reason: platform_report.blocked_reason,
        profit_sum_micro_usdc: settlement.profit_sum_micro_usdc,
        create_distribution: create_distribution_outcome,
        execute_distribution: execute_distribution_outcome,
        marketing_deposit: marketing_deposit_outcome,
        payout_pending,
    };
    let code = if !ready { exit_code(Some((RunStage::Reconcile, false)), false) } else { exit_code(None, payout_pending) };
    (summary, code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(byte: u8, weight: Micro) -> WeightedRecipient {
        let mut bytes = [0u8; 20];
        bytes[19] = byte;
        WeightedRecipient { address: Address::from(bytes), weight_micro_usdc: weight }
    }

    #[test]
    fn shares_sum_exactly_to_total_with_rounding_residue_on_largest() {
        let pool = vec![recipient(1, 100), recipient(2, 100), recipient(3, 100)];
        let shares = allocate_shares(&pool, 100, 200);
        let sum: Micro = shares.iter().map(|(_, amount)| *amount).sum();
        assert_eq!(sum, 100);
    }

    #[test]
    fn pool_is_capped() {
        let pool: Vec<WeightedRecipient> = (0..250).map(|i| recipient(i as u8, (i + 1) as Micro)).collect();
        let shares = allocate_shares(&pool, 1_000_000, 200);
        assert_eq!(shares.len(), 200);
    }

    #[test]
    fn empty_pool_yields_no_shares() {
        assert!(allocate_shares(&[], 100, 50).is_empty());
    }

    #[test]
    fn exit_code_maps_success_and_pending_payout() {
        assert_eq!(exit_code(None, false), 0);
        assert_eq!(exit_code(None, true), 10);
    }

    #[test]
    fn exit_code_maps_each_stage_failure() {
        assert_eq!(exit_code(Some((RunStage::Settlement, false)), false), 2);
        assert_eq!(exit_code(Some((RunStage::Reconcile, true)), false), 3);
        assert_eq!(exit_code(Some((RunStage::Reconcile, false)), false), 4);
        assert_eq!(exit_code(Some((RunStage::CreateDistribution, true)), false), 5);
        assert_eq!(exit_code(Some((RunStage::CreateDistribution, false)), false), 6);
        assert_eq!(exit_code(Some((RunStage::ExecuteDistribution, true)), false), 7);
        assert_eq!(exit_code(Some((RunStage::ExecuteDistribution, false)), false), 8);
        assert_eq!(exit_code(Some((RunStage::ConfirmPayout, false)), false), 9);
    }

    #[test]
    fn pool_split_divides_total_by_aggregate_weight_with_residue_on_stakers() {
        let stakers = vec![recipient(1, 100)];
        let authors = vec![recipient(2, 300)];
        let (staker_total, author_total) = split_total_between_pools(100, &stakers, &authors);
        assert_eq!(staker_total + author_total, 100);
        assert_eq!(staker_total, 25);
        assert_eq!(author_total, 75);
    }

    #[test]
    fn pool_split_is_zero_when_both_pools_are_empty() {
        assert_eq!(split_total_between_pools(1_000, &[], &[]), (0, 0));
    }

    #[test]
    fn synthesized_shares_sum_exactly_to_total_across_both_pools() {
        let stakers = vec![recipient(1, 100), recipient(2, 200)];
        let authors = vec![recipient(3, 50)];
        let (addrs, staker_shares, author_addrs, author_shares) = synthesize_distribution_shares(&stakers, &authors, 1_000);
        assert_eq!(addrs.len(), staker_shares.len());
        assert_eq!(author_addrs.len(), author_shares.len());
        let sum: Micro = staker_shares.iter().chain(author_shares.iter()).sum();
        assert_eq!(sum, 1_000);
    }

    #[test]
    fn synthesized_shares_are_empty_when_no_recipients_are_known() {
        let (addrs, staker_shares, author_addrs, author_shares) = synthesize_distribution_shares(&[], &[], 1_000);
        assert!(addrs.is_empty() && staker_shares.is_empty() && author_addrs.is_empty() && author_shares.is_empty());
    }
}
