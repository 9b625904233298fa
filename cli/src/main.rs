//! Operator CLI (C11 driver). Runs the same routines the HTTP surface
//! exposes, but in-process against a directly-constructed `Config`/
//! `PostgresStore`/`ChainClient`/`GitHost` — there is no oracle-auth
//! gate here because the caller is the trusted local operator, not an
//! HTTP client. Audit rows written from here use `ActorType::System`
//! with `SignatureStatus::NotApplicable`. Grounded on
//! `oracle_runner/cli.py` and `rust-packages/twzrd-cli/src/main.rs`'s
//! `clap::{Parser, Subcommand}` shape.

use alloy_primitives::Address;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use synod_chain::JsonRpcChainClient;
use synod_core::audit;
use synod_core::autonomy::{run_once, AutonomyRun};
use synod_core::config::Config;
use synod_core::git_outbox::{self, GitWorkerOutcome};
use synod_core::ids::expense_event_id;
use synod_core::indexer::{ChainClient, IndexerRun};
use synod_core::marketing::{plan_marketing_deposit, MarketingDepositOutcome};
use synod_core::models::{ActorType, ExpenseEvent, ReconciliationScope, SignatureStatus};
use synod_core::money::ProfitMonth;
use synod_core::policy::{gate_outflow, GateContext, GateOutcome, SpendCaps};
use synod_core::store::postgres::PostgresStore;
use synod_core::store::{AuditStore, BountyStore, LedgerStore, ReconciliationStore, TxOutboxStore};
use synod_core::tx_outbox::{self, TxWorkerOutcome};
use synod_git::LocalGitHost;

#[derive(Parser)]
#[command(name = "synod-cli", about = "Operator CLI for the settlement/reconciliation control plane")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drives indexer -> ledger -> reconciler -> settlement -> outbox
    /// enqueues to completion for one profit month.
    RunMonth {
        #[arg(long)]
        month: String,
    },
    /// Claims and executes one tx-outbox task.
    ClaimTxOutbox {
        #[arg(long)]
        worker_id: String,
    },
    /// Claims and executes one git-outbox task.
    ClaimGitOutbox {
        #[arg(long)]
        worker_id: String,
    },
    /// Tops up the marketing-fee treasury gap, if any.
    DepositMarketingFee,
    /// Pushes a bounty through the spend-policy gate and marks it paid.
    MarkPaid {
        #[arg(long)]
        bounty_id: String,
    },
}

async fn connect(config: &Config) -> anyhow::Result<PostgresStore> {
    let pool = PgPoolOptions::new().max_connections(config.database_max_connections).connect(&config.database_url).await?;
    sqlx::migrate!("../migrations").run(&pool).await?;
    Ok(PostgresStore::new(pool))
}

fn token_address(config: &Config) -> anyhow::Result<Address> {
    config.usdc_address.as_deref().ok_or_else(|| anyhow::anyhow!("usdc_address_not_configured"))?.parse().map_err(|_| anyhow::anyhow!("usdc_address_invalid"))
}

fn system_audit_entry(path: &str, idempotency_key: Option<String>, now: chrono::DateTime<Utc>) -> synod_core::models::AuditEntry {
    audit::new_entry(ActorType::System, None, "CLI", path, idempotency_key, String::new(), SignatureStatus::NotApplicable, None, now)
}

async fn run_month(config: Config, month: String) -> anyhow::Result<i32> {
    let store = connect(&config).await?;
    let chain = JsonRpcChainClient::from_config(&config)?;
    let token = token_address(&config)?;
    let registry: Address = config
        .dividend_distributor_contract_address
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("dividend_distributor_contract_address_not_configured"))?
        .parse()
        .map_err(|_| anyhow::anyhow!("dividend_distributor_contract_address_invalid"))?;
    let parsed_month = ProfitMonth::parse(&month).map_err(|_| anyhow::anyhow!("invalid_profit_month_id:{month}"))?;
    let projects = store.list_active_projects().await?;

    let run = AutonomyRun {
        ledger: &store,
        indexer_store: &store,
        reconciliation: &store,
        settlement: &store,
        outbox: &store,
        nonces: &store,
        chain: &chain,
        tx_outbox_enabled: config.tx_outbox_enabled,
        token_address: token,
        registry_address: registry,
        indexer: IndexerRun {
            cursor_key: "platform".to_string(),
            chain_id: chain.chain_id().await.unwrap_or(0),
            token_address: token,
            watched_addresses: projects.iter().filter_map(|p| p.treasury_address.as_deref().and_then(|a| a.parse().ok())).collect(),
            confirmations: 12,
        },
        projects,
        project_capital_max_age_seconds: config.project_capital_reconciliation_max_age_seconds,
        project_revenue_max_age_seconds: config.project_revenue_reconciliation_max_age_seconds,
        platform_max_age_seconds: config.platform_reconciliation_max_age_seconds,
        distributor_address: config.dividend_distributor_contract_address.clone(),
        marketing_treasury_address: config.marketing_treasury_address.as_deref().and_then(|a| a.parse().ok()),
        // The staker/author recipient pools are computed by the governance
        // surface this CLI does not yet have a registry query for; until
        // one exists, execute_distribution blocks on share_sum_mismatch
        // rather than run with invented recipients.
        staker_pool: vec![],
        author_pool: vec![],
    };

    let now = Utc::now();
    let (summary, code) = run_once(&run, &parsed_month, now).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let entry = system_audit_entry(&format!("cli:run-month:{month}"), None, now);
    let _ = store.append(entry).await;

    Ok(code)
}

async fn claim_tx_outbox(config: Config, worker_id: String) -> anyhow::Result<i32> {
    let store = connect(&config).await?;
    let chain = JsonRpcChainClient::from_config(&config)?;
    let now = Utc::now();
    let outcome = tx_outbox::process_next(&store, &store, &chain, &worker_id, config.tx_outbox_lock_ttl_seconds).await?;
    let (detail, code) = match &outcome {
        TxWorkerOutcome::NoTasks => ("no_tasks".to_string(), 0),
        TxWorkerOutcome::RaceLost => ("race_lost".to_string(), 1),
        TxWorkerOutcome::Succeeded { task_id, tx_hash } => (format!("succeeded:{task_id}:{tx_hash:?}"), 0),
        TxWorkerOutcome::Retrying { task_id, requeued_task_id, hint } => (format!("retrying:{task_id}:requeued={requeued_task_id}:{hint}"), 1),
        TxWorkerOutcome::Blocked { task_id, hint } => (format!("blocked:{task_id}:{hint}"), 1),
    };
    println!("{detail}");
    let _ = store.append(system_audit_entry("cli:claim-tx-outbox", Some(worker_id), now)).await;
    Ok(code)
}

async fn claim_git_outbox(config: Config, worker_id: String) -> anyhow::Result<i32> {
    let store = connect(&config).await?;
    let git = LocalGitHost::from_config(&config);
    let now = Utc::now();
    let outcome = git_outbox::process_next(&store, &git, &worker_id, config.tx_outbox_lock_ttl_seconds).await?;
    let (detail, code) = match &outcome {
        GitWorkerOutcome::NoTasks => ("no_tasks".to_string(), 0),
        GitWorkerOutcome::RaceLost => ("race_lost".to_string(), 1),
        GitWorkerOutcome::Succeeded { task_id } => (format!("succeeded:{task_id}"), 0),
        GitWorkerOutcome::Failed { task_id, hint } => (format!("failed:{task_id}:{hint}"), 1),
    };
    println!("{detail}");
    let _ = store.append(system_audit_entry("cli:claim-git-outbox", Some(worker_id), now)).await;
    Ok(code)
}

async fn deposit_marketing_fee(config: Config) -> anyhow::Result<i32> {
    let store = connect(&config).await?;
    let chain = JsonRpcChainClient::from_config(&config)?;
    let treasury: Address = config
        .marketing_treasury_address
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("marketing_treasury_address_not_configured"))?
        .parse()
        .map_err(|_| anyhow::anyhow!("marketing_treasury_address_invalid"))?;
    let now = Utc::now();
    let outcome = plan_marketing_deposit(&store, &store, &store, &store, &chain, config.tx_outbox_enabled, treasury, now).await?;
    let (idempotency_key, detail, code) = match &outcome {
        MarketingDepositOutcome::AlreadyFunded => (None, "already_funded".to_string(), 0),
        MarketingDepositOutcome::Enqueued { task_id, idempotency_key, .. } => (Some(idempotency_key.clone()), format!("enqueued:{task_id}"), 0),
        MarketingDepositOutcome::ExecutedSynchronously { idempotency_key, tx_hash, already_done } => {
            (Some(idempotency_key.clone()), format!("executed:{}:{}", tx_hash.as_deref().unwrap_or("-"), already_done), 0)
        }
    };
    println!("{detail}");
    let _ = store.append(system_audit_entry("cli:deposit-marketing-fee", idempotency_key, now)).await;
    Ok(code)
}

async fn mark_paid(config: Config, bounty_id: String) -> anyhow::Result<i32> {
    let store = connect(&config).await?;
    let now = Utc::now();

    let bounty = store.get_bounty(&bounty_id).await?.ok_or_else(|| anyhow::anyhow!("bounty_not_found:{bounty_id}"))?;
    if !bounty.is_eligible_for_payout() {
        anyhow::bail!("bounty_not_eligible:{bounty_id}");
    }

    let (scope, gate_ctx) = match bounty.funding_source {
        synod_core::models::BountyFundingSource::ProjectCapital => {
            let project = store.get_project(&bounty.project_id).await?.ok_or_else(|| anyhow::anyhow!("project_not_found:{}", bounty.project_id))?;
            let reconciliation = store.latest_report(ReconciliationScope::ProjectCapital, Some(&bounty.project_id), None).await?;
            let remaining = store.project_capital_balance(&bounty.project_id).await?;
            (
                ReconciliationScope::ProjectCapital,
                GateContext {
                    anchor_configured: project.treasury_address.is_some(),
                    reconciliation,
                    now,
                    max_age_seconds: config.project_capital_reconciliation_max_age_seconds,
                    amount_micro_usdc: bounty.amount_micro_usdc,
                    caps: SpendCaps::default(),
                    spent_on_this_outflow_micro_usdc: 0,
                    spent_today_micro_usdc: 0,
                    spent_this_month_micro_usdc: 0,
                    remaining_project_capital_micro_usdc: Some(remaining),
                },
            )
        }
        synod_core::models::BountyFundingSource::PlatformRevenue => {
            let reconciliation = store.latest_report(ReconciliationScope::Platform, None, None).await?;
            (
                ReconciliationScope::Platform,
                GateContext {
                    anchor_configured: config.dividend_distributor_contract_address.is_some(),
                    reconciliation,
                    now,
                    max_age_seconds: config.platform_reconciliation_max_age_seconds,
                    amount_micro_usdc: bounty.amount_micro_usdc,
                    caps: SpendCaps::default(),
                    spent_on_this_outflow_micro_usdc: 0,
                    spent_today_micro_usdc: 0,
                    spent_this_month_micro_usdc: 0,
                    remaining_project_capital_micro_usdc: None,
                },
            )
        }
    };

    let outcome = gate_outflow(scope, &gate_ctx);
    let idempotency_key = format!("bounty_mark_paid:{bounty_id}");
    let path = format!("cli:mark-paid:{bounty_id}");

    match outcome {
        GateOutcome::Blocked { blocked_reason } => {
            println!("blocked:{blocked_reason}");
            let mut entry = system_audit_entry(&path, None, now);
            entry = audit::with_error_hint(entry, &audit::gate_block_hint(&blocked_reason));
            let _ = store.append(entry).await;
            Ok(1)
        }
        GateOutcome::Allowed => {
            let event = ExpenseEvent {
                event_id: expense_event_id(),
                profit_month_id: now.format("%Y%m").to_string(),
                project_id: Some(bounty.project_id.clone()),
                amount_micro_usdc: bounty.amount_micro_usdc,
                tx_hash: None,
                source: "bounty_payout".to_string(),
                category: Some("bounty".to_string()),
                idempotency_key: idempotency_key.clone(),
                evidence_url: None,
                created_at: now,
            };
            let entry = system_audit_entry(&path, Some(idempotency_key), now);
            store.append_expense_event(event, entry).await?;
            store.mark_paid(&bounty_id).await?;
            println!("paid:{bounty_id}");
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let code = match cli.command {
        Commands::RunMonth { month } => run_month(config, month).await?,
        Commands::ClaimTxOutbox { worker_id } => claim_tx_outbox(config, worker_id).await?,
        Commands::ClaimGitOutbox { worker_id } => claim_git_outbox(config, worker_id).await?,
        Commands::DepositMarketingFee => deposit_marketing_fee(config).await?,
        Commands::MarkPaid { bounty_id } => mark_paid(config, bounty_id).await?,
    };

    std::process::exit(code);
}
