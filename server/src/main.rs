//! Oracle-authenticated HTTP surface (C2/C4/C5/C7/C8/C9/C10 over axum).
//! Startup sequence follows `apps/twzrd-aggregator-rs/src/main.rs`:
//! load `.env`, install structured logging, install the Prometheus
//! recorder, open the Postgres pool, then serve.

mod api;
mod auth;
mod error;
mod state;

use axum::routing::{get, post};
use axum::Router;
use dotenvy::dotenv;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use synod_chain::JsonRpcChainClient;
use synod_core::config::Config;
use synod_core::store::postgres::PostgresStore;
use synod_git::LocalGitHost;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn install_metrics() -> PrometheusHandle {
    PrometheusBuilder::new().install_recorder().expect("install metrics recorder")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::from_default_env()).with(tracing_subscriber::fmt::layer()).init();

    let config = Config::from_env()?;
    let metrics_handle = install_metrics();

    let pool = PgPoolOptions::new().max_connections(config.database_max_connections).connect(&config.database_url).await?;
    sqlx::migrate!("../migrations").run(&pool).await?;

    let chain = JsonRpcChainClient::from_config(&config)?;
    let git = LocalGitHost::from_config(&config);

    let app_state = AppState {
        store: Arc::new(PostgresStore::new(pool)),
        chain: Arc::new(chain),
        git: Arc::new(git),
        config: Arc::new(config.clone()),
        metrics: metrics_handle.clone(),
    };

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/metrics", get(move || async move { metrics_handle.render() }))
        .route("/api/v1/oracle/revenue-events", post(api::ledger::create_revenue_event))
        .route("/api/v1/oracle/expense-events", post(api::ledger::create_expense_event))
        .route("/api/v1/oracle/project-capital-events", post(api::ledger::create_project_capital_event))
        .route("/api/v1/oracle/settlement/:month", post(api::settlement::compute_settlement_handler))
        .route("/api/v1/oracle/reconciliation/:month", post(api::settlement::reconciliation_handler))
        .route("/api/v1/oracle/distributions/:month/create", post(api::settlement::create_distribution_handler))
        .route("/api/v1/oracle/distributions/:month/execute", post(api::settlement::execute_distribution_handler))
        .route("/api/v1/oracle/tx-outbox/claim-next", post(api::outbox::tx_outbox_claim_next))
        .route("/api/v1/oracle/git-outbox/claim-next", post(api::outbox::git_outbox_claim_next))
        .route("/api/v1/oracle/marketing-fee/deposit", post(api::marketing::deposit_marketing_fee))
        .route("/api/v1/oracle/bounties/:bounty_id/mark-paid", post(api::bounty::mark_paid))
        .fallback(api::not_implemented)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse().expect("invalid HOST/PORT");
    info!(%addr, env = %config.env, "listening");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
