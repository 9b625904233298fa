//! Shared application state, following `apps/twzrd-aggregator-rs/src/
//! state.rs`'s pattern of a single `Clone`-able struct handed to every
//! handler via axum's `State` extractor.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use synod_core::config::Config;
use synod_core::store::postgres::PostgresStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PostgresStore>,
    pub chain: Arc<dyn synod_core::indexer::ChainClient>,
    pub git: Arc<dyn synod_core::git_outbox::GitHost>,
    pub config: Arc<Config>,
    pub metrics: PrometheusHandle,
}
