//! Environment-driven configuration, loaded once at startup. Normalization
//! rules (trim, blank-or-placeholder => `None`) follow
//! `backend/src/core/config.py`.

use crate::error::{Error, Result};

fn normalized(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("none") && !v.eq_ignore_ascii_case("null"))
}

fn normalized_or(key: &str, default: &str) -> String {
    normalized(key).unwrap_or_else(|| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    normalized(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn parsed_bool(key: &str, default: bool) -> bool {
    match normalized(key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app_version: String,
    pub env: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub host: String,
    pub port: u16,

    pub oracle_hmac_secret: Option<String>,
    pub oracle_request_ttl_seconds: i64,
    pub oracle_clock_skew_seconds: i64,
    pub oracle_accept_legacy_signatures: bool,

    pub base_sepolia_rpc_url: Option<String>,
    pub usdc_address: Option<String>,
    pub dividend_distributor_contract_address: Option<String>,
    pub oracle_signer_private_key: Option<String>,
    pub safe_owner_address: Option<String>,
    pub safe_owner_keys_file: Option<String>,
    pub contracts_dir: String,

    pub project_capital_reconciliation_max_age_seconds: i64,
    pub project_revenue_reconciliation_max_age_seconds: i64,
    pub platform_reconciliation_max_age_seconds: i64,

    pub tx_outbox_enabled: bool,
    pub tx_outbox_lock_ttl_seconds: i64,

    pub marketing_fee_bps: u32,
    pub marketing_treasury_address: Option<String>,

    pub git_repo_dir: String,
    pub git_repo_slug: Option<String>,
    pub git_base_branch: String,
}

impl Config {
    /// Loads configuration from the process environment (after `.env` has
    /// been applied by the caller via `dotenvy::dotenv()`). Refuses to
    /// produce a config with no `DATABASE_URL` — operator-fatal per
    /// spec.md §7.
    pub fn from_env() -> Result<Self> {
        let database_url = normalized("DATABASE_URL").ok_or_else(|| Error::ChainConfig("DATABASE_URL is required".to_string()))?;

        Ok(Config {
            app_version: normalized_or("APP_VERSION", "0.0.0"),
            env: normalized_or("ENV", "development"),
            database_url,
            database_max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 10),
            host: normalized_or("HOST", "0.0.0.0"),
            port: parsed_or("PORT", 8080),

            oracle_hmac_secret: normalized("ORACLE_HMAC_SECRET"),
            oracle_request_ttl_seconds: parsed_or("ORACLE_REQUEST_TTL_SECONDS", 300),
            oracle_clock_skew_seconds: parsed_or("ORACLE_CLOCK_SKEW_SECONDS", 5),
            oracle_accept_legacy_signatures: parsed_bool("ORACLE_ACCEPT_LEGACY_SIGNATURES", false),

            base_sepolia_rpc_url: normalized("BASE_SEPOLIA_RPC_URL"),
            usdc_address: normalized("USDC_ADDRESS"),
            dividend_distributor_contract_address: normalized("DIVIDEND_DISTRIBUTOR_CONTRACT_ADDRESS"),
            oracle_signer_private_key: normalized("ORACLE_SIGNER_PRIVATE_KEY"),
            safe_owner_address: normalized("SAFE_OWNER_ADDRESS"),
            safe_owner_keys_file: normalized("SAFE_OWNER_KEYS_FILE"),
            contracts_dir: normalized_or("CONTRACTS_DIR", "."),

            project_capital_reconciliation_max_age_seconds: parsed_or("PROJECT_CAPITAL_RECONCILIATION_MAX_AGE_SECONDS", 3600),
            project_revenue_reconciliation_max_age_seconds: parsed_or("PROJECT_REVENUE_RECONCILIATION_MAX_AGE_SECONDS", 3600),
            platform_reconciliation_max_age_seconds: parsed_or("PLATFORM_RECONCILIATION_MAX_AGE_SECONDS", 3600),

            tx_outbox_enabled: parsed_bool("TX_OUTBOX_ENABLED", true),
            tx_outbox_lock_ttl_seconds: parsed_or("TX_OUTBOX_LOCK_TTL_SECONDS", 300),

            marketing_fee_bps: parsed_or("MARKETING_FEE_BPS", 0),
            marketing_treasury_address: normalized("MARKETING_TREASURY_ADDRESS"),

            git_repo_dir: normalized_or("GIT_REPO_DIR", "."),
            git_repo_slug: normalized("GIT_REPO_SLUG"),
            git_base_branch: normalized_or("GIT_BASE_BRANCH", "main"),
        })
    }

    pub fn safe_mode_enabled(&self) -> bool {
        self.safe_owner_address.is_some() && self.safe_owner_keys_file.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn refuses_without_database_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("DATABASE_URL");
        assert!(Config::from_env().is_err());
    }

    #[test]
    fn blank_and_placeholder_values_normalize_to_none() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("DATABASE_URL", "postgres://x/y");
        std::env::set_var("ORACLE_HMAC_SECRET", "   ");
        std::env::set_var("USDC_ADDRESS", "None");
        let config = Config::from_env().unwrap();
        assert_eq!(config.oracle_hmac_secret, None);
        assert_eq!(config.usdc_address, None);
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("ORACLE_HMAC_SECRET");
        std::env::remove_var("USDC_ADDRESS");
    }

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("DATABASE_URL", "postgres://x/y");
        std::env::remove_var("ORACLE_ACCEPT_LEGACY_SIGNATURES");
        let config = Config::from_env().unwrap();
        assert!(!config.oracle_accept_legacy_signatures);
        assert_eq!(config.oracle_request_ttl_seconds, 300);
        std::env::remove_var("DATABASE_URL");
    }
}
