use crate::money::Micro;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monthly settlement snapshot. Multiple rows may exist for the same
/// month; the latest by `computed_at` is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub profit_month_id: String,
    pub revenue_sum_micro_usdc: Micro,
    pub expense_sum_micro_usdc: Micro,
    pub profit_sum_micro_usdc: Micro,
    pub profit_nonnegative: bool,
    pub computed_at: DateTime<Utc>,
}
