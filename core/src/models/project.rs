use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Fundraising,
    Active,
    Paused,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub slug: String,
    pub name: String,
    pub status: ProjectStatus,
    /// Capital destination; absence blocks any capital-scope reconciliation.
    pub treasury_address: Option<String>,
    /// Customer inflow destination; absence blocks revenue-scope reconciliation.
    pub revenue_address: Option<String>,
    pub monthly_budget_micro_usdc: Option<i64>,
}
