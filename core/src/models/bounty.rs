use crate::money::Micro;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BountyStatus {
    Open,
    Claimed,
    Submitted,
    EligibleForPayout,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BountyFundingSource {
    ProjectCapital,
    PlatformRevenue,
}

/// Minimal bounty row. Claim/submit/eligibility transitions belong to an
/// external collaborator; only the `mark_paid` transition, gated through
/// [`crate::policy::gate_outflow`], is implemented here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bounty {
    pub bounty_id: String,
    pub project_id: String,
    pub status: BountyStatus,
    pub funding_source: BountyFundingSource,
    pub amount_micro_usdc: Micro,
    pub claimant_agent_id: Option<String>,
}

impl Bounty {
    pub fn is_eligible_for_payout(&self) -> bool {
        matches!(self.status, BountyStatus::EligibleForPayout)
    }
}
