use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// External identity. Capability tags and wallet address are carried for
/// the agent-facing API (out of this subsystem's scope); only credential
/// verification is exercised here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub display_name: String,
    pub capability_tags: Vec<String>,
    pub wallet_address: Option<String>,
    pub api_key_hash: String,
    pub api_key_last4: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}
