pub mod agent;
pub mod audit;
pub mod bounty;
pub mod distribution;
pub mod ledger;
pub mod outbox;
pub mod project;
pub mod reconciliation;
pub mod settlement;
pub mod transfer;

pub use agent::Agent;
pub use audit::{ActorType, AuditEntry, SignatureStatus};
pub use bounty::{Bounty, BountyFundingSource, BountyStatus};
pub use distribution::{DistributionCreation, DistributionExecution, DividendPayout, LifecycleStatus};
pub use ledger::{ExpenseEvent, MarketingFeeAccrualEvent, MarketingFeeBucket, ProjectCapitalEvent, RevenueEvent};
pub use outbox::{GitOutboxTask, GitTaskType, OutboxStatus, TxOutboxTask, TxTaskType};
pub use project::{Project, ProjectStatus};
pub use reconciliation::{BlockedReason, ReconciliationReport, ReconciliationScope};
pub use settlement::Settlement;
pub use transfer::{IndexerCursor, ObservedUsdcTransfer};
