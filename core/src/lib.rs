//! Domain library for the settlement, reconciliation and outbox control
//! plane: the append-only ledger (C2), the observed-transfer indexer
//! (C3), the reconciler (C4), the settlement engine (C5), the
//! fail-closed spend-policy gate (C6), the transaction and git outboxes
//! (C7/C8), marketing-fee accrual (C9), the oracle HMAC gate (C10), the
//! autonomy loop (C11) and the audit log (C12).
//!
//! No I/O framework dependency beyond `sqlx` (behind the `postgres`
//! feature) and `async-trait`; chain/git I/O are abstracted behind the
//! `ChainClient`/`GitHost` traits implemented by the sibling `chain` and
//! `git` crates.

pub mod audit;
pub mod autonomy;
pub mod config;
pub mod crypto;
pub mod error;
pub mod git_outbox;
pub mod idempotency;
pub mod ids;
pub mod indexer;
pub mod marketing;
pub mod models;
pub mod money;
pub mod oracle;
pub mod policy;
pub mod reconciler;
pub mod settlement_engine;
pub mod store;
pub mod tx_outbox;

pub use error::{Error, Result};
