//! Claim-and-distribution engine for the drip faucet
//!
//! A claim checks the user's cooldown, confirms the faucet's balance with the
//! ledger authority, signs a transfer, submits it to the authority's intake
//! queue and records the result, all under a per-faucet lease lock:
//! - `eligibility`: cooldown decision
//! - `lock`: lease-based mutual exclusion
//! - `oracle` / `mempool` / `rpc`: the authority boundary
//! - `ledger` / `database`: faucet statistics, user claim state, intents
//! - `service`: the orchestrator

pub mod api;
pub mod clock;
pub mod config;
pub mod database;
pub mod eligibility;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod lock;
pub mod mempool;
pub mod metrics;
pub mod oracle;
pub mod rpc;
pub mod service;

pub use config::FaucetConfig;
pub use database::SledLedger;
pub use error::{FaucetError, FaucetResult};
pub use ledger::{
    ClaimRecord, FaucetAccount, LedgerStore, MemoryLedger, UserAccount, UserClaimState,
};
pub use service::{ClaimPolicy, ClaimResult, FaucetDeps, FaucetHandle, FaucetService, FaucetStatus};
