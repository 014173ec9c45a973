//! Distribution ledger: faucet statistics, user claim state and claim intents

use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use drip_common::types::{Address, Hash};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Aggregate statistics for one faucet (one per chain)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetAccount {
    pub chain_id: u64,
    /// Lifetime amount distributed, fees included
    pub total_distributed: u128,
    pub total_transactions: u64,
    /// Amount distributed on the last active UTC day before today
    pub previous_day_rate: u128,
    /// Running figure for the current day, equal to `today_distributed`
    pub distribution_rate_per_day: u128,
    pub today_distributed: u128,
    pub today_transactions: u64,
    /// Day (midnight UTC) of the last recorded claim
    pub last_modified_at: Option<DateTime<Utc>>,
    /// Last transfer nonce issued; doubles as the faucet's sequence token
    pub last_nonce: u64,
}

impl FaucetAccount {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            total_distributed: 0,
            total_transactions: 0,
            previous_day_rate: 0,
            distribution_rate_per_day: 0,
            today_distributed: 0,
            today_transactions: 0,
            last_modified_at: None,
            last_nonce: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub amount: u128,
    pub tx_hash: Option<Hash>,
}

/// Cooldown state and history for one claimant. `None` timestamps mean the
/// user has never claimed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaimState {
    pub last_claim: Option<DateTime<Utc>>,
    pub next_eligible: Option<DateTime<Utc>>,
    pub total_claimed: u128,
    pub history: Vec<ClaimRecord>,
}

/// Claimant profile plus claim state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub name: String,
    pub wallet_address: Address,
    pub claim: UserClaimState,
}

impl UserAccount {
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        name: impl Into<String>,
        wallet_address: Address,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name: name.into(),
            wallet_address,
            claim: UserClaimState::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStatus {
    /// Signed, not yet accepted by the authority
    Pending,
    /// Accepted by the authority, not yet recorded locally
    Submitted,
}

/// Claim in flight. Written before submission and removed by the same
/// write that records the claim, so a surviving intent marks a claim whose
/// outcome needs reconciling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimIntent {
    pub id: String,
    pub chain_id: u64,
    pub user_id: String,
    pub recipient: Address,
    pub nonce: u64,
    pub amount: u128,
    pub fee: u128,
    pub created_at: DateTime<Utc>,
    pub status: IntentStatus,
    pub tx_hash: Option<Hash>,
}

/// Next transfer nonce: whole-second wall clock, forced strictly past the
/// last nonce issued so two claims in one second never collide.
pub fn next_nonce(faucet: &FaucetAccount, now: DateTime<Utc>) -> u64 {
    let wall = now.timestamp().max(0) as u64;
    wall.max(faucet.last_nonce.saturating_add(1))
}

/// Midnight UTC of the day containing `at`
pub fn truncate_to_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or(at)
}

/// Resets today's counters if `at` falls on a later UTC day than the last
/// recorded claim. Returns whether a rollover happened.
pub fn roll_over(faucet: &mut FaucetAccount, at: DateTime<Utc>) -> bool {
    let stale = faucet
        .last_modified_at
        .map_or(true, |modified| modified.date_naive() < at.date_naive());
    if !stale {
        return false;
    }

    if faucet.today_distributed != 0 || faucet.today_transactions != 0 {
        faucet.previous_day_rate = faucet.today_distributed;
    }
    faucet.today_distributed = 0;
    faucet.today_transactions = 0;

    debug!(
        chain_id = faucet.chain_id,
        previous_day_rate = %faucet.previous_day_rate,
        "Daily distribution counters rolled over"
    );
    true
}

/// Applies one successful claim to the faucet statistics and the user's
/// claim state. `record.timestamp` is the claim time.
pub fn record_claim(
    faucet: &mut FaucetAccount,
    user: &mut UserClaimState,
    record: ClaimRecord,
    fee: u128,
    cooldown: Duration,
) {
    let claim_time = record.timestamp;
    let amount = record.amount;

    user.last_claim = Some(claim_time);
    user.next_eligible = Some(claim_time + cooldown);
    user.total_claimed = user.total_claimed.saturating_add(amount);
    user.history.push(record);

    roll_over(faucet, claim_time);

    let distributed = amount.saturating_add(fee);
    faucet.total_distributed = faucet.total_distributed.saturating_add(distributed);
    faucet.today_distributed = faucet.today_distributed.saturating_add(distributed);
    faucet.total_transactions += 1;
    faucet.today_transactions += 1;
    faucet.distribution_rate_per_day = faucet.today_distributed;
    faucet.last_modified_at = Some(truncate_to_day(claim_time));
}

/// Durable home of faucet accounts, user accounts and claim intents
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_faucet(&self, chain_id: u64) -> FaucetResult<Option<FaucetAccount>>;

    async fn put_faucet(&self, faucet: &FaucetAccount) -> FaucetResult<()>;

    async fn get_user(&self, user_id: &str) -> FaucetResult<Option<UserAccount>>;

    async fn put_user(&self, user: &UserAccount) -> FaucetResult<()>;

    async fn put_intent(&self, intent: &ClaimIntent) -> FaucetResult<()>;

    async fn remove_intent(&self, intent_id: &str) -> FaucetResult<()>;

    async fn list_intents(&self) -> FaucetResult<Vec<ClaimIntent>>;

    /// Persists the faucet and user records and drops the intent as one
    /// write. Failures surface as `FaucetError::LedgerPersistence`.
    async fn commit_claim(
        &self,
        faucet: &FaucetAccount,
        user: &UserAccount,
        intent_id: &str,
    ) -> FaucetResult<()>;
}

#[derive(Default)]
struct MemoryState {
    faucets: HashMap<u64, FaucetAccount>,
    users: HashMap<String, UserAccount>,
    intents: HashMap<String, ClaimIntent>,
}

/// In-process ledger for tests and single-node experiments
#[derive(Default)]
pub struct MemoryLedger {
    state: RwLock<MemoryState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get_faucet(&self, chain_id: u64) -> FaucetResult<Option<FaucetAccount>> {
        Ok(self.state.read().await.faucets.get(&chain_id).cloned())
    }

    async fn put_faucet(&self, faucet: &FaucetAccount) -> FaucetResult<()> {
        self.state
            .write()
            .await
            .faucets
            .insert(faucet.chain_id, faucet.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> FaucetResult<Option<UserAccount>> {
        Ok(self.state.read().await.users.get(user_id).cloned())
    }

    async fn put_user(&self, user: &UserAccount) -> FaucetResult<()> {
        self.state
            .write()
            .await
            .users
            .insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn put_intent(&self, intent: &ClaimIntent) -> FaucetResult<()> {
        self.state
            .write()
            .await
            .intents
            .insert(intent.id.clone(), intent.clone());
        Ok(())
    }

    async fn remove_intent(&self, intent_id: &str) -> FaucetResult<()> {
        self.state.write().await.intents.remove(intent_id);
        Ok(())
    }

    async fn list_intents(&self) -> FaucetResult<Vec<ClaimIntent>> {
        let mut intents: Vec<_> = self.state.read().await.intents.values().cloned().collect();
        intents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(intents)
    }

    async fn commit_claim(
        &self,
        faucet: &FaucetAccount,
        user: &UserAccount,
        intent_id: &str,
    ) -> FaucetResult<()> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user.id) {
            return Err(FaucetError::LedgerPersistence(format!(
                "user {} disappeared before commit",
                user.id
            )));
        }
        state.faucets.insert(faucet.chain_id, faucet.clone());
        state.users.insert(user.id.clone(), user.clone());
        state.intents.remove(intent_id);
        Ok(())
    }
}
