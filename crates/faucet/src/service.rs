//! Faucet service core logic
//!
//! `FaucetService::claim_coins` runs the claim pipeline for one faucet:
//!
//! ```text
//! Idle -> LockHeld -> EligibilityChecked -> BalanceVerified -> TransferSigned
//!      -> Submitted -> LedgerUpdated -> LockReleased
//! ```
//!
//! Any step may fail; the lock is released on every path. Eligibility and
//! balance are also checked once before the lock is taken so that obvious
//! rejections never queue behind other claims. While the lock is held its
//! lease is renewed in the background, and the claim confirms it still holds
//! the lease before writing its intent and before recording the claim.

use crate::clock::Clock;
use crate::config::FaucetConfig;
use crate::eligibility::can_claim;
use crate::error::{FaucetError, FaucetResult};
use crate::keys::KeyProvider;
use crate::ledger::{
    next_nonce, record_claim, ClaimIntent, ClaimRecord, FaucetAccount, IntentStatus, LedgerStore,
    UserAccount,
};
use crate::lock::{ConcurrencyGuard, Lease, LeaseKeepalive};
use crate::mempool::{SignedTransferDto, TransferSubmitter};
use crate::metrics::FaucetMetrics;
use crate::oracle::BalanceOracle;
use chrono::{DateTime, Duration, Utc};
use drip_common::types::{Address, Hash};
use drip_crypto::TransferSigner;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Identity of one faucet: the chain it pays out on and its custodial
/// address. Everything keyed per faucet (lock, ledger row) derives from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaucetHandle {
    pub chain_id: u64,
    pub address: Address,
}

/// Payout rules
#[derive(Debug, Clone)]
pub struct ClaimPolicy {
    pub reward: u128,
    pub fee: u128,
    pub cooldown: Duration,
    /// Full lock key, already suffixed with the chain id
    pub lock_key: String,
    pub intent_stale_after: Duration,
}

impl ClaimPolicy {
    pub fn from_config(config: &FaucetConfig) -> FaucetResult<Self> {
        Ok(Self {
            reward: config.reward_amount()?,
            fee: config.network_fee()?,
            cooldown: config.claim_cooldown(),
            lock_key: config.lock_name(),
            intent_stale_after: config.intent_stale_after(),
        })
    }

    /// Balance the faucet must hold to pay one claim
    pub fn required_balance(&self) -> u128 {
        self.reward.saturating_add(self.fee)
    }
}

/// Collaborators the engine is wired to
pub struct FaucetDeps {
    pub ledger: Arc<dyn LedgerStore>,
    pub oracle: Arc<dyn BalanceOracle>,
    pub submitter: Arc<dyn TransferSubmitter>,
    pub keys: Arc<dyn KeyProvider>,
    pub guard: Arc<dyn ConcurrencyGuard>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<FaucetMetrics>,
}

/// Progress of a single claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStage {
    Idle,
    LockHeld,
    EligibilityChecked,
    BalanceVerified,
    TransferSigned,
    Submitted,
    LedgerUpdated,
    LockReleased,
}

impl ClaimStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStage::Idle => "idle",
            ClaimStage::LockHeld => "lock_held",
            ClaimStage::EligibilityChecked => "eligibility_checked",
            ClaimStage::BalanceVerified => "balance_verified",
            ClaimStage::TransferSigned => "transfer_signed",
            ClaimStage::Submitted => "submitted",
            ClaimStage::LedgerUpdated => "ledger_updated",
            ClaimStage::LockReleased => "lock_released",
        }
    }
}

impl fmt::Display for ClaimStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResult {
    pub id: String,
    pub email: String,
    pub name: String,
    pub wallet_address: Address,
    pub last_claim_time: DateTime<Utc>,
    pub next_claim_time: DateTime<Utc>,
    pub amount: String,
    pub tx_hash: Hash,
}

/// Dashboard view of a faucet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaucetStatus {
    pub chain_id: u64,
    pub address: Address,
    pub balance: String,
    pub reward_amount: String,
    pub network_fee: String,
    pub total_distributed: String,
    pub total_transactions: u64,
    pub today_distributed: String,
    pub today_transactions: u64,
    pub previous_day_rate: String,
    pub distribution_rate_per_day: String,
    pub last_modified_at: Option<DateTime<Utc>>,
}

/// What the pre-flight saw; re-verified under the lock
struct Preflight {
    sequence: u64,
}

/// Faucet service
pub struct FaucetService {
    handle: FaucetHandle,
    policy: ClaimPolicy,
    ledger: Arc<dyn LedgerStore>,
    oracle: Arc<dyn BalanceOracle>,
    submitter: Arc<dyn TransferSubmitter>,
    keys: Arc<dyn KeyProvider>,
    guard: Arc<dyn ConcurrencyGuard>,
    clock: Arc<dyn Clock>,
    metrics: Arc<FaucetMetrics>,
}

impl FaucetService {
    pub fn new(handle: FaucetHandle, policy: ClaimPolicy, deps: FaucetDeps) -> Self {
        Self {
            handle,
            policy,
            ledger: deps.ledger,
            oracle: deps.oracle,
            submitter: deps.submitter,
            keys: deps.keys,
            guard: deps.guard,
            clock: deps.clock,
            metrics: deps.metrics,
        }
    }

    pub fn handle(&self) -> &FaucetHandle {
        &self.handle
    }

    pub fn policy(&self) -> &ClaimPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &FaucetMetrics {
        &self.metrics
    }

    /// Creates the faucet account row on first start
    pub async fn ensure_faucet_account(&self) -> FaucetResult<FaucetAccount> {
        if let Some(faucet) = self.ledger.get_faucet(self.handle.chain_id).await? {
            return Ok(faucet);
        }
        let faucet = FaucetAccount::new(self.handle.chain_id);
        self.ledger.put_faucet(&faucet).await?;
        info!(chain_id = self.handle.chain_id, "Created faucet account");
        Ok(faucet)
    }

    /// Grants the reward to `user_id` if they are eligible and the faucet
    /// can pay.
    pub async fn claim_coins(&self, user_id: &str) -> FaucetResult<ClaimResult> {
        let started = Instant::now();
        info!(user_id, chain_id = self.handle.chain_id, "Claim requested");

        let preflight = match self.preflight(user_id).await {
            Ok(preflight) => preflight,
            Err(e) => {
                self.observe_failure(ClaimStage::Idle, user_id, &e);
                return Err(e);
            }
        };

        let wait_started = Instant::now();
        let lease = match self.guard.acquire(&self.policy.lock_key).await {
            Ok(lease) => lease,
            Err(e) => {
                self.observe_failure(ClaimStage::Idle, user_id, &e);
                return Err(e);
            }
        };
        self.metrics
            .lock_wait_seconds
            .observe(wait_started.elapsed().as_secs_f64());

        let mut stage = ClaimStage::LockHeld;
        debug!(user_id, stage = %stage, "Claim lock held");
        let keepalive = LeaseKeepalive::start(self.guard.clone(), lease.clone());
        let result = self
            .claim_locked(user_id, &preflight, &lease, &keepalive, &mut stage)
            .await;
        keepalive.stop().await;

        if let Err(e) = self.guard.release(lease).await {
            // The lease expires on its own; the claim outcome stands.
            error!(user_id, error = %e, "Failed to release claim lock");
        }

        match &result {
            Ok(claim) => {
                self.metrics.claims_total.inc();
                info!(
                    user_id,
                    stage = %ClaimStage::LockReleased,
                    tx_hash = %claim.tx_hash,
                    next_claim = %claim.next_claim_time.to_rfc3339(),
                    "Claim completed"
                );
            }
            Err(e) => self.observe_failure(stage, user_id, e),
        }
        self.metrics
            .claim_duration_seconds
            .observe(started.elapsed().as_secs_f64());

        result
    }

    async fn preflight(&self, user_id: &str) -> FaucetResult<Preflight> {
        if user_id.trim().is_empty() {
            return Err(FaucetError::Validation("user id must not be empty".to_string()));
        }

        let user = self.load_user(user_id).await?;
        self.validate_recipient(&user)?;
        self.check_eligibility(&user, self.clock.now())?;

        let faucet = self.load_faucet().await?;
        self.verify_balance().await?;

        Ok(Preflight {
            sequence: faucet.last_nonce,
        })
    }

    async fn claim_locked(
        &self,
        user_id: &str,
        preflight: &Preflight,
        lease: &Lease,
        keepalive: &LeaseKeepalive,
        stage: &mut ClaimStage,
    ) -> FaucetResult<ClaimResult> {
        let now = self.clock.now();

        // Another claim may have landed while we waited.
        let mut user = self.load_user(user_id).await?;
        self.check_eligibility(&user, now)?;
        *stage = ClaimStage::EligibilityChecked;

        let mut faucet = self.load_faucet().await?;
        if faucet.last_nonce != preflight.sequence {
            debug!(
                user_id,
                seen = preflight.sequence,
                current = faucet.last_nonce,
                "Faucet moved since pre-flight, re-checking balance"
            );
            self.verify_balance().await?;
        }
        *stage = ClaimStage::BalanceVerified;

        let keypair = self.keys.signing_key().await?;
        let signer = TransferSigner::new(keypair, self.handle.chain_id);
        let nonce = next_nonce(&faucet, now);
        let transfer = signer.build_and_sign(
            self.handle.address,
            user.wallet_address,
            self.policy.reward,
            self.policy.fee,
            nonce,
        )?;
        let dto = SignedTransferDto::from(&transfer);
        *stage = ClaimStage::TransferSigned;

        let mut intent = ClaimIntent {
            id: uuid::Uuid::new_v4().to_string(),
            chain_id: self.handle.chain_id,
            user_id: user.id.clone(),
            recipient: user.wallet_address,
            nonce,
            amount: self.policy.reward,
            fee: self.policy.fee,
            created_at: now,
            status: IntentStatus::Pending,
            tx_hash: Some(dto.hash),
        };
        self.confirm_lease(lease, keepalive).await?;
        self.ledger.put_intent(&intent).await?;

        let acceptance = match self.submitter.submit(&dto).await {
            Ok(acceptance) => acceptance,
            Err(e) => {
                if let Err(cleanup) = self.ledger.remove_intent(&intent.id).await {
                    warn!(
                        intent_id = %intent.id,
                        error = %cleanup,
                        "Failed to drop unsubmitted intent"
                    );
                }
                return Err(match e {
                    FaucetError::Submission(_) => e,
                    other => FaucetError::Submission(other.to_string()),
                });
            }
        };
        *stage = ClaimStage::Submitted;
        debug!(user_id, tx_hash = %dto.hash, acceptance = %acceptance, "Transfer accepted");

        intent.status = IntentStatus::Submitted;
        if let Err(e) = self.ledger.put_intent(&intent).await {
            warn!(intent_id = %intent.id, error = %e, "Failed to mark intent submitted");
        }

        let record = ClaimRecord {
            id: intent.id.clone(),
            timestamp: now,
            amount: self.policy.reward,
            tx_hash: Some(dto.hash),
        };
        faucet.last_nonce = nonce;
        record_claim(
            &mut faucet,
            &mut user.claim,
            record,
            self.policy.fee,
            self.policy.cooldown,
        );

        if let Err(e) = self.confirm_lease(lease, keepalive).await {
            error!(
                user_id,
                intent_id = %intent.id,
                tx_hash = %dto.hash,
                nonce,
                error = %e,
                "Claim lock lost after submission; claim not recorded, reconcile manually"
            );
            return Err(e);
        }

        if let Err(e) = self.ledger.commit_claim(&faucet, &user, &intent.id).await {
            error!(
                user_id,
                intent_id = %intent.id,
                tx_hash = %dto.hash,
                nonce,
                error = %e,
                "Transfer accepted by authority but claim was not recorded; reconcile manually"
            );
            return Err(match e {
                FaucetError::LedgerPersistence(_) => e,
                other => FaucetError::LedgerPersistence(other.to_string()),
            });
        }
        *stage = ClaimStage::LedgerUpdated;

        self.metrics
            .distributed_total
            .set(faucet.total_distributed as f64);

        // Both are set by record_claim
        let last_claim_time = user.claim.last_claim.unwrap_or(now);
        let next_claim_time = user
            .claim
            .next_eligible
            .unwrap_or(now + self.policy.cooldown);

        Ok(ClaimResult {
            id: user.id,
            email: user.email,
            name: user.name,
            wallet_address: user.wallet_address,
            last_claim_time,
            next_claim_time,
            amount: self.policy.reward.to_string(),
            tx_hash: dto.hash,
        })
    }

    /// Fails with `FaucetError::Lock` unless this claim still holds the lock
    async fn confirm_lease(&self, lease: &Lease, keepalive: &LeaseKeepalive) -> FaucetResult<()> {
        if keepalive.is_lost() {
            return Err(FaucetError::Lock(format!("lease on '{}' was lost", lease.key)));
        }
        self.guard.renew(lease).await.map(|_| ())
    }

    fn validate_recipient(&self, user: &UserAccount) -> FaucetResult<()> {
        if user.wallet_address.is_zero() {
            return Err(FaucetError::Validation(format!(
                "user {} has no wallet address",
                user.id
            )));
        }
        if user.wallet_address == self.handle.address {
            return Err(FaucetError::Validation(
                "cannot send to faucet address".to_string(),
            ));
        }
        Ok(())
    }

    fn check_eligibility(&self, user: &UserAccount, now: DateTime<Utc>) -> FaucetResult<()> {
        if can_claim(&user.claim, now) {
            return Ok(());
        }
        Err(FaucetError::NotEligible {
            next_claim: user.claim.next_eligible.unwrap_or(now),
        })
    }

    async fn verify_balance(&self) -> FaucetResult<u128> {
        let balance = self.oracle.fetch_balance(&self.handle.address).await?;
        let required = self.policy.required_balance();
        if balance < required {
            warn!(balance = %balance, required = %required, "Faucet balance low");
            return Err(FaucetError::InsufficientBalance { balance, required });
        }
        Ok(balance)
    }

    async fn load_user(&self, user_id: &str) -> FaucetResult<UserAccount> {
        self.ledger
            .get_user(user_id)
            .await?
            .ok_or_else(|| FaucetError::UserNotFound(user_id.to_string()))
    }

    async fn load_faucet(&self) -> FaucetResult<FaucetAccount> {
        Ok(self
            .ledger
            .get_faucet(self.handle.chain_id)
            .await?
            .unwrap_or_else(|| FaucetAccount::new(self.handle.chain_id)))
    }

    fn observe_failure(&self, stage: ClaimStage, user_id: &str, err: &FaucetError) {
        match err {
            FaucetError::Validation(_)
            | FaucetError::UserNotFound(_)
            | FaucetError::NotEligible { .. }
            | FaucetError::InsufficientBalance { .. } => {
                let reason = err.code().to_lowercase();
                self.metrics
                    .claims_rejected_total
                    .with_label_values(&[reason.as_str()])
                    .inc();
                warn!(user_id, stage = %stage, error = %err, "Claim rejected");
            }
            _ => {
                self.metrics
                    .claim_failures_total
                    .with_label_values(&[stage.as_str()])
                    .inc();
                error!(user_id, stage = %stage, error = %err, "Claim failed");
            }
        }
    }

    /// Faucet statistics as last recorded; takes no lock
    pub async fn faucet_account(&self) -> FaucetResult<FaucetAccount> {
        self.load_faucet().await
    }

    /// Dashboard view including the authority's current balance
    pub async fn status(&self) -> FaucetResult<FaucetStatus> {
        let faucet = self.load_faucet().await?;
        let balance = self.oracle.fetch_balance(&self.handle.address).await?;

        Ok(FaucetStatus {
            chain_id: self.handle.chain_id,
            address: self.handle.address,
            balance: balance.to_string(),
            reward_amount: self.policy.reward.to_string(),
            network_fee: self.policy.fee.to_string(),
            total_distributed: faucet.total_distributed.to_string(),
            total_transactions: faucet.total_transactions,
            today_distributed: faucet.today_distributed.to_string(),
            today_transactions: faucet.today_transactions,
            previous_day_rate: faucet.previous_day_rate.to_string(),
            distribution_rate_per_day: faucet.distribution_rate_per_day.to_string(),
            last_modified_at: faucet.last_modified_at,
        })
    }

    /// A user's claims, newest first
    pub async fn claim_history(&self, user_id: &str) -> FaucetResult<Vec<ClaimRecord>> {
        let user = self.load_user(user_id).await?;
        let mut history = user.claim.history;
        history.reverse();
        Ok(history)
    }

    /// Intents for this faucet older than the staleness threshold. Each one
    /// is a claim whose transfer may have reached the authority without
    /// being recorded here.
    pub async fn stale_intents(&self) -> FaucetResult<Vec<ClaimIntent>> {
        let cutoff = self.clock.now() - self.policy.intent_stale_after;
        Ok(self
            .ledger
            .list_intents()
            .await?
            .into_iter()
            .filter(|intent| {
                intent.chain_id == self.handle.chain_id && intent.created_at <= cutoff
            })
            .collect())
    }
}
