//! Shared fixtures for faucet integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use drip_common::types::Address;
use drip_crypto::KeyPair;
use drip_faucet::clock::ManualClock;
use drip_faucet::keys::StaticKeyProvider;
use drip_faucet::ledger::ClaimIntent;
use drip_faucet::lock::{ConcurrencyGuard, Lease, LeaseLock, MemoryLeaseStore};
use drip_faucet::mempool::{SignedTransferDto, TransferSubmitter};
use drip_faucet::metrics::FaucetMetrics;
use drip_faucet::oracle::BalanceOracle;
use drip_faucet::{
    ClaimPolicy, FaucetAccount, FaucetDeps, FaucetError, FaucetHandle, FaucetResult, FaucetService,
    LedgerStore, MemoryLedger, UserAccount,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub const CHAIN_ID: u64 = 1337;
pub const REWARD: u128 = 10;
pub const FEE: u128 = 1;
pub const DEV_KEY: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

/// Deterministic non-zero wallet for a user name
pub fn wallet_for(name: &str) -> Address {
    let mut bytes = [0u8; 20];
    for (i, b) in name.bytes().enumerate() {
        bytes[i % 20] ^= b;
    }
    bytes[19] |= 0x80;
    Address(bytes)
}

pub struct MockOracle {
    balance: Mutex<u128>,
    pub calls: AtomicUsize,
    fail: AtomicBool,
}

impl MockOracle {
    pub fn new(balance: u128) -> Self {
        Self {
            balance: Mutex::new(balance),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_balance(&self, balance: u128) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BalanceOracle for MockOracle {
    async fn fetch_balance(&self, _address: &Address) -> FaucetResult<u128> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(FaucetError::Oracle("authority unreachable".to_string()));
        }
        Ok(*self.balance.lock().unwrap())
    }
}

/// Records submissions and the peak number running at once
pub struct MockSubmitter {
    pub submitted: Mutex<Vec<SignedTransferDto>>,
    fail: AtomicBool,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    delay: std::time::Duration,
}

impl MockSubmitter {
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl TransferSubmitter for MockSubmitter {
    async fn submit(&self, transfer: &SignedTransferDto) -> FaucetResult<String> {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(FaucetError::Submission("intake rejected transfer".to_string()));
        }
        self.submitted.lock().unwrap().push(transfer.clone());
        Ok(transfer.hash.to_string())
    }
}

/// Ledger whose claim commit always fails
pub struct FailingCommitLedger {
    inner: MemoryLedger,
}

impl FailingCommitLedger {
    pub fn new() -> Self {
        Self {
            inner: MemoryLedger::new(),
        }
    }
}

#[async_trait]
impl LedgerStore for FailingCommitLedger {
    async fn get_faucet(&self, chain_id: u64) -> FaucetResult<Option<FaucetAccount>> {
        self.inner.get_faucet(chain_id).await
    }

    async fn put_faucet(&self, faucet: &FaucetAccount) -> FaucetResult<()> {
        self.inner.put_faucet(faucet).await
    }

    async fn get_user(&self, user_id: &str) -> FaucetResult<Option<UserAccount>> {
        self.inner.get_user(user_id).await
    }

    async fn put_user(&self, user: &UserAccount) -> FaucetResult<()> {
        self.inner.put_user(user).await
    }

    async fn put_intent(&self, intent: &ClaimIntent) -> FaucetResult<()> {
        self.inner.put_intent(intent).await
    }

    async fn remove_intent(&self, intent_id: &str) -> FaucetResult<()> {
        self.inner.remove_intent(intent_id).await
    }

    async fn list_intents(&self) -> FaucetResult<Vec<ClaimIntent>> {
        self.inner.list_intents().await
    }

    async fn commit_claim(
        &self,
        _faucet: &FaucetAccount,
        _user: &UserAccount,
        _intent_id: &str,
    ) -> FaucetResult<()> {
        Err(FaucetError::LedgerPersistence("disk full".to_string()))
    }
}

/// In-memory lease lock with fast polling
pub fn memory_guard(ttl: std::time::Duration) -> LeaseLock<MemoryLeaseStore> {
    LeaseLock::new(MemoryLeaseStore::new(), ttl, std::time::Duration::from_secs(10))
        .with_retry_interval(std::time::Duration::from_millis(1))
}

/// Records when each lease was held, from acquisition to the release call
pub struct RecordingGuard {
    inner: Arc<dyn ConcurrencyGuard>,
    held_since: Mutex<Vec<(String, Instant)>>,
    pub windows: Mutex<Vec<(Instant, Instant)>>,
}

impl RecordingGuard {
    pub fn new(inner: Arc<dyn ConcurrencyGuard>) -> Self {
        Self {
            inner,
            held_since: Mutex::new(Vec::new()),
            windows: Mutex::new(Vec::new()),
        }
    }

    /// True if no two hold windows intersect
    pub fn windows_are_disjoint(&self) -> bool {
        let mut windows = self.windows.lock().unwrap().clone();
        windows.sort_by_key(|(start, _)| *start);
        windows.windows(2).all(|pair| pair[0].1 <= pair[1].0)
    }
}

#[async_trait]
impl ConcurrencyGuard for RecordingGuard {
    async fn acquire(&self, key: &str) -> FaucetResult<Lease> {
        let lease = self.inner.acquire(key).await?;
        self.held_since
            .lock()
            .unwrap()
            .push((lease.token.clone(), Instant::now()));
        Ok(lease)
    }

    async fn renew(&self, lease: &Lease) -> FaucetResult<Lease> {
        self.inner.renew(lease).await
    }

    async fn release(&self, lease: Lease) -> FaucetResult<()> {
        let ended = Instant::now();
        {
            let mut held = self.held_since.lock().unwrap();
            if let Some(pos) = held.iter().position(|(token, _)| *token == lease.token) {
                let (_, started) = held.remove(pos);
                self.windows.lock().unwrap().push((started, ended));
            }
        }
        self.inner.release(lease).await
    }

    fn ttl(&self) -> std::time::Duration {
        self.inner.ttl()
    }
}

/// Guard whose lease is taken away after a fixed number of renewals
pub struct LosingGuard {
    inner: LeaseLock<MemoryLeaseStore>,
    renewals_left: AtomicUsize,
}

impl LosingGuard {
    pub fn new(renewals: usize) -> Self {
        Self {
            inner: memory_guard(std::time::Duration::from_secs(60)),
            renewals_left: AtomicUsize::new(renewals),
        }
    }
}

#[async_trait]
impl ConcurrencyGuard for LosingGuard {
    async fn acquire(&self, key: &str) -> FaucetResult<Lease> {
        self.inner.acquire(key).await
    }

    async fn renew(&self, lease: &Lease) -> FaucetResult<Lease> {
        let granted = self
            .renewals_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !granted {
            return Err(FaucetError::Lock(format!("lease on '{}' was lost", lease.key)));
        }
        self.inner.renew(lease).await
    }

    async fn release(&self, lease: Lease) -> FaucetResult<()> {
        self.inner.release(lease).await
    }

    fn ttl(&self) -> std::time::Duration {
        self.inner.ttl()
    }
}

pub struct Harness {
    pub service: Arc<FaucetService>,
    pub ledger: Arc<dyn LedgerStore>,
    pub oracle: Arc<MockOracle>,
    pub submitter: Arc<MockSubmitter>,
    pub clock: Arc<ManualClock>,
    pub faucet_address: Address,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_ledger(Arc::new(MemoryLedger::new()))
    }

    pub fn with_ledger(ledger: Arc<dyn LedgerStore>) -> Self {
        Self::build(
            ledger,
            std::time::Duration::ZERO,
            Arc::new(memory_guard(std::time::Duration::from_secs(60))),
        )
    }

    pub fn with_submit_delay(delay: std::time::Duration) -> Self {
        Self::with_guard(Arc::new(memory_guard(std::time::Duration::from_secs(60))), delay)
    }

    pub fn with_guard(guard: Arc<dyn ConcurrencyGuard>, submit_delay: std::time::Duration) -> Self {
        Self::build(Arc::new(MemoryLedger::new()), submit_delay, guard)
    }

    fn build(
        ledger: Arc<dyn LedgerStore>,
        submit_delay: std::time::Duration,
        guard: Arc<dyn ConcurrencyGuard>,
    ) -> Self {
        drip_common::utils::logging::init_test_logging();

        let keypair = KeyPair::from_private_key_hex(DEV_KEY).unwrap();
        let faucet_address = keypair.address();
        let oracle = Arc::new(MockOracle::new(1000));
        let submitter = Arc::new(MockSubmitter::new(submit_delay));
        let clock = Arc::new(ManualClock::new(utc(2024, 1, 1, 0, 0, 0)));

        let policy = ClaimPolicy {
            reward: REWARD,
            fee: FEE,
            cooldown: Duration::hours(24),
            lock_key: format!("faucet-claim:{}", CHAIN_ID),
            intent_stale_after: Duration::minutes(5),
        };

        let service = Arc::new(FaucetService::new(
            FaucetHandle {
                chain_id: CHAIN_ID,
                address: faucet_address,
            },
            policy,
            FaucetDeps {
                ledger: ledger.clone(),
                oracle: oracle.clone(),
                submitter: submitter.clone(),
                keys: Arc::new(StaticKeyProvider::new(keypair)),
                guard,
                clock: clock.clone(),
                metrics: Arc::new(FaucetMetrics::new().unwrap()),
            },
        ));

        Self {
            service,
            ledger,
            oracle,
            submitter,
            clock,
            faucet_address,
        }
    }

    pub async fn add_user(&self, id: &str) -> UserAccount {
        let email = format!("{}@example.com", id);
        let user = UserAccount::new(id, email, id.to_uppercase(), wallet_for(id));
        self.ledger.put_user(&user).await.unwrap();
        user
    }

    pub async fn faucet(&self) -> FaucetAccount {
        self.ledger
            .get_faucet(CHAIN_ID)
            .await
            .unwrap()
            .unwrap_or_else(|| FaucetAccount::new(CHAIN_ID))
    }

    pub async fn user(&self, id: &str) -> UserAccount {
        self.ledger.get_user(id).await.unwrap().unwrap()
    }
}
