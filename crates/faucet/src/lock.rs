//! Claim lock
//!
//! A lease is a `(token, expiry)` record stored under the lock key. It is
//! taken, renewed and returned with compare-and-swap, so engines that share
//! one `LeaseStore` instance exclude each other. A holder that dies without
//! releasing loses the lease once it expires; a live holder keeps it with a
//! `LeaseKeepalive`.
//!
//! Both stores here are local to one process. A fleet of engine processes
//! needs a `LeaseStore` backed by a shared coordination service.

use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Proof of holding a named lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub token: String,
    pub expires_at_ms: i64,
}

#[async_trait]
pub trait ConcurrencyGuard: Send + Sync {
    /// Waits for the named lock. Fails with `FaucetError::Lock` on timeout.
    async fn acquire(&self, key: &str) -> FaucetResult<Lease>;

    /// Pushes the expiry one TTL past now. Fails with `FaucetError::Lock`
    /// once another holder has taken the lock.
    async fn renew(&self, lease: &Lease) -> FaucetResult<Lease>;

    async fn release(&self, lease: Lease) -> FaucetResult<()>;

    /// Lifetime of an unrenewed lease
    fn ttl(&self) -> Duration;
}

/// Coordination store with compare-and-swap on single keys
pub trait LeaseStore: Send + Sync {
    fn load(&self, key: &str) -> FaucetResult<Option<Vec<u8>>>;

    /// Replaces `current` with `new`; returns false if the stored value was
    /// not `current`.
    fn compare_and_swap(
        &self,
        key: &str,
        current: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> FaucetResult<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    token: String,
    expires_at_ms: i64,
}

/// Lease lock over any `LeaseStore`
pub struct LeaseLock<S> {
    store: S,
    ttl: Duration,
    acquire_timeout: Duration,
    retry_interval: Duration,
}

impl<S: LeaseStore> LeaseLock<S> {
    pub fn new(store: S, ttl: Duration, acquire_timeout: Duration) -> Self {
        Self {
            store,
            ttl,
            acquire_timeout,
            retry_interval: Duration::from_millis(10),
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    fn try_acquire(&self, key: &str, token: &str) -> FaucetResult<Option<Lease>> {
        let now_ms = Utc::now().timestamp_millis();
        let current = self.store.load(key)?;

        if let Some(bytes) = &current {
            let record: LeaseRecord = bincode::deserialize(bytes)?;
            if record.expires_at_ms > now_ms {
                return Ok(None);
            }
            warn!(key, holder = %record.token, "Taking over expired lease");
        }

        let lease = Lease {
            key: key.to_string(),
            token: token.to_string(),
            expires_at_ms: self.expiry_after(now_ms),
        };
        let new = bincode::serialize(&LeaseRecord {
            token: lease.token.clone(),
            expires_at_ms: lease.expires_at_ms,
        })?;

        if self.store.compare_and_swap(key, current.as_deref(), Some(new.as_slice()))? {
            Ok(Some(lease))
        } else {
            Ok(None)
        }
    }

    fn expiry_after(&self, now_ms: i64) -> i64 {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_add(ttl_ms)
    }

    /// Stored value under the lease key, if it still carries the lease's token
    fn held_record(&self, lease: &Lease) -> FaucetResult<Option<Vec<u8>>> {
        let current = self.store.load(&lease.key)?;
        let held = match &current {
            Some(bytes) => bincode::deserialize::<LeaseRecord>(bytes)?.token == lease.token,
            None => false,
        };
        Ok(if held { current } else { None })
    }
}

#[async_trait]
impl<S: LeaseStore> ConcurrencyGuard for LeaseLock<S> {
    async fn acquire(&self, key: &str) -> FaucetResult<Lease> {
        let token = uuid::Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.acquire_timeout;

        loop {
            if let Some(lease) = self.try_acquire(key, &token)? {
                debug!(key, token = %lease.token, "Lease acquired");
                return Ok(lease);
            }
            if Instant::now() >= deadline {
                return Err(FaucetError::Lock(format!(
                    "timed out after {:?} waiting for '{}'",
                    self.acquire_timeout, key
                )));
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    async fn renew(&self, lease: &Lease) -> FaucetResult<Lease> {
        loop {
            let current = self.held_record(lease)?.ok_or_else(|| {
                FaucetError::Lock(format!("lease on '{}' was lost", lease.key))
            })?;

            let expires_at_ms = self.expiry_after(Utc::now().timestamp_millis());
            let new = bincode::serialize(&LeaseRecord {
                token: lease.token.clone(),
                expires_at_ms,
            })?;

            // A failed swap means the record changed under us; re-read it.
            if self
                .store
                .compare_and_swap(&lease.key, Some(current.as_slice()), Some(new.as_slice()))?
            {
                return Ok(Lease {
                    key: lease.key.clone(),
                    token: lease.token.clone(),
                    expires_at_ms,
                });
            }
        }
    }

    async fn release(&self, lease: Lease) -> FaucetResult<()> {
        loop {
            let current = self.held_record(&lease)?.ok_or_else(|| {
                FaucetError::Lock(format!("lease on '{}' was lost before release", lease.key))
            })?;

            if self.store.compare_and_swap(&lease.key, Some(current.as_slice()), None)? {
                debug!(key = %lease.key, token = %lease.token, "Lease released");
                return Ok(());
            }
        }
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Renews a lease in the background at a third of its TTL until stopped.
/// A failed renewal marks the lease lost and ends the task.
pub struct LeaseKeepalive {
    lost: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl LeaseKeepalive {
    pub fn start(guard: Arc<dyn ConcurrencyGuard>, lease: Lease) -> Self {
        let lost = Arc::new(AtomicBool::new(false));
        let interval = (guard.ttl() / 3).max(Duration::from_millis(1));

        let task = {
            let lost = lost.clone();
            tokio::spawn(async move {
                let mut lease = lease;
                loop {
                    tokio::time::sleep(interval).await;
                    match guard.renew(&lease).await {
                        Ok(renewed) => lease = renewed,
                        Err(e) => {
                            warn!(key = %lease.key, error = %e, "Lease keepalive stopped");
                            lost.store(true, Ordering::SeqCst);
                            return;
                        }
                    }
                }
            })
        };

        Self {
            lost,
            task: Some(task),
        }
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Stops renewing and waits for any renewal in flight to finish
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for LeaseKeepalive {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Single-process lease store
#[derive(Default)]
pub struct MemoryLeaseStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn load(&self, key: &str) -> FaucetResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| FaucetError::Lock("lease table poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        current: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> FaucetResult<bool> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| FaucetError::Lock("lease table poisoned".to_string()))?;

        if entries.get(key).map(Vec::as_slice) != current {
            return Ok(false);
        }
        match new {
            Some(value) => entries.insert(key.to_string(), value.to_vec()),
            None => entries.remove(key),
        };
        Ok(true)
    }
}

/// Lease store on a sled tree. sled holds an exclusive file lock on its
/// database, so this excludes the engines of one process only.
pub struct SledLeaseStore {
    tree: sled::Tree,
}

impl SledLeaseStore {
    pub fn new(db: &sled::Db) -> FaucetResult<Self> {
        Ok(Self {
            tree: db.open_tree("leases")?,
        })
    }
}

impl LeaseStore for SledLeaseStore {
    fn load(&self, key: &str) -> FaucetResult<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn compare_and_swap(
        &self,
        key: &str,
        current: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> FaucetResult<bool> {
        let swapped = self.tree.compare_and_swap(key.as_bytes(), current, new)?;
        Ok(swapped.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn memory_lock(ttl_ms: u64, timeout_ms: u64) -> LeaseLock<MemoryLeaseStore> {
        LeaseLock::new(
            MemoryLeaseStore::new(),
            Duration::from_millis(ttl_ms),
            Duration::from_millis(timeout_ms),
        )
        .with_retry_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_acquire_release_reacquire() {
        let lock = memory_lock(60_000, 50);
        let lease = lock.acquire("faucet-claim:1").await.unwrap();
        lock.release(lease).await.unwrap();
        let again = lock.acquire("faucet-claim:1").await.unwrap();
        assert_eq!(again.key, "faucet-claim:1");
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let lock = memory_lock(60_000, 30);
        let _held = lock.acquire("faucet-claim:1").await.unwrap();
        let err = lock.acquire("faucet-claim:1").await.unwrap_err();
        assert!(matches!(err, FaucetError::Lock(_)));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let lock = memory_lock(60_000, 30);
        let _a = lock.acquire("faucet-claim:1").await.unwrap();
        assert!(lock.acquire("faucet-claim:2").await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over_and_stale_release_rejected() {
        let lock = memory_lock(20, 500);
        let stale = lock.acquire("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let fresh = lock.acquire("k").await.unwrap();
        assert_ne!(fresh.token, stale.token);
        assert!(matches!(lock.release(stale).await, Err(FaucetError::Lock(_))));
        lock.release(fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let lock = Arc::new(memory_lock(60_000, 1_000));
        let lease = lock.acquire("k").await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire("k").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        lock.release(lease).await.unwrap();

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_renew_extends_expiry() {
        let lock = memory_lock(1_000, 30);
        let lease = lock.acquire("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let renewed = lock.renew(&lease).await.unwrap();
        assert_eq!(renewed.token, lease.token);
        assert!(renewed.expires_at_ms > lease.expires_at_ms);
        lock.release(renewed).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_but_untaken_lease_can_be_renewed() {
        let lock = memory_lock(10, 30);
        let lease = lock.acquire("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(lock.renew(&lease).await.is_ok());
    }

    #[tokio::test]
    async fn test_renew_after_takeover_fails() {
        let lock = memory_lock(10, 500);
        let stale = lock.acquire("k").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _fresh = lock.acquire("k").await.unwrap();

        assert!(matches!(lock.renew(&stale).await, Err(FaucetError::Lock(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_keepalive_holds_lease_past_ttl() {
        let lock = Arc::new(memory_lock(60, 20));
        let lease = lock.acquire("k").await.unwrap();
        let keepalive = LeaseKeepalive::start(lock.clone(), lease.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!keepalive.is_lost());
        assert!(lock.acquire("k").await.is_err());

        keepalive.stop().await;
        lock.release(lease).await.unwrap();
        assert!(lock.acquire("k").await.is_ok());
    }

    #[tokio::test]
    async fn test_keepalive_reports_lost_lease() {
        let lock = Arc::new(memory_lock(15, 500));
        let lease = lock.acquire("k").await.unwrap();
        // Another holder takes over before the first renewal
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _other = lock.acquire("k").await.unwrap();

        let keepalive = LeaseKeepalive::start(lock.clone(), lease);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(keepalive.is_lost());
    }

    #[tokio::test]
    async fn test_sled_store_excludes_second_lock_on_same_db() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let first = LeaseLock::new(
            SledLeaseStore::new(&db).unwrap(),
            Duration::from_secs(60),
            Duration::from_millis(30),
        );
        let second = LeaseLock::new(
            SledLeaseStore::new(&db).unwrap(),
            Duration::from_secs(60),
            Duration::from_millis(30),
        );

        let lease = first.acquire("faucet-claim:1").await.unwrap();
        assert!(second.acquire("faucet-claim:1").await.is_err());
        first.release(lease).await.unwrap();
        assert!(second.acquire("faucet-claim:1").await.is_ok());
    }
}
