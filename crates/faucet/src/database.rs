//! Sled-backed distribution ledger

use crate::error::{FaucetError, FaucetResult};
use crate::ledger::{ClaimIntent, FaucetAccount, LedgerStore, UserAccount};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use std::path::Path;
use tracing::{debug, info};

/// Faucet database
pub struct SledLedger {
    db: Db,
    /// Faucet accounts keyed by big-endian chain id
    faucets: Tree,
    /// User accounts keyed by user id
    users: Tree,
    /// In-flight claim intents keyed by intent id
    intents: Tree,
}

impl SledLedger {
    /// Create or open faucet database
    pub fn open<P: AsRef<Path>>(path: P) -> FaucetResult<Self> {
        info!("Opening faucet database at: {}", path.as_ref().display());

        let db = sled::Config::default()
            .path(path)
            .cache_capacity(64 * 1024 * 1024) // 64MB cache
            .open()?;

        Self::from_db(db)
    }

    /// Wrap an already opened database, e.g. one shared with the lease store
    pub fn from_db(db: Db) -> FaucetResult<Self> {
        let faucets = db.open_tree("faucets")?;
        let users = db.open_tree("users")?;
        let intents = db.open_tree("intents")?;

        Ok(Self {
            db,
            faucets,
            users,
            intents,
        })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    fn get<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> FaucetResult<Option<T>> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(tree: &Tree, key: &[u8], value: &T) -> FaucetResult<()> {
        let bytes = bincode::serialize(value)?;
        tree.insert(key, bytes)?;
        Ok(())
    }
}

fn faucet_key(chain_id: u64) -> [u8; 8] {
    chain_id.to_be_bytes()
}

#[async_trait]
impl LedgerStore for SledLedger {
    async fn get_faucet(&self, chain_id: u64) -> FaucetResult<Option<FaucetAccount>> {
        Self::get(&self.faucets, &faucet_key(chain_id))
    }

    async fn put_faucet(&self, faucet: &FaucetAccount) -> FaucetResult<()> {
        Self::put(&self.faucets, &faucet_key(faucet.chain_id), faucet)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> FaucetResult<Option<UserAccount>> {
        Self::get(&self.users, user_id.as_bytes())
    }

    async fn put_user(&self, user: &UserAccount) -> FaucetResult<()> {
        Self::put(&self.users, user.id.as_bytes(), user)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn put_intent(&self, intent: &ClaimIntent) -> FaucetResult<()> {
        Self::put(&self.intents, intent.id.as_bytes(), intent)?;
        self.db.flush_async().await?;
        debug!(intent_id = %intent.id, status = ?intent.status, "Claim intent stored");
        Ok(())
    }

    async fn remove_intent(&self, intent_id: &str) -> FaucetResult<()> {
        self.intents.remove(intent_id.as_bytes())?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn list_intents(&self) -> FaucetResult<Vec<ClaimIntent>> {
        let mut intents = Vec::new();
        for item in self.intents.iter() {
            let (_, value) = item?;
            intents.push(bincode::deserialize::<ClaimIntent>(&value)?);
        }
        intents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(intents)
    }

    async fn commit_claim(
        &self,
        faucet: &FaucetAccount,
        user: &UserAccount,
        intent_id: &str,
    ) -> FaucetResult<()> {
        let persistence = |e: String| FaucetError::LedgerPersistence(e);

        let faucet_bytes = bincode::serialize(faucet).map_err(|e| persistence(e.to_string()))?;
        let user_bytes = bincode::serialize(user).map_err(|e| persistence(e.to_string()))?;
        let key = faucet_key(faucet.chain_id);

        (&self.faucets, &self.users, &self.intents)
            .transaction(|(faucets, users, intents)| {
                faucets.insert(&key[..], faucet_bytes.as_slice())?;
                users.insert(user.id.as_bytes(), user_bytes.as_slice())?;
                intents.remove(intent_id.as_bytes())?;
                Ok::<(), ConflictableTransactionError<String>>(())
            })
            .map_err(|e: TransactionError<String>| persistence(e.to_string()))?;

        self.db
            .flush_async()
            .await
            .map_err(|e| persistence(e.to_string()))?;

        debug!(user_id = %user.id, chain_id = faucet.chain_id, "Claim committed");
        Ok(())
    }
}
