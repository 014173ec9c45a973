//! Faucet key material

use crate::config::FaucetConfig;
use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use drip_crypto::KeyPair;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Source of the faucet's signing key
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn signing_key(&self) -> FaucetResult<KeyPair>;
}

/// Key held in memory, typically from config or the environment
pub struct StaticKeyProvider {
    keypair: KeyPair,
}

impl StaticKeyProvider {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    pub fn from_hex(private_key: &str) -> FaucetResult<Self> {
        Ok(Self::new(KeyPair::from_private_key_hex(private_key)?))
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn signing_key(&self) -> FaucetResult<KeyPair> {
        Ok(self.keypair.clone())
    }
}

/// Hex key read from a keystore file on every use, so rotation needs no
/// restart
pub struct FileKeyProvider {
    path: PathBuf,
}

impl FileKeyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl KeyProvider for FileKeyProvider {
    async fn signing_key(&self) -> FaucetResult<KeyPair> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            FaucetError::Signing(format!("cannot read key file {}: {}", self.path.display(), e))
        })?;
        Ok(KeyPair::from_private_key_hex(contents.trim())?)
    }
}

/// Picks the key provider the configuration asks for
pub fn key_provider_from_config(config: &FaucetConfig) -> FaucetResult<Arc<dyn KeyProvider>> {
    if let Some(key) = &config.private_key {
        info!("Using faucet key from configuration");
        return Ok(Arc::new(StaticKeyProvider::from_hex(key)?));
    }
    if let Some(path) = &config.key_file {
        info!("Using faucet key file {}", path);
        return Ok(Arc::new(FileKeyProvider::new(path)));
    }
    Err(FaucetError::Config(
        "either private_key or key_file must be set".to_string(),
    ))
}
