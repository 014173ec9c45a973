//! Faucet configuration

use crate::error::{FaucetError, FaucetResult};
use drip_common::types::Address;
use drip_common::utils::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Faucet service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Server address
    pub server_addr: String,

    /// JSON-RPC endpoint of the ledger authority
    pub rpc_url: String,

    /// Per-request timeout for authority calls (seconds)
    pub rpc_timeout_secs: u64,

    /// JSON-RPC method used to hand signed transfers to the intake queue
    pub submit_method: String,

    /// Chain the faucet distributes on
    pub chain_id: u64,

    /// Faucet private key as hex. Takes precedence over `key_file`.
    pub private_key: Option<String>,

    /// File holding the faucet private key as hex
    pub key_file: Option<String>,

    /// Custodial address; when set it must match the key's address
    pub faucet_address: Option<String>,

    /// Fixed reward per claim (base units)
    pub reward_amount: String,

    /// Fixed network fee added to every transfer (base units)
    pub network_fee: String,

    /// Cooldown between successful claims for one user (seconds)
    pub claim_cooldown_secs: u64,

    /// Database path
    pub db_path: String,

    /// Base name of the claim lock; the chain id is appended
    pub lock_key: String,

    /// Lease lifetime; an abandoned lease frees itself after this (seconds)
    pub lock_ttl_secs: u64,

    /// How long a claim waits for the lock before failing (seconds)
    pub lock_acquire_timeout_secs: u64,

    /// Intents older than this are reported by reconciliation (seconds)
    pub intent_stale_secs: u64,

    /// Enable metrics endpoint
    pub metrics_enabled: bool,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Logging
    pub logging: LoggingConfig,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:3000".to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            rpc_timeout_secs: 10,
            submit_method: "eth_sendRawTransaction".to_string(),
            chain_id: 31337,
            private_key: None,
            key_file: None,
            faucet_address: None,
            reward_amount: "10000000000000000000".to_string(), // 10 tokens
            network_fee: "21000000000000".to_string(),
            claim_cooldown_secs: 86400, // 24 hours
            db_path: "./faucet_data".to_string(),
            lock_key: "faucet-claim".to_string(),
            lock_ttl_secs: 60,
            lock_acquire_timeout_secs: 30,
            intent_stale_secs: 300,
            metrics_enabled: true,
            cors_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl FaucetConfig {
    /// Load from an optional config file, then `FAUCET_*` environment variables
    pub fn load(path: Option<&Path>) -> FaucetResult<Self> {
        drip_common::utils::config::load_layered_config(path, "FAUCET")
            .map_err(|e| FaucetError::Config(format!("{:#}", e)))
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> FaucetResult<()> {
        if self.reward_amount()? == 0 {
            return Err(FaucetError::Config("reward_amount must be positive".to_string()));
        }
        self.network_fee()?;
        self.faucet_address()?;

        if self.claim_cooldown_secs == 0 {
            return Err(FaucetError::Config("claim_cooldown_secs must be positive".to_string()));
        }
        if self.lock_ttl_secs <= self.rpc_timeout_secs.saturating_mul(2) {
            return Err(FaucetError::Config(
                "lock_ttl_secs must exceed two authority round-trips".to_string(),
            ));
        }
        if self.private_key.is_none() && self.key_file.is_none() {
            return Err(FaucetError::Config(
                "either private_key or key_file must be set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reward_amount(&self) -> FaucetResult<u128> {
        parse_amount("reward_amount", &self.reward_amount)
    }

    pub fn network_fee(&self) -> FaucetResult<u128> {
        parse_amount("network_fee", &self.network_fee)
    }

    pub fn faucet_address(&self) -> FaucetResult<Option<Address>> {
        self.faucet_address
            .as_deref()
            .map(|s| {
                s.parse::<Address>()
                    .map_err(|e| FaucetError::Config(format!("faucet_address: {}", e)))
            })
            .transpose()
    }

    /// Lock key for this faucet's chain
    pub fn lock_name(&self) -> String {
        format!("{}:{}", self.lock_key, self.chain_id)
    }

    pub fn claim_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_cooldown_secs as i64)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_acquire_timeout_secs)
    }

    pub fn intent_stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.intent_stale_secs as i64)
    }
}

fn parse_amount(field: &str, value: &str) -> FaucetResult<u128> {
    value
        .trim()
        .parse::<u128>()
        .map_err(|e| {
            FaucetError::Config(format!("{} '{}' is not a base-unit amount: {}", field, value, e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> FaucetConfig {
        FaucetConfig {
            private_key: Some("0x01".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_are_valid_once_key_is_set() {
        assert!(valid().validate().is_ok());
        assert!(FaucetConfig::default().validate().is_err());
    }

    #[test]
    fn test_amount_parsing() {
        let config = FaucetConfig {
            reward_amount: "10".to_string(),
            network_fee: " 1 ".to_string(),
            ..valid()
        };
        assert_eq!(config.reward_amount().unwrap(), 10);
        assert_eq!(config.network_fee().unwrap(), 1);

        let bad = FaucetConfig {
            reward_amount: "ten".to_string(),
            ..valid()
        };
        assert!(matches!(bad.validate(), Err(FaucetError::Config(_))));
    }

    #[test]
    fn test_zero_reward_rejected() {
        let config = FaucetConfig {
            reward_amount: "0".to_string(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lock_ttl_must_cover_round_trips() {
        let config = FaucetConfig {
            lock_ttl_secs: 10,
            rpc_timeout_secs: 10,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_rpc_timeout_is_rejected_not_overflowed() {
        let config = FaucetConfig {
            lock_ttl_secs: u64::MAX,
            rpc_timeout_secs: u64::MAX,
            ..valid()
        };
        assert!(matches!(config.validate(), Err(FaucetError::Config(_))));
    }

    #[test]
    fn test_lock_name_is_keyed_by_chain() {
        let config = FaucetConfig {
            chain_id: 5,
            ..valid()
        };
        assert_eq!(config.lock_name(), "faucet-claim:5");
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faucet.toml");
        std::fs::write(
            &path,
            "chain_id = 11155111\nreward_amount = \"500\"\nprivate_key = \"0x01\"\n",
        )
        .unwrap();

        let config = FaucetConfig::load(Some(&path)).unwrap();
        assert_eq!(config.chain_id, 11155111);
        assert_eq!(config.reward_amount().unwrap(), 500);
        assert_eq!(config.claim_cooldown_secs, 86400);
    }
}
