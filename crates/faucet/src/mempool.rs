//! Hand-off of signed transfers to the authority's intake queue

use crate::error::FaucetResult;
use async_trait::async_trait;
use drip_common::types::{Address, Hash};
use drip_crypto::SignedTransfer;
use serde::{Deserialize, Serialize};

/// Wire form of a signed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransferDto {
    pub chain_id: u64,
    pub hash: Hash,
    pub from: Address,
    pub to: Address,
    /// Reward plus fee, decimal base units
    pub value: String,
    /// `0x`-prefixed RLP encoding
    pub raw: String,
}

impl From<&SignedTransfer> for SignedTransferDto {
    fn from(transfer: &SignedTransfer) -> Self {
        Self {
            chain_id: transfer.chain_id,
            hash: transfer.hash(),
            from: transfer.from,
            to: transfer.to,
            value: transfer.value.to_string(),
            raw: transfer.raw_hex(),
        }
    }
}

/// Submits transfers to the authority. Acceptance only means the transfer
/// was queued; inclusion is not observed by the engine.
#[async_trait]
pub trait TransferSubmitter: Send + Sync {
    /// Returns the authority's acknowledgement, typically the transfer hash
    async fn submit(&self, transfer: &SignedTransferDto) -> FaucetResult<String>;
}
