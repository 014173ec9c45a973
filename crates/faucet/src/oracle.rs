//! Authoritative balance lookups

use crate::error::FaucetResult;
use async_trait::async_trait;
use drip_common::types::Address;

/// Reads an account balance from the ledger authority. Implementations must
/// not cache: every call reflects the authority's current view.
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    async fn fetch_balance(&self, address: &Address) -> FaucetResult<u128>;
}
