//! JSON-RPC client for the ledger authority

use crate::error::{FaucetError, FaucetResult};
use crate::mempool::{SignedTransferDto, TransferSubmitter};
use crate::oracle::BalanceOracle;
use async_trait::async_trait;
use drip_common::types::Address;
use std::time::Duration;
use tracing::{debug, info};

/// RPC client for interacting with the authority
pub struct BlockchainRpcClient {
    rpc_url: String,
    submit_method: String,
    client: reqwest::Client,
}

impl BlockchainRpcClient {
    pub fn new(rpc_url: String, submit_method: String, timeout: Duration) -> FaucetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FaucetError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            rpc_url,
            submit_method,
            client,
        })
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("Invalid response: {}", e))?;

        if let Some(error) = json.get("error") {
            return Err(error.to_string());
        }

        Ok(json
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl BalanceOracle for BlockchainRpcClient {
    async fn fetch_balance(&self, address: &Address) -> FaucetResult<u128> {
        let result = self
            .call("eth_getBalance", serde_json::json!([address.to_string(), "latest"]))
            .await
            .map_err(FaucetError::Oracle)?;

        let quantity = result
            .as_str()
            .ok_or_else(|| FaucetError::Oracle(format!("balance is not a quantity: {}", result)))?;
        let balance = parse_quantity(quantity).map_err(FaucetError::Oracle)?;

        debug!(address = %address, balance = %balance, "Fetched faucet balance");
        Ok(balance)
    }
}

#[async_trait]
impl TransferSubmitter for BlockchainRpcClient {
    async fn submit(&self, transfer: &SignedTransferDto) -> FaucetResult<String> {
        let result = self
            .call(&self.submit_method, serde_json::json!([transfer.raw]))
            .await
            .map_err(FaucetError::Submission)?;

        let acceptance = match result {
            serde_json::Value::String(ack) => ack,
            other => other.to_string(),
        };
        info!(
            hash = %transfer.hash,
            accepted = %acceptance,
            "Transfer handed to authority intake"
        );
        Ok(acceptance)
    }
}

/// Parses a `0x`-prefixed hex quantity
pub fn parse_quantity(quantity: &str) -> Result<u128, String> {
    let digits = quantity
        .strip_prefix("0x")
        .ok_or_else(|| format!("quantity '{}' lacks 0x prefix", quantity))?;
    if digits.is_empty() {
        return Err("empty quantity".to_string());
    }
    u128::from_str_radix(digits, 16).map_err(|e| format!("quantity '{}': {}", quantity, e))
}
