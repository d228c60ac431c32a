//! Solana JSON-RPC implementation of the on-chain read interface
//!
//! Player accounts are located with a `getProgramAccounts` memcmp filter on
//! the authority field rather than by PDA derivation, which keeps the
//! program's address-derivation rules out of the client. The stats account
//! address is fixed per deployment and supplied in the config.

use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::chain::{Address, GlobalStats, PlayerAccount, ReferralRpc};
use crate::error::{HistoryError, Result};

/// Byte offset of the authority field inside a player account (past the
/// 8-byte discriminator).
const PLAYER_AUTHORITY_OFFSET: u64 = 8;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// JSON-RPC endpoint URL
    pub endpoint: String,
    /// The matrix program id
    pub program_id: Address,
    /// The program's global stats account
    pub stats_account: Address,
    /// Commitment level for reads
    pub commitment: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl RpcConfig {
    pub fn new(endpoint: impl Into<String>, program_id: Address, stats_account: Address) -> Self {
        Self {
            endpoint: endpoint.into(),
            program_id,
            stats_account,
            commitment: "confirmed".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Read-only Solana JSON-RPC client.
pub struct SolanaRpcClient {
    config: RpcConfig,
    client: Client,
}

impl SolanaRpcClient {
    pub fn new(config: RpcConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self.client.post(&self.config.endpoint).json(&body).send().await?;
        let payload: Value = response.json().await?;

        if let Some(err) = payload.get("error") {
            return Err(HistoryError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }

        debug!(method, "RPC call succeeded");
        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Decode the `["<base64>", "base64"]` data tuple of an account value.
    fn decode_account_data(account: &Value) -> Result<Vec<u8>> {
        let encoded = account
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(Value::as_str)
            .ok_or_else(|| HistoryError::InvalidResponse("missing account data".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| HistoryError::InvalidResponse(format!("bad base64: {}", e)))
    }
}

#[async_trait::async_trait]
impl ReferralRpc for SolanaRpcClient {
    async fn fetch_player(&self, wallet: &Address) -> Result<Option<PlayerAccount>> {
        let result = self
            .call(
                "getProgramAccounts",
                json!([
                    self.config.program_id.as_str(),
                    {
                        "encoding": "base64",
                        "commitment": self.config.commitment,
                        "filters": [
                            { "memcmp": { "offset": PLAYER_AUTHORITY_OFFSET, "bytes": wallet.as_str() } }
                        ],
                    }
                ]),
            )
            .await?;

        let Some(entries) = result.as_array() else {
            return Err(HistoryError::InvalidResponse(
                "getProgramAccounts did not return an array".into(),
            ));
        };
        let Some(entry) = entries.first() else {
            return Ok(None);
        };
        let account = entry
            .get("account")
            .ok_or_else(|| HistoryError::InvalidResponse("missing account field".into()))?;

        let data = Self::decode_account_data(account)?;
        PlayerAccount::from_account_data(&data).map(Some)
    }

    async fn fetch_global_stats(&self) -> Result<Option<GlobalStats>> {
        let result = self
            .call(
                "getAccountInfo",
                json!([
                    self.config.stats_account.as_str(),
                    { "encoding": "base64", "commitment": self.config.commitment }
                ]),
            )
            .await?;

        let value = result.get("value").cloned().unwrap_or(Value::Null);
        if value.is_null() {
            return Ok(None);
        }

        let data = Self::decode_account_data(&value)?;
        GlobalStats::from_account_data(&data).map(Some)
    }
}
