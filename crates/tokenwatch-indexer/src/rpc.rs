//! One RPC client per worker: an alloy provider for typed calls and a raw
//! JSON-RPC path for block bodies and receipts.
//!
//! The raw path decodes into wire structs that only name the fields the
//! engine reads. Header fields stay untouched, which is what makes
//! proof-of-authority chains (oversized `extraData`) safe on every code path.

use std::fmt::Display;

use alloy::network::Ethereum;
use alloy::providers::{Provider, RootProvider};
use alloy::primitives::{Address, B256, U256, U64};
use alloy::rpc::types::{Filter, Log};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokenwatch_common::{Network, TokenwatchError};

pub type HttpProvider = RootProvider<Ethereum>;

pub struct RpcClient {
    provider: HttpProvider,
    http: reqwest::Client,
    rpc_url: String,
}

impl RpcClient {
    pub fn new(network: &Network) -> Result<Self, TokenwatchError> {
        let url: reqwest::Url = network.rpc_url.parse().map_err(|e| {
            TokenwatchError::Config(format!("invalid rpc url {}: {e}", network.rpc_url))
        })?;
        if network.need_poa {
            tracing::debug!(
                network = %network.name,
                "proof-of-authority chain, block headers are decoded leniently"
            );
        }
        Ok(Self {
            provider: RootProvider::new_http(url),
            http: reqwest::Client::new(),
            rpc_url: network.rpc_url.clone(),
        })
    }

    pub fn provider(&self) -> &HttpProvider {
        &self.provider
    }

    pub async fn latest_block(&self) -> Result<u64, TokenwatchError> {
        self.provider.get_block_number().await.map_err(rpc_err)
    }

    /// Plain `eth_getLogs`; the no-filters dialect.
    pub async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, TokenwatchError> {
        self.provider.get_logs(filter).await.map_err(rpc_err)
    }

    /// `eth_newFilter` followed by `eth_getFilterLogs`; the filterable
    /// dialect.
    pub async fn filter_logs(&self, filter: &Filter) -> Result<Vec<Log>, TokenwatchError> {
        let id = self.provider.new_filter(filter).await.map_err(rpc_err)?;
        self.provider.get_filter_logs(id).await.map_err(rpc_err)
    }

    pub async fn balance(&self, holder: Address) -> Result<U256, TokenwatchError> {
        self.provider.get_balance(holder).await.map_err(rpc_err)
    }

    pub async fn block_with_transactions(&self, number: u64) -> Result<RawBlock, TokenwatchError> {
        let params = serde_json::json!([format!("0x{number:x}"), true]);
        let block: Option<RawBlock> = self.call_raw("eth_getBlockByNumber", params).await?;
        block.ok_or_else(|| TokenwatchError::Rpc(format!("block {number} not found")))
    }

    pub async fn transaction_receipt(&self, hash: B256) -> Result<RawReceipt, TokenwatchError> {
        let receipt: Option<RawReceipt> = self
            .call_raw("eth_getTransactionReceipt", serde_json::json!([hash]))
            .await?;
        receipt.ok_or_else(|| TokenwatchError::Rpc(format!("no receipt for transaction {hash}")))
    }

    async fn call_raw<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, TokenwatchError> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| TokenwatchError::Rpc(format!("{method} request failed: {e}")))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TokenwatchError::Rpc(format!("{method} returned malformed JSON: {e}")))?;
        if let Some(error) = body.get("error") {
            return Err(TokenwatchError::Rpc(format!("{method} failed: {error}")));
        }
        let result = body.get("result").cloned().unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result)
            .map_err(|e| TokenwatchError::Rpc(format!("{method} returned unexpected result: {e}")))
    }
}

fn rpc_err(e: impl Display) -> TokenwatchError {
    TokenwatchError::Rpc(e.to_string())
}

/// A block body with full transactions, decoded leniently.
#[derive(Debug, Deserialize)]
pub struct RawBlock {
    pub number: U64,
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
pub struct RawTransaction {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
}

#[derive(Debug, Deserialize)]
pub struct RawReceipt {
    /// Absent on chains that predate receipt statuses; such transactions are
    /// skipped rather than guessed at.
    #[serde(default)]
    pub status: Option<U64>,
    pub from: Address,
    pub to: Option<Address>,
}

impl RawReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.is_some_and(|status| status != U64::ZERO)
    }
}
