//! In-memory ports and JSON-RPC stubbing shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde_json::json;
use tokenwatch_common::{
    ConfigStore, Indexer, IndexerKind, IndexerStatus, IndexerStrategy, Network, NetworkKind,
    NewTransfer, Persistence, Token, TokenKind, TokenStrategy, TokenwatchError,
};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers a JSON-RPC request with a fixed `result`, echoing the request id.
pub struct RpcRespond(pub serde_json::Value);

impl Respond for RpcRespond {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).unwrap_or(serde_json::Value::Null);
        let id = body.get("id").cloned().unwrap_or(json!(1));
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": self.0,
        }))
    }
}

/// Mount a responder for one JSON-RPC method.
pub async fn stub_rpc(server: &MockServer, rpc_method: &str, result: serde_json::Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(RpcRespond(result))
        .mount(server)
        .await;
}

pub fn network(rpc_url: &str, kind: NetworkKind) -> Network {
    Network {
        id: 1,
        chain_id: 137,
        name: "testnet".to_string(),
        rpc_url: rpc_url.to_string(),
        max_step: 1000,
        kind,
        need_poa: false,
        explorer_url: String::new(),
    }
}

pub fn erc20_token(id: i64) -> Token {
    Token {
        id,
        address: Some("0xc2132D05D31c914a87C6611C10748AEb04B58e8F".to_string()),
        name: "USDT".to_string(),
        network_id: 1,
        kind: TokenKind::Erc20,
        strategy: TokenStrategy::EventBasedTransfer,
    }
}

pub fn native_token(id: i64) -> Token {
    Token {
        id,
        address: None,
        name: "ETH".to_string(),
        network_id: 1,
        kind: TokenKind::Native,
        strategy: TokenStrategy::ReceiptBasedTransfer,
    }
}

pub fn indexer(kind: IndexerKind, strategy: IndexerStrategy) -> Indexer {
    Indexer {
        id: 1,
        name: "test-indexer".to_string(),
        network_id: 1,
        kind,
        strategy,
        strategy_params: json!({}),
        last_block: 100,
        short_sleep_seconds: 0,
        long_sleep_seconds: 0,
        status: IndexerStatus::On,
    }
}

/// An S1-shaped `Transfer` log as the node would return it.
pub fn s1_log_json() -> serde_json::Value {
    json!({
        "address": "0xc2132d05d31c914a87c6611c10748aeb04b58e8f",
        "topics": [
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef",
            "0x000000000000000000000000db6f2ed702823b903b6d185f68bdf715d1b3af76",
            "0x0000000000000000000000007ab6c736baf1dac266aab43884d82974a9adcccf"
        ],
        "data": "0x0000000000000000000000000000000000000000000000000000000065e07c93",
        "blockNumber": "0x2a1e2b3",
        "transactionHash": "0xa35cac639bd0f75e19bf28ceb26e60ddd057cce6e702769abb7b3e470300debd",
        "transactionIndex": "0x4",
        "blockHash": "0x3f5b3fa5038a372f4128a2bb72658393f5776b1257de1f64788a740cbea066c8",
        "logIndex": "0x5",
        "removed": false
    })
}

#[derive(Default)]
pub struct MemoryPersistence {
    pub transfers: Mutex<Vec<NewTransfer>>,
    pub balances: Mutex<BTreeMap<(i64, String), BigDecimal>>,
    pub held: Mutex<BTreeMap<(i64, String), BTreeSet<String>>>,
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn transfer_exists(&self, tx_hash: &str) -> Result<bool, TokenwatchError> {
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.tx_hash == tx_hash))
    }

    async fn insert_transfer(&self, transfer: NewTransfer) -> Result<bool, TokenwatchError> {
        let mut transfers = self.transfers.lock().unwrap();
        if transfers.iter().any(|t| t.tx_hash == transfer.tx_hash) {
            return Ok(false);
        }
        transfers.push(transfer);
        Ok(true)
    }

    async fn transfer_participants(&self, token_id: i64) -> Result<Vec<String>, TokenwatchError> {
        let transfers = self.transfers.lock().unwrap();
        let mut participants = BTreeSet::new();
        for transfer in transfers.iter().filter(|t| t.token_instance_id == token_id) {
            participants.insert(transfer.sender.clone());
            participants.insert(transfer.recipient.clone());
        }
        Ok(participants.into_iter().collect())
    }

    async fn balance_amount(
        &self,
        token_id: i64,
        holder: &str,
    ) -> Result<Option<BigDecimal>, TokenwatchError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&(token_id, holder.to_string()))
            .cloned())
    }

    async fn upsert_balance_amount(
        &self,
        token_id: i64,
        holder: &str,
        amount: &BigDecimal,
        _tracked_by: i64,
    ) -> Result<(), TokenwatchError> {
        self.balances
            .lock()
            .unwrap()
            .insert((token_id, holder.to_string()), amount.clone());
        Ok(())
    }

    async fn held_token_ids(
        &self,
        token_id: i64,
        holder: &str,
    ) -> Result<Vec<BigDecimal>, TokenwatchError> {
        Ok(self
            .held
            .lock()
            .unwrap()
            .get(&(token_id, holder.to_string()))
            .map(|ids| {
                ids.iter()
                    .map(|id| id.parse().unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_held_token(
        &self,
        token_id: i64,
        holder: &str,
        nft_id: &BigDecimal,
        _tracked_by: i64,
    ) -> Result<(), TokenwatchError> {
        self.held
            .lock()
            .unwrap()
            .entry((token_id, holder.to_string()))
            .or_default()
            .insert(nft_id.to_string());
        Ok(())
    }

    async fn delete_held_token(
        &self,
        token_id: i64,
        holder: &str,
        nft_id: &BigDecimal,
    ) -> Result<(), TokenwatchError> {
        if let Some(ids) = self
            .held
            .lock()
            .unwrap()
            .get_mut(&(token_id, holder.to_string()))
        {
            ids.remove(&nft_id.to_string());
        }
        Ok(())
    }
}

pub struct MemoryConfigStore {
    pub indexer: Mutex<Indexer>,
    pub network: Network,
    pub tokens: Vec<Token>,
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn indexer_by_name(&self, name: &str) -> Result<Indexer, TokenwatchError> {
        let indexer = self.indexer.lock().unwrap();
        if indexer.name == name {
            Ok(indexer.clone())
        } else {
            Err(TokenwatchError::NotFound(format!("indexer {name}")))
        }
    }

    async fn network(&self, _id: i64) -> Result<Network, TokenwatchError> {
        Ok(self.network.clone())
    }

    async fn watched_tokens(&self, _indexer_id: i64) -> Result<Vec<Token>, TokenwatchError> {
        Ok(self.tokens.clone())
    }

    async fn set_last_block(
        &self,
        _indexer_id: i64,
        last_block: u64,
    ) -> Result<(), TokenwatchError> {
        self.indexer.lock().unwrap().last_block = last_block;
        Ok(())
    }

    async fn set_status(
        &self,
        _name: &str,
        status: IndexerStatus,
    ) -> Result<(), TokenwatchError> {
        self.indexer.lock().unwrap().status = status;
        Ok(())
    }
}
