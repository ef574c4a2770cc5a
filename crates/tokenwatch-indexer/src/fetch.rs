//! Transfer fetchers: one per watched token, bound to the worker's RPC
//! client. Event fetchers read logs, the receipt fetcher walks full blocks.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy::dyn_abi::EventExt;
use alloy::json_abi::Event;
use alloy::primitives::Address;
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use tokenwatch_common::{NetworkKind, Token, TokenKind, TokenStrategy, TokenwatchError};

use crate::abis;
use crate::rpc::RpcClient;
use crate::transfer::{DecoderFamily, EventEntry, TransferRecord};

#[async_trait]
pub trait TransferFetcher: Send + Sync {
    fn token(&self) -> &Token;

    /// Human-readable identity for log lines.
    fn describe(&self) -> String;

    /// All transfers of the bound token in `[from_block, to_block]`, both
    /// inclusive. Transport and node errors surface; the caller treats them
    /// as a transient skip.
    async fn get_transfers(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferRecord>, TokenwatchError>;
}

/// Select the fetcher from the token's strategy. The token must already be
/// validated, so the strategy and kind agree.
pub fn transfer_fetcher_for(
    rpc: Arc<RpcClient>,
    token: Token,
    network_kind: NetworkKind,
) -> Result<Box<dyn TransferFetcher>, TokenwatchError> {
    token.validate()?;
    match token.strategy {
        TokenStrategy::EventBasedTransfer => Ok(Box::new(EventTransferFetcher::new(
            rpc,
            token,
            network_kind,
        )?)),
        TokenStrategy::ReceiptBasedTransfer => {
            Ok(Box::new(ReceiptTransferFetcher { rpc, token }))
        }
    }
}

// =====================
// Event fetcher
// =====================

pub struct EventTransferFetcher {
    rpc: Arc<RpcClient>,
    token: Token,
    network_kind: NetworkKind,
    address: Address,
    events: Vec<Event>,
    family: DecoderFamily,
}

impl EventTransferFetcher {
    pub fn new(
        rpc: Arc<RpcClient>,
        token: Token,
        network_kind: NetworkKind,
    ) -> Result<Self, TokenwatchError> {
        let address = token.address.as_deref().ok_or_else(|| {
            TokenwatchError::Config(format!("token {} has no contract address", token.name))
        })?;
        let address = Address::from_str(address).map_err(|_| {
            TokenwatchError::Config(format!(
                "token {} has a malformed contract address {address}",
                token.name
            ))
        })?;

        let abi = abis::transfer_abi(token.kind)?;
        let events = event_names(token.kind)?
            .iter()
            .map(|name| {
                abi.events
                    .get(*name)
                    .and_then(|overloads| overloads.first())
                    .cloned()
                    .ok_or_else(|| {
                        TokenwatchError::Config(format!(
                            "ABI for {} has no {name} event",
                            token.kind
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let family = DecoderFamily::for_token(token.kind)?;

        Ok(Self {
            rpc,
            token,
            network_kind,
            address,
            events,
            family,
        })
    }

    /// Filterable nodes narrow by event signature server-side and return
    /// entries the ABI can name, one filter per event.
    async fn transfers_from_filters(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferRecord>, TokenwatchError> {
        let mut records = Vec::new();
        for event in &self.events {
            let filter = Filter::new()
                .from_block(from_block)
                .to_block(to_block)
                .address(self.address)
                .event_signature(event.selector());
            for log in self.rpc.filter_logs(&filter).await? {
                let Some(entry) = decode_entry(event, &log) else {
                    continue;
                };
                records.extend(self.family.from_event_entry(&entry));
            }
        }
        Ok(records)
    }

    /// No-filters nodes return every log of the contract; the raw-log
    /// decoder rejects anything whose topic0 belongs to another event.
    async fn transfers_from_raw_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferRecord>, TokenwatchError> {
        let filter = Filter::new()
            .from_block(from_block)
            .to_block(to_block)
            .address(self.address);
        let logs = self.rpc.logs(&filter).await?;
        let mut records = Vec::new();
        for log in &logs {
            records.extend(self.family.from_raw_log(log));
        }
        Ok(records)
    }
}

#[async_trait]
impl TransferFetcher for EventTransferFetcher {
    fn token(&self) -> &Token {
        &self.token
    }

    fn describe(&self) -> String {
        format!("events of token {} ({})", self.address, self.token.kind)
    }

    async fn get_transfers(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferRecord>, TokenwatchError> {
        match self.network_kind {
            NetworkKind::Filterable => self.transfers_from_filters(from_block, to_block).await,
            NetworkKind::NoFilters => self.transfers_from_raw_logs(from_block, to_block).await,
        }
    }
}

fn event_names(kind: TokenKind) -> Result<&'static [&'static str], TokenwatchError> {
    match kind {
        TokenKind::Erc20 | TokenKind::Erc777 | TokenKind::Erc721 | TokenKind::Erc721Enumerable => {
            Ok(&["Transfer"])
        }
        TokenKind::Erc1155 => Ok(&["TransferSingle", "TransferBatch"]),
        TokenKind::Native => Err(TokenwatchError::Config(
            "native currency has no transfer events, use the receipt fetcher".to_string(),
        )),
    }
}

/// Decode a log against an ABI event into named arguments. Returns `None`
/// (with a warning) for logs that do not fit the event.
fn decode_entry(event: &Event, log: &Log) -> Option<EventEntry> {
    let tx_hash = log.transaction_hash?;
    let decoded = match event.decode_log_parts(log.topics().iter().copied(), &log.data().data) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(event = %event.name, %tx_hash, "undecodable log entry: {e}");
            return None;
        }
    };

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut args = BTreeMap::new();
    for input in &event.inputs {
        let value = if input.indexed {
            indexed.next()
        } else {
            body.next()
        }?;
        args.insert(input.name.clone(), value);
    }

    Some(EventEntry {
        event: event.name.clone(),
        tx_hash,
        args,
    })
}

// =====================
// Receipt fetcher
// =====================

/// Walks every block in the range with full transaction bodies and emits a
/// native transfer for each successful value-carrying transaction.
pub struct ReceiptTransferFetcher {
    rpc: Arc<RpcClient>,
    token: Token,
}

#[async_trait]
impl TransferFetcher for ReceiptTransferFetcher {
    fn token(&self) -> &Token {
        &self.token
    }

    fn describe(&self) -> String {
        format!("receipts of native currency on network {}", self.token.network_id)
    }

    async fn get_transfers(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferRecord>, TokenwatchError> {
        let mut records = Vec::new();
        for number in from_block..=to_block {
            let block = self.rpc.block_with_transactions(number).await?;
            tracing::debug!("taking receipts of block {number}");
            for transaction in &block.transactions {
                match self.rpc.transaction_receipt(transaction.hash).await {
                    Ok(receipt) if receipt.succeeded() && !transaction.value.is_zero() => {
                        // Value sent to contract creation has no recipient to
                        // credit.
                        let Some(recipient) = receipt.to else {
                            tracing::debug!(
                                tx_hash = %transaction.hash,
                                "skipping value transfer with no recipient"
                            );
                            continue;
                        };
                        records.push(TransferRecord::Native {
                            sender: receipt.from,
                            recipient,
                            amount: transaction.value,
                            tx_hash: transaction.hash,
                        });
                    }
                    Ok(_) => {
                        tracing::debug!(
                            tx_hash = %transaction.hash,
                            "transaction either failed or transfers no native currency"
                        );
                    }
                    Err(e) => {
                        tracing::debug!(
                            tx_hash = %transaction.hash,
                            "skipping transaction of block {number}: {e}"
                        );
                    }
                }
            }
        }
        Ok(records)
    }
}
