//! Transfer records and their decoders.
//!
//! Every family decodes from two shapes: a pre-parsed event entry (the
//! filterable path, where the node already matched the event signature) and a
//! raw log receipt (the no-filters path, where the decoder itself must reject
//! logs that belong to other events). Malformed input never propagates as an
//! error; the record is dropped and a warning logged.

use std::collections::BTreeMap;

use alloy::dyn_abi::DynSolValue;
use alloy::primitives::{b256, Address, B256, U256};
use alloy::rpc::types::Log;
use bigdecimal::BigDecimal;
use std::str::FromStr;
use tokenwatch_common::{NewTransfer, Token, TokenKind, TokenwatchError};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_SIGNATURE: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// keccak256("TransferSingle(address,address,address,uint256,uint256)")
pub const TRANSFER_SINGLE_SIGNATURE: B256 =
    b256!("c3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62");

/// keccak256("TransferBatch(address,address,address,uint256[],uint256[])")
pub const TRANSFER_BATCH_SIGNATURE: B256 =
    b256!("4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e595d983b8c0526c8f7fb");

/// One observed transfer, still in chain terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRecord {
    Native {
        sender: Address,
        recipient: Address,
        amount: U256,
        tx_hash: B256,
    },
    Fungible {
        sender: Address,
        recipient: Address,
        amount: U256,
        tx_hash: B256,
    },
    NonFungible {
        sender: Address,
        recipient: Address,
        token_id: U256,
        tx_hash: B256,
    },
    MultiToken {
        operator: Address,
        sender: Address,
        recipient: Address,
        token_id: U256,
        amount: U256,
        tx_hash: B256,
    },
}

impl TransferRecord {
    pub fn sender(&self) -> Address {
        match self {
            TransferRecord::Native { sender, .. }
            | TransferRecord::Fungible { sender, .. }
            | TransferRecord::NonFungible { sender, .. }
            | TransferRecord::MultiToken { sender, .. } => *sender,
        }
    }

    pub fn recipient(&self) -> Address {
        match self {
            TransferRecord::Native { recipient, .. }
            | TransferRecord::Fungible { recipient, .. }
            | TransferRecord::NonFungible { recipient, .. }
            | TransferRecord::MultiToken { recipient, .. } => *recipient,
        }
    }

    pub fn tx_hash(&self) -> B256 {
        match self {
            TransferRecord::Native { tx_hash, .. }
            | TransferRecord::Fungible { tx_hash, .. }
            | TransferRecord::NonFungible { tx_hash, .. }
            | TransferRecord::MultiToken { tx_hash, .. } => *tx_hash,
        }
    }

    /// Map to the persisted shape: fungible sets amount, non-fungible sets
    /// token_id, multi-token sets both plus the operator.
    pub fn to_row(&self, token: &Token, fetched_by: i64) -> NewTransfer {
        let (operator, token_id, amount) = match self {
            TransferRecord::Native { amount, .. } | TransferRecord::Fungible { amount, .. } => {
                (None, None, Some(u256_to_decimal(*amount)))
            }
            TransferRecord::NonFungible { token_id, .. } => {
                (None, Some(u256_to_decimal(*token_id)), None)
            }
            TransferRecord::MultiToken {
                operator,
                token_id,
                amount,
                ..
            } => (
                Some(operator.to_string()),
                Some(u256_to_decimal(*token_id)),
                Some(u256_to_decimal(*amount)),
            ),
        };
        NewTransfer {
            token_instance_id: token.id,
            operator,
            sender: self.sender().to_string(),
            recipient: self.recipient().to_string(),
            tx_hash: self.tx_hash().to_string(),
            token_id,
            amount,
            fetched_by,
        }
    }
}

/// A log already decoded against an ABI event: the event name, the
/// transaction hash and the named arguments. Built at the RPC boundary so the
/// decoders never see transport types on the filterable path.
#[derive(Debug, Clone)]
pub struct EventEntry {
    pub event: String,
    pub tx_hash: B256,
    pub args: BTreeMap<String, DynSolValue>,
}

impl EventEntry {
    fn address_arg(&self, name: &str) -> Option<Address> {
        match self.args.get(name)? {
            DynSolValue::Address(address) => Some(*address),
            _ => None,
        }
    }

    fn uint_arg(&self, name: &str) -> Option<U256> {
        match self.args.get(name)? {
            DynSolValue::Uint(value, _) => Some(*value),
            _ => None,
        }
    }

    fn uint_array_arg(&self, name: &str) -> Option<Vec<U256>> {
        let values = match self.args.get(name)? {
            DynSolValue::Array(values) | DynSolValue::FixedArray(values) => values,
            _ => return None,
        };
        values
            .iter()
            .map(|value| match value {
                DynSolValue::Uint(v, _) => Some(*v),
                _ => None,
            })
            .collect()
    }
}

/// Which decoder a token's events run through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderFamily {
    Fungible,
    NonFungible,
    MultiToken,
}

impl DecoderFamily {
    pub fn for_token(kind: TokenKind) -> Result<Self, TokenwatchError> {
        match kind {
            TokenKind::Erc20 | TokenKind::Erc777 => Ok(DecoderFamily::Fungible),
            TokenKind::Erc721 | TokenKind::Erc721Enumerable => Ok(DecoderFamily::NonFungible),
            TokenKind::Erc1155 => Ok(DecoderFamily::MultiToken),
            TokenKind::Native => Err(TokenwatchError::Config(
                "native currency transfers decode from receipts, not logs".to_string(),
            )),
        }
    }

    pub fn from_event_entry(&self, entry: &EventEntry) -> Vec<TransferRecord> {
        match self {
            DecoderFamily::Fungible => fungible_from_event_entry(entry),
            DecoderFamily::NonFungible => non_fungible_from_event_entry(entry),
            DecoderFamily::MultiToken => multi_token_from_event_entry(entry),
        }
    }

    pub fn from_raw_log(&self, log: &Log) -> Vec<TransferRecord> {
        match self {
            DecoderFamily::Fungible => fungible_from_raw_log(log),
            DecoderFamily::NonFungible => non_fungible_from_raw_log(log),
            DecoderFamily::MultiToken => multi_token_from_raw_log(log),
        }
    }
}

pub(crate) fn u256_to_decimal(value: U256) -> BigDecimal {
    BigDecimal::from_str(&value.to_string()).unwrap_or_default()
}

// =====================
// Event-entry decoders
// =====================

fn fungible_from_event_entry(entry: &EventEntry) -> Vec<TransferRecord> {
    let decoded = (|| {
        Some(TransferRecord::Fungible {
            sender: entry.address_arg("from")?,
            recipient: entry.address_arg("to")?,
            amount: entry.uint_arg("value")?,
            tx_hash: entry.tx_hash,
        })
    })();
    match decoded {
        Some(record) => vec![record],
        None => {
            tracing::warn!(tx_hash = %entry.tx_hash, "transfer entry misses from/to/value arguments");
            vec![]
        }
    }
}

fn non_fungible_from_event_entry(entry: &EventEntry) -> Vec<TransferRecord> {
    let decoded = (|| {
        Some(TransferRecord::NonFungible {
            sender: entry.address_arg("from")?,
            recipient: entry.address_arg("to")?,
            token_id: entry.uint_arg("tokenId")?,
            tx_hash: entry.tx_hash,
        })
    })();
    match decoded {
        Some(record) => vec![record],
        None => {
            tracing::warn!(tx_hash = %entry.tx_hash, "transfer entry misses from/to/tokenId arguments");
            vec![]
        }
    }
}

fn multi_token_from_event_entry(entry: &EventEntry) -> Vec<TransferRecord> {
    match entry.event.as_str() {
        "TransferSingle" => {
            let decoded = (|| {
                Some(TransferRecord::MultiToken {
                    operator: entry.address_arg("operator")?,
                    sender: entry.address_arg("from")?,
                    recipient: entry.address_arg("to")?,
                    token_id: entry.uint_arg("id")?,
                    amount: entry.uint_arg("value")?,
                    tx_hash: entry.tx_hash,
                })
            })();
            match decoded {
                Some(record) => vec![record],
                None => {
                    tracing::warn!(tx_hash = %entry.tx_hash, "TransferSingle entry misses arguments");
                    vec![]
                }
            }
        }
        "TransferBatch" => {
            let decoded = (|| {
                let operator = entry.address_arg("operator")?;
                let sender = entry.address_arg("from")?;
                let recipient = entry.address_arg("to")?;
                let ids = entry.uint_array_arg("ids")?;
                let values = entry.uint_array_arg("values")?;
                Some((operator, sender, recipient, ids, values))
            })();
            let Some((operator, sender, recipient, ids, values)) = decoded else {
                tracing::warn!(tx_hash = %entry.tx_hash, "TransferBatch entry misses arguments");
                return vec![];
            };
            if ids.len() != values.len() {
                tracing::warn!(tx_hash = %entry.tx_hash, "bad TransferBatch: ids and values differ in length");
                return vec![];
            }
            ids.into_iter()
                .zip(values)
                .map(|(token_id, amount)| TransferRecord::MultiToken {
                    operator,
                    sender,
                    recipient,
                    token_id,
                    amount,
                    tx_hash: entry.tx_hash,
                })
                .collect()
        }
        _ => vec![],
    }
}

// =====================
// Raw-log decoders
// =====================

fn fungible_from_raw_log(log: &Log) -> Vec<TransferRecord> {
    match fungible_slots_from_raw_log(log) {
        Some((sender, recipient, amount, tx_hash)) => vec![TransferRecord::Fungible {
            sender,
            recipient,
            amount,
            tx_hash,
        }],
        None => vec![],
    }
}

fn non_fungible_from_raw_log(log: &Log) -> Vec<TransferRecord> {
    match fungible_slots_from_raw_log(log) {
        Some((sender, recipient, token_id, tx_hash)) => vec![TransferRecord::NonFungible {
            sender,
            recipient,
            token_id,
            tx_hash,
        }],
        None => vec![],
    }
}

/// ERC-20 and ERC-721 share the `Transfer` signature; the third slot (amount
/// or token id) sits in topics[3] of a 4-topic log and in the first data word
/// of a 3-topic log.
fn fungible_slots_from_raw_log(log: &Log) -> Option<(Address, Address, U256, B256)> {
    let topics = log.topics();
    if topics.len() != 3 && topics.len() != 4 {
        return None;
    }
    if topics[0] != TRANSFER_SIGNATURE {
        return None;
    }
    let tx_hash = log.transaction_hash?;
    let sender = crate::abi::word_to_address(topics[1].as_slice())?;
    let recipient = crate::abi::word_to_address(topics[2].as_slice())?;
    let value = if topics.len() == 4 {
        crate::abi::word_to_uint256(topics[3].as_slice())
    } else {
        crate::abi::word_to_uint256(&log.data().data)
    };
    let Some(value) = value else {
        tracing::warn!(%tx_hash, "transfer log carries no value slot");
        return None;
    };
    Some((sender, recipient, value, tx_hash))
}

fn multi_token_from_raw_log(log: &Log) -> Vec<TransferRecord> {
    let topics = log.topics();
    if topics.len() < 4 {
        return vec![];
    }
    let Some(tx_hash) = log.transaction_hash else {
        return vec![];
    };
    let slots = (|| {
        let operator = crate::abi::word_to_address(topics[1].as_slice())?;
        let sender = crate::abi::word_to_address(topics[2].as_slice())?;
        let recipient = crate::abi::word_to_address(topics[3].as_slice())?;
        Some((operator, sender, recipient))
    })();
    let Some((operator, sender, recipient)) = slots else {
        return vec![];
    };
    let data = log.data().data.as_ref();

    if topics[0] == TRANSFER_SINGLE_SIGNATURE {
        // Some non-standard emitters index id and value as extra topics.
        let pair = if topics.len() == 6 {
            (|| {
                Some((
                    crate::abi::word_to_uint256(topics[4].as_slice())?,
                    crate::abi::word_to_uint256(topics[5].as_slice())?,
                ))
            })()
        } else if data.len() >= 64 {
            (|| {
                Some((
                    crate::abi::word_to_uint256(&data[..32])?,
                    crate::abi::word_to_uint256(&data[32..64])?,
                ))
            })()
        } else {
            None
        };
        match pair {
            Some((token_id, amount)) => vec![TransferRecord::MultiToken {
                operator,
                sender,
                recipient,
                token_id,
                amount,
                tx_hash,
            }],
            None => vec![],
        }
    } else if topics[0] == TRANSFER_BATCH_SIGNATURE {
        let arrays = (|| {
            let ids_offset = usize::try_from(crate::abi::word_to_uint256(data.get(..32)?)?).ok()?;
            let values_offset =
                usize::try_from(crate::abi::word_to_uint256(data.get(32..64)?)?).ok()?;
            let ids = crate::abi::decode_uint256_array(data, ids_offset)?;
            let values = crate::abi::decode_uint256_array(data, values_offset)?;
            Some((ids, values))
        })();
        let Some((ids, values)) = arrays else {
            return vec![];
        };
        if ids.len() != values.len() {
            tracing::warn!(%tx_hash, "bad TransferBatch: ids and values differ in length");
            return vec![];
        }
        ids.into_iter()
            .zip(values)
            .map(|(token_id, amount)| TransferRecord::MultiToken {
                operator,
                sender,
                recipient,
                token_id,
                amount,
                tx_hash,
            })
            .collect()
    } else {
        vec![]
    }
}
