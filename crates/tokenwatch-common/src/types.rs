use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::error::TokenwatchError;

/// `0x` + 64 hex characters.
pub const TX_HASH_LENGTH: usize = 66;
/// `0x` + 40 hex characters.
pub const ADDRESS_LENGTH: usize = 42;

// =====================
// Enumerations
// =====================

/// How a network's node answers log queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkKind {
    /// Node supports `eth_newFilter` / `eth_getFilterLogs`.
    Filterable,
    /// Node only answers plain `eth_getLogs` without topic narrowing.
    NoFilters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Native,
    Erc20,
    Erc721,
    Erc721Enumerable,
    Erc777,
    Erc1155,
}

/// How transfers of a token are discovered on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStrategy {
    EventBasedTransfer,
    ReceiptBasedTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerKind {
    TransferIndexer,
    BalanceIndexer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerStrategy {
    Recipient,
    Sender,
    TokenScan,
    SpecifiedHolders,
    TransfersParticipants,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerStatus {
    On,
    Off,
}

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = TokenwatchError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(TokenwatchError::Config(format!(
                        "unknown {} value: {other}",
                        stringify!($name)
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

text_enum!(NetworkKind {
    Filterable => "filterable",
    NoFilters => "no_filters",
});

text_enum!(TokenKind {
    Native => "native",
    Erc20 => "erc20",
    Erc721 => "erc721",
    Erc721Enumerable => "erc721enumerable",
    Erc777 => "erc777",
    Erc1155 => "erc1155",
});

text_enum!(TokenStrategy {
    EventBasedTransfer => "event_based_transfer",
    ReceiptBasedTransfer => "receipt_based_transfer",
});

text_enum!(IndexerKind {
    TransferIndexer => "transfer_indexer",
    BalanceIndexer => "balance_indexer",
});

text_enum!(IndexerStrategy {
    Recipient => "recipient",
    Sender => "sender",
    TokenScan => "token_scan",
    SpecifiedHolders => "specified_holders",
    TransfersParticipants => "transfers_participants",
});

text_enum!(IndexerStatus {
    On => "on",
    Off => "off",
});

// =====================
// Domain records
// =====================

/// One chain the system knows about. Immutable at worker runtime; workers
/// reload it from the store at the top of every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: i64,
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    /// Largest block span a single fetch request may cover.
    pub max_step: u64,
    pub kind: NetworkKind,
    /// Proof-of-authority chains emit oversized `extraData` headers; the RPC
    /// layer must tolerate them when this is set.
    pub need_poa: bool,
    pub explorer_url: String,
}

/// One indexed asset on one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: i64,
    /// Null exactly when `kind` is native.
    pub address: Option<String>,
    pub name: String,
    pub network_id: i64,
    pub kind: TokenKind,
    pub strategy: TokenStrategy,
}

impl Token {
    /// Native tokens have no address and are tracked from receipts; everything
    /// else has a well-formed 20-byte address and is tracked from events.
    pub fn validate(&self) -> Result<(), TokenwatchError> {
        match self.kind {
            TokenKind::Native => {
                if self.strategy != TokenStrategy::ReceiptBasedTransfer {
                    return Err(TokenwatchError::Config(format!(
                        "native token {} must use the receipt_based_transfer strategy",
                        self.name
                    )));
                }
                if self.address.is_some() {
                    return Err(TokenwatchError::Config(format!(
                        "native token {} must have a null address",
                        self.name
                    )));
                }
            }
            _ => {
                if self.strategy != TokenStrategy::EventBasedTransfer {
                    return Err(TokenwatchError::Config(format!(
                        "non-native token {} must use the event_based_transfer strategy",
                        self.name
                    )));
                }
                match &self.address {
                    Some(address) if is_ethereum_address(address) => {}
                    Some(address) => {
                        return Err(TokenwatchError::Config(format!(
                            "token {} has a malformed address {address}",
                            self.name
                        )))
                    }
                    None => {
                        return Err(TokenwatchError::Config(format!(
                            "non-native token {} must have an address",
                            self.name
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

/// One worker definition. `last_block` is mutated only by the worker that
/// owns the row; `status` by the operator plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indexer {
    pub id: i64,
    /// Also used as the container name.
    pub name: String,
    pub network_id: i64,
    pub kind: IndexerKind,
    pub strategy: IndexerStrategy,
    pub strategy_params: serde_json::Value,
    /// Highest block already processed; monotonically non-decreasing.
    pub last_block: u64,
    pub short_sleep_seconds: u64,
    pub long_sleep_seconds: u64,
    pub status: IndexerStatus,
}

impl Indexer {
    pub fn validate(&self) -> Result<(), TokenwatchError> {
        if !is_container_name(&self.name) {
            return Err(TokenwatchError::Config(format!(
                "indexer name {} is not a valid container name",
                self.name
            )));
        }
        let allowed: &[IndexerStrategy] = match self.kind {
            IndexerKind::TransferIndexer => &[
                IndexerStrategy::Recipient,
                IndexerStrategy::Sender,
                IndexerStrategy::TokenScan,
            ],
            IndexerKind::BalanceIndexer => &[
                IndexerStrategy::SpecifiedHolders,
                IndexerStrategy::TransfersParticipants,
            ],
        };
        if !allowed.contains(&self.strategy) {
            return Err(TokenwatchError::Config(format!(
                "strategy {} is not allowed for a {}",
                self.strategy, self.kind
            )));
        }
        Ok(())
    }
}

/// A transfer ready to persist. Exactly one of these holds: amount set and
/// token_id null (fungible), token_id set and amount null (non-fungible),
/// both set with operator set (multi-token).
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransfer {
    pub token_instance_id: i64,
    pub operator: Option<String>,
    pub sender: String,
    pub recipient: String,
    pub tx_hash: String,
    pub token_id: Option<BigDecimal>,
    pub amount: Option<BigDecimal>,
    pub fetched_by: i64,
}

// =====================
// Validation helpers
// =====================

/// `0x` followed by exactly 40 hex digits.
pub fn is_ethereum_address(address: &str) -> bool {
    let Some(hex_part) = address.strip_prefix("0x") else {
        return false;
    };
    hex_part.len() == 40 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// A lowercase letter followed by lowercase letters, digits or dashes.
pub fn is_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    let mut rest = 0usize;
    for c in chars {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
            return false;
        }
        rest += 1;
    }
    rest > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(kind: TokenKind, strategy: TokenStrategy, address: Option<&str>) -> Token {
        Token {
            id: 1,
            address: address.map(str::to_string),
            name: "test".to_string(),
            network_id: 1,
            kind,
            strategy,
        }
    }

    fn indexer(kind: IndexerKind, strategy: IndexerStrategy) -> Indexer {
        Indexer {
            id: 1,
            name: "polygon-usdt-tracker".to_string(),
            network_id: 1,
            kind,
            strategy,
            strategy_params: serde_json::json!({}),
            last_block: 0,
            short_sleep_seconds: 1,
            long_sleep_seconds: 5,
            status: IndexerStatus::Off,
        }
    }

    #[test]
    fn enums_round_trip_through_text() {
        for kind in [
            TokenKind::Native,
            TokenKind::Erc20,
            TokenKind::Erc721,
            TokenKind::Erc721Enumerable,
            TokenKind::Erc777,
            TokenKind::Erc1155,
        ] {
            assert_eq!(kind.as_str().parse::<TokenKind>().unwrap(), kind);
        }
        assert_eq!(
            "no_filters".parse::<NetworkKind>().unwrap(),
            NetworkKind::NoFilters
        );
        assert_eq!(
            "transfers_participants".parse::<IndexerStrategy>().unwrap(),
            IndexerStrategy::TransfersParticipants
        );
    }

    #[test]
    fn unknown_enum_value_is_a_config_error() {
        let err = "erc9000".parse::<TokenKind>().unwrap_err();
        assert!(matches!(err, TokenwatchError::Config(_)));
    }

    #[test]
    fn native_token_requires_null_address_and_receipts() {
        let ok = token(TokenKind::Native, TokenStrategy::ReceiptBasedTransfer, None);
        assert!(ok.validate().is_ok());

        let with_address = token(
            TokenKind::Native,
            TokenStrategy::ReceiptBasedTransfer,
            Some("0xeB3D38AF7f3594014cf23C273f21EEd623e1E0a3"),
        );
        assert!(with_address.validate().is_err());

        let event_based = token(TokenKind::Native, TokenStrategy::EventBasedTransfer, None);
        assert!(event_based.validate().is_err());
    }

    #[test]
    fn non_native_token_requires_address_and_events() {
        let ok = token(
            TokenKind::Erc20,
            TokenStrategy::EventBasedTransfer,
            Some("0xeB3D38AF7f3594014cf23C273f21EEd623e1E0a3"),
        );
        assert!(ok.validate().is_ok());

        let no_address = token(TokenKind::Erc20, TokenStrategy::EventBasedTransfer, None);
        assert!(no_address.validate().is_err());

        let receipt_based = token(
            TokenKind::Erc721,
            TokenStrategy::ReceiptBasedTransfer,
            Some("0xeB3D38AF7f3594014cf23C273f21EEd623e1E0a3"),
        );
        assert!(receipt_based.validate().is_err());

        let malformed = token(
            TokenKind::Erc20,
            TokenStrategy::EventBasedTransfer,
            Some("0x12345"),
        );
        assert!(malformed.validate().is_err());
    }

    #[test]
    fn strategy_matrix_is_enforced() {
        assert!(indexer(IndexerKind::TransferIndexer, IndexerStrategy::TokenScan)
            .validate()
            .is_ok());
        assert!(indexer(IndexerKind::TransferIndexer, IndexerStrategy::Recipient)
            .validate()
            .is_ok());
        assert!(
            indexer(IndexerKind::BalanceIndexer, IndexerStrategy::SpecifiedHolders)
                .validate()
                .is_ok()
        );

        assert!(
            indexer(IndexerKind::TransferIndexer, IndexerStrategy::SpecifiedHolders)
                .validate()
                .is_err()
        );
        assert!(indexer(IndexerKind::BalanceIndexer, IndexerStrategy::TokenScan)
            .validate()
            .is_err());
    }

    #[test]
    fn container_names_follow_the_pattern() {
        assert!(is_container_name("polygon-mainnet-usdt-tracker"));
        assert!(is_container_name("a1"));
        assert!(!is_container_name("a"));
        assert!(!is_container_name("1indexer"));
        assert!(!is_container_name("My-Indexer"));
        assert!(!is_container_name("has_underscore"));
        assert!(!is_container_name(""));
    }

    #[test]
    fn address_validation() {
        assert!(is_ethereum_address(
            "0xdb6f2ed702823b903b6d185f68bdf715d1b3af76"
        ));
        assert!(is_ethereum_address(
            "0xEB3D38AF7f3594014cf23C273f21EEd623e1E0a3"
        ));
        assert!(!is_ethereum_address(
            "db6f2ed702823b903b6d185f68bdf715d1b3af76"
        ));
        assert!(!is_ethereum_address("0x12345"));
        assert!(!is_ethereum_address(
            "0xzz6f2ed702823b903b6d185f68bdf715d1b3af76"
        ));
    }
}
