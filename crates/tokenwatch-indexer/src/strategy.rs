//! Strategies: what to store (transfer strategies) and whom to poll (balance
//! strategies). Parameters are validated at construction, before any record
//! is touched; a bad parameter is a configuration error that kills the
//! worker at startup.

use std::str::FromStr;

use alloy::primitives::Address;
use tokenwatch_common::{
    Indexer, IndexerStrategy, Persistence, Token, TokenwatchError,
};

use crate::transfer::TransferRecord;

/// Filters fetched transfers and persists the survivors idempotently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStrategy {
    /// Keep transfers whose recipient matches; addresses compare by value,
    /// so case never matters.
    Recipient { recipient: Address },
    Sender { sender: Address },
    /// Keep everything.
    TokenScan,
}

impl TransferStrategy {
    pub fn from_indexer(indexer: &Indexer) -> Result<Self, TokenwatchError> {
        match indexer.strategy {
            IndexerStrategy::Recipient => Ok(TransferStrategy::Recipient {
                recipient: address_param(&indexer.strategy_params, "recipient")?,
            }),
            IndexerStrategy::Sender => Ok(TransferStrategy::Sender {
                sender: address_param(&indexer.strategy_params, "sender")?,
            }),
            IndexerStrategy::TokenScan => Ok(TransferStrategy::TokenScan),
            other => Err(TokenwatchError::Config(format!(
                "strategy {other} is not usable for a transfer indexer"
            ))),
        }
    }

    pub async fn apply(
        &self,
        store: &dyn Persistence,
        token: &Token,
        fetched_by: i64,
        records: &[TransferRecord],
    ) -> Result<(), TokenwatchError> {
        for record in records {
            let keep = match self {
                TransferStrategy::Recipient { recipient } => record.recipient() == *recipient,
                TransferStrategy::Sender { sender } => record.sender() == *sender,
                TransferStrategy::TokenScan => true,
            };
            if keep {
                save_transfer(store, token, fetched_by, record).await?;
            }
        }
        Ok(())
    }
}

/// The existence check makes reprocessing a range a no-op; the unique
/// constraint on tx_hash backstops the race with other writers.
async fn save_transfer(
    store: &dyn Persistence,
    token: &Token,
    fetched_by: i64,
    record: &TransferRecord,
) -> Result<(), TokenwatchError> {
    let row = record.to_row(token, fetched_by);
    if store.transfer_exists(&row.tx_hash).await? {
        tracing::info!(tx_hash = %row.tx_hash, "transfer already stored, skipping");
        return Ok(());
    }
    store.insert_transfer(row).await?;
    Ok(())
}

/// Enumerates the holders a balance indexer polls for one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceStrategy {
    SpecifiedHolders { holders: Vec<Address> },
    /// Everyone that ever sent or received the token, per stored transfers.
    TransfersParticipants,
}

impl BalanceStrategy {
    pub fn from_indexer(indexer: &Indexer) -> Result<Self, TokenwatchError> {
        match indexer.strategy {
            IndexerStrategy::SpecifiedHolders => Ok(BalanceStrategy::SpecifiedHolders {
                holders: holders_param(&indexer.strategy_params)?,
            }),
            IndexerStrategy::TransfersParticipants => Ok(BalanceStrategy::TransfersParticipants),
            other => Err(TokenwatchError::Config(format!(
                "strategy {other} is not usable for a balance indexer"
            ))),
        }
    }

    pub async fn pick_holders(
        &self,
        store: &dyn Persistence,
        token: &Token,
    ) -> Result<Vec<Address>, TokenwatchError> {
        match self {
            BalanceStrategy::SpecifiedHolders { holders } => Ok(holders.clone()),
            BalanceStrategy::TransfersParticipants => {
                let mut holders = Vec::new();
                for participant in store.transfer_participants(token.id).await? {
                    match Address::from_str(&participant) {
                        Ok(address) => holders.push(address),
                        Err(_) => {
                            tracing::warn!(
                                %participant,
                                "stored participant is not an ethereum address, skipping"
                            );
                        }
                    }
                }
                Ok(holders)
            }
        }
    }
}

fn address_param(params: &serde_json::Value, key: &str) -> Result<Address, TokenwatchError> {
    let value = params.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        TokenwatchError::Config(format!(
            "strategy has no `{key}` provided, add it to the strategy params"
        ))
    })?;
    Address::from_str(value).map_err(|_| {
        TokenwatchError::Config(format!(
            "strategy param `{key}` is not an ethereum address: {value}"
        ))
    })
}

fn holders_param(params: &serde_json::Value) -> Result<Vec<Address>, TokenwatchError> {
    let values = params.get("holders").and_then(|v| v.as_array()).ok_or_else(|| {
        TokenwatchError::Config(
            "specified holders strategy params carry no `holders` array".to_string(),
        )
    })?;
    if values.is_empty() {
        return Err(TokenwatchError::Config(
            "specified holders strategy needs at least one holder".to_string(),
        ));
    }
    values
        .iter()
        .map(|value| {
            let holder = value.as_str().unwrap_or_default();
            Address::from_str(holder).map_err(|_| {
                TokenwatchError::Config(format!(
                    "specified holder {value} is not an ethereum address"
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{erc20_token, indexer, MemoryPersistence};
    use alloy::primitives::{B256, U256};
    use serde_json::json;
    use tokenwatch_common::IndexerKind;

    const A: &str = "0xdb6f2ed702823b903b6d185f68bdf715d1b3af76";
    const B: &str = "0x7ab6c736baf1dac266aab43884d82974a9adcccf";

    fn fungible(sender: &str, recipient: &str, nonce: u8) -> TransferRecord {
        TransferRecord::Fungible {
            sender: sender.parse().unwrap(),
            recipient: recipient.parse().unwrap(),
            amount: U256::from(10),
            tx_hash: B256::repeat_byte(nonce),
        }
    }

    #[tokio::test]
    async fn recipient_strategy_filters_and_stays_idempotent() {
        // S5: recipients [A, B, A] with recipient=A stores two rows; a rerun
        // stores nothing new.
        let mut definition = indexer(IndexerKind::TransferIndexer, IndexerStrategy::Recipient);
        definition.strategy_params = json!({ "recipient": A });
        let strategy = TransferStrategy::from_indexer(&definition).unwrap();

        let records = vec![fungible(B, A, 1), fungible(A, B, 2), fungible(B, A, 3)];
        let store = MemoryPersistence::default();
        let token = erc20_token(1);

        strategy.apply(&store, &token, 1, &records).await.unwrap();
        assert_eq!(store.transfers.lock().unwrap().len(), 2);

        strategy.apply(&store, &token, 1, &records).await.unwrap();
        assert_eq!(store.transfers.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn recipient_matching_ignores_case() {
        let mut definition = indexer(IndexerKind::TransferIndexer, IndexerStrategy::Recipient);
        definition.strategy_params = json!({ "recipient": A.to_uppercase().replace("0X", "0x") });
        let strategy = TransferStrategy::from_indexer(&definition).unwrap();

        let store = MemoryPersistence::default();
        strategy
            .apply(&store, &erc20_token(1), 1, &[fungible(B, A, 1)])
            .await
            .unwrap();
        assert_eq!(store.transfers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sender_strategy_filters_on_sender() {
        let mut definition = indexer(IndexerKind::TransferIndexer, IndexerStrategy::Sender);
        definition.strategy_params = json!({ "sender": A });
        let strategy = TransferStrategy::from_indexer(&definition).unwrap();

        let store = MemoryPersistence::default();
        let records = vec![fungible(A, B, 1), fungible(B, A, 2)];
        strategy
            .apply(&store, &erc20_token(1), 1, &records)
            .await
            .unwrap();

        let stored = store.transfers.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender.to_lowercase(), A);
    }

    #[tokio::test]
    async fn token_scan_persists_everything() {
        let definition = indexer(IndexerKind::TransferIndexer, IndexerStrategy::TokenScan);
        let strategy = TransferStrategy::from_indexer(&definition).unwrap();

        let store = MemoryPersistence::default();
        let records = vec![fungible(A, B, 1), fungible(B, A, 2)];
        strategy
            .apply(&store, &erc20_token(1), 1, &records)
            .await
            .unwrap();
        assert_eq!(store.transfers.lock().unwrap().len(), 2);
    }

    #[test]
    fn missing_or_malformed_params_fail_construction() {
        let no_param = indexer(IndexerKind::TransferIndexer, IndexerStrategy::Recipient);
        assert!(matches!(
            TransferStrategy::from_indexer(&no_param),
            Err(TokenwatchError::Config(_))
        ));

        let mut malformed = indexer(IndexerKind::TransferIndexer, IndexerStrategy::Sender);
        malformed.strategy_params = json!({ "sender": "not-an-address" });
        assert!(matches!(
            TransferStrategy::from_indexer(&malformed),
            Err(TokenwatchError::Config(_))
        ));

        let mut empty_holders =
            indexer(IndexerKind::BalanceIndexer, IndexerStrategy::SpecifiedHolders);
        empty_holders.strategy_params = json!({ "holders": [] });
        assert!(matches!(
            BalanceStrategy::from_indexer(&empty_holders),
            Err(TokenwatchError::Config(_))
        ));

        let mut bad_holder =
            indexer(IndexerKind::BalanceIndexer, IndexerStrategy::SpecifiedHolders);
        bad_holder.strategy_params = json!({ "holders": [A, "0x123"] });
        assert!(matches!(
            BalanceStrategy::from_indexer(&bad_holder),
            Err(TokenwatchError::Config(_))
        ));
    }

    #[test]
    fn strategy_kind_mismatch_fails_construction() {
        let balance_as_transfer =
            indexer(IndexerKind::TransferIndexer, IndexerStrategy::SpecifiedHolders);
        assert!(matches!(
            TransferStrategy::from_indexer(&balance_as_transfer),
            Err(TokenwatchError::Config(_))
        ));

        let transfer_as_balance = indexer(IndexerKind::BalanceIndexer, IndexerStrategy::TokenScan);
        assert!(matches!(
            BalanceStrategy::from_indexer(&transfer_as_balance),
            Err(TokenwatchError::Config(_))
        ));
    }

    #[tokio::test]
    async fn participants_strategy_unions_senders_and_recipients() {
        let store = MemoryPersistence::default();
        let token = erc20_token(1);
        let strategy = TransferStrategy::TokenScan;
        strategy
            .apply(&store, &token, 1, &[fungible(A, B, 1), fungible(B, A, 2)])
            .await
            .unwrap();

        let definition = indexer(
            IndexerKind::BalanceIndexer,
            IndexerStrategy::TransfersParticipants,
        );
        let balance_strategy = BalanceStrategy::from_indexer(&definition).unwrap();
        let holders = balance_strategy.pick_holders(&store, &token).await.unwrap();

        assert_eq!(holders.len(), 2);
        assert!(holders.contains(&A.parse().unwrap()));
        assert!(holders.contains(&B.parse().unwrap()));
    }

    #[tokio::test]
    async fn specified_holders_returns_the_configured_list() {
        let mut definition =
            indexer(IndexerKind::BalanceIndexer, IndexerStrategy::SpecifiedHolders);
        definition.strategy_params = json!({ "holders": [A, B] });
        let strategy = BalanceStrategy::from_indexer(&definition).unwrap();

        let store = MemoryPersistence::default();
        let holders = strategy
            .pick_holders(&store, &erc20_token(1))
            .await
            .unwrap();
        assert_eq!(
            holders,
            vec![A.parse::<Address>().unwrap(), B.parse::<Address>().unwrap()]
        );
    }
}
