//! Balance callers: one per watched token, reconciling on-chain balances
//! with the stored ones. A caller never writes; it reads stored state through
//! the persistence port and returns the deltas the worker should apply.
//! Per-holder RPC failures are logged and yield an empty delta, so a flaky
//! node never causes partial writes.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use alloy::sol;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use tokenwatch_common::{Persistence, Token, TokenKind, TokenwatchError};

use crate::abis;
use crate::rpc::RpcClient;
use crate::transfer::u256_to_decimal;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
    }
}

sol! {
    #[sol(rpc)]
    interface IERC721 {
        function balanceOf(address owner) external view returns (uint256);
    }
}

sol! {
    #[sol(rpc)]
    interface IERC721Enumerable {
        function balanceOf(address owner) external view returns (uint256);
        function tokenOfOwnerByIndex(address owner, uint256 index) external view returns (uint256);
    }
}

/// A change to apply to stored balances.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceDelta {
    /// Upsert the single (holder, token) row to this amount.
    SetAmount { holder: Address, amount: BigDecimal },
    /// Create a (holder, token, token_id) row with a null amount.
    AddTokenId { holder: Address, token_id: BigDecimal },
    /// Delete the (holder, token, token_id) row.
    RemoveTokenId { holder: Address, token_id: BigDecimal },
}

#[async_trait]
pub trait BalanceCaller: Send + Sync {
    fn token(&self) -> &Token;

    /// Deltas to persist for one holder; empty when nothing changed or the
    /// holder could not be polled.
    async fn get_balance(&self, store: &dyn Persistence, holder: Address) -> Vec<BalanceDelta>;
}

/// Select the caller from the token kind. ERC-1155 and ERC-777 balance
/// tracking is not implemented; asking for it is a configuration error.
pub fn balance_caller_for(
    rpc: Arc<RpcClient>,
    token: Token,
) -> Result<Box<dyn BalanceCaller>, TokenwatchError> {
    token.validate()?;
    match token.kind {
        TokenKind::Native => Ok(Box::new(NativeBalanceCaller { rpc, token })),
        TokenKind::Erc20 => {
            let address = contract_address(&token)?;
            let abi = abis::balance_abi(token.kind)?;
            abis::require_functions(&abi, token.kind, &["balanceOf"])?;
            Ok(Box::new(Erc20BalanceCaller {
                rpc,
                token,
                address,
            }))
        }
        TokenKind::Erc721 => {
            let address = contract_address(&token)?;
            let abi = abis::balance_abi(token.kind)?;
            abis::require_functions(&abi, token.kind, &["balanceOf"])?;
            Ok(Box::new(Erc721BalanceCaller {
                rpc,
                token,
                address,
            }))
        }
        TokenKind::Erc721Enumerable => {
            let address = contract_address(&token)?;
            let abi = abis::balance_abi(token.kind)?;
            abis::require_functions(&abi, token.kind, &["balanceOf", "tokenOfOwnerByIndex"])?;
            Ok(Box::new(Erc721EnumerableBalanceCaller {
                rpc,
                token,
                address,
            }))
        }
        TokenKind::Erc1155 | TokenKind::Erc777 => Err(TokenwatchError::Config(format!(
            "balance tracking for {} tokens is not implemented",
            token.kind
        ))),
    }
}

fn contract_address(token: &Token) -> Result<Address, TokenwatchError> {
    let address = token.address.as_deref().ok_or_else(|| {
        TokenwatchError::Config(format!("token {} has no contract address", token.name))
    })?;
    Address::from_str(address).map_err(|_| {
        TokenwatchError::Config(format!(
            "token {} has a malformed contract address {address}",
            token.name
        ))
    })
}

/// Upsert-if-changed shared by the amount-shaped callers.
async fn amount_delta(
    store: &dyn Persistence,
    token: &Token,
    holder: Address,
    current: U256,
) -> Result<Vec<BalanceDelta>, TokenwatchError> {
    let current = u256_to_decimal(current);
    let stored = store.balance_amount(token.id, &holder.to_string()).await?;
    if stored.as_ref() == Some(&current) {
        tracing::debug!(%holder, token = %token.name, "balance remains the same");
        return Ok(vec![]);
    }
    tracing::info!(%holder, token = %token.name, %current, "balance changed");
    Ok(vec![BalanceDelta::SetAmount {
        holder,
        amount: current,
    }])
}

fn or_empty(
    result: Result<Vec<BalanceDelta>, TokenwatchError>,
    token: &Token,
    holder: Address,
) -> Vec<BalanceDelta> {
    match result {
        Ok(deltas) => deltas,
        Err(e) => {
            tracing::warn!(%holder, token = %token.name, "failed to fetch balance: {e}");
            vec![]
        }
    }
}

// =====================
// Callers
// =====================

pub struct NativeBalanceCaller {
    rpc: Arc<RpcClient>,
    token: Token,
}

#[async_trait]
impl BalanceCaller for NativeBalanceCaller {
    fn token(&self) -> &Token {
        &self.token
    }

    async fn get_balance(&self, store: &dyn Persistence, holder: Address) -> Vec<BalanceDelta> {
        let result = async {
            let current = self.rpc.balance(holder).await?;
            amount_delta(store, &self.token, holder, current).await
        }
        .await;
        or_empty(result, &self.token, holder)
    }
}

pub struct Erc20BalanceCaller {
    rpc: Arc<RpcClient>,
    token: Token,
    address: Address,
}

#[async_trait]
impl BalanceCaller for Erc20BalanceCaller {
    fn token(&self) -> &Token {
        &self.token
    }

    async fn get_balance(&self, store: &dyn Persistence, holder: Address) -> Vec<BalanceDelta> {
        let result = async {
            let contract = IERC20::new(self.address, self.rpc.provider());
            let current = contract
                .balanceOf(holder)
                .call()
                .await
                .map_err(|e| TokenwatchError::Rpc(e.to_string()))?;
            amount_delta(store, &self.token, holder, current).await
        }
        .await;
        or_empty(result, &self.token, holder)
    }
}

/// Count-based NFT balance: one row per (holder, token), the owned-token
/// count stored like a fungible amount.
pub struct Erc721BalanceCaller {
    rpc: Arc<RpcClient>,
    token: Token,
    address: Address,
}

#[async_trait]
impl BalanceCaller for Erc721BalanceCaller {
    fn token(&self) -> &Token {
        &self.token
    }

    async fn get_balance(&self, store: &dyn Persistence, holder: Address) -> Vec<BalanceDelta> {
        let result = async {
            let contract = IERC721::new(self.address, self.rpc.provider());
            let current = contract
                .balanceOf(holder)
                .call()
                .await
                .map_err(|e| TokenwatchError::Rpc(e.to_string()))?;
            amount_delta(store, &self.token, holder, current).await
        }
        .await;
        or_empty(result, &self.token, holder)
    }
}

/// Enumerable NFT balance: enumerate the holder's tokens on chain and diff
/// against the stored id set. Rows are only created and deleted, never
/// updated in place.
pub struct Erc721EnumerableBalanceCaller {
    rpc: Arc<RpcClient>,
    token: Token,
    address: Address,
}

impl Erc721EnumerableBalanceCaller {
    async fn reconcile(
        &self,
        store: &dyn Persistence,
        holder: Address,
    ) -> Result<Vec<BalanceDelta>, TokenwatchError> {
        let contract = IERC721Enumerable::new(self.address, self.rpc.provider());
        let count = contract
            .balanceOf(holder)
            .call()
            .await
            .map_err(|e| TokenwatchError::Rpc(e.to_string()))?;
        let count = usize::try_from(count)
            .map_err(|_| TokenwatchError::Decode(format!("absurd token count for {holder}")))?;

        let mut current = BTreeSet::new();
        for index in 0..count {
            let id = contract
                .tokenOfOwnerByIndex(holder, U256::from(index))
                .call()
                .await
                .map_err(|e| TokenwatchError::Rpc(e.to_string()))?;
            current.insert(id);
        }

        let mut stored = BTreeSet::new();
        for id in store.held_token_ids(self.token.id, &holder.to_string()).await? {
            let id = U256::from_str(&id.to_string()).map_err(|_| {
                TokenwatchError::Decode(format!("stored token id {id} is not a uint256"))
            })?;
            stored.insert(id);
        }

        let deltas = enumerable_diff(holder, &stored, &current);
        if deltas.is_empty() {
            tracing::debug!(%holder, token = %self.token.name, "owned token set remains the same");
        }
        Ok(deltas)
    }
}

#[async_trait]
impl BalanceCaller for Erc721EnumerableBalanceCaller {
    fn token(&self) -> &Token {
        &self.token
    }

    async fn get_balance(&self, store: &dyn Persistence, holder: Address) -> Vec<BalanceDelta> {
        or_empty(self.reconcile(store, holder).await, &self.token, holder)
    }
}

/// Set diff between stored and current owned-token ids: delete what left the
/// wallet, create what arrived, leave the intersection untouched.
pub(crate) fn enumerable_diff(
    holder: Address,
    stored: &BTreeSet<U256>,
    current: &BTreeSet<U256>,
) -> Vec<BalanceDelta> {
    let mut deltas = Vec::new();
    for id in stored.difference(current) {
        tracing::info!(%holder, token_id = %id, "token moved away from holder");
        deltas.push(BalanceDelta::RemoveTokenId {
            holder,
            token_id: u256_to_decimal(*id),
        });
    }
    for id in current.difference(stored) {
        tracing::info!(%holder, token_id = %id, "token given to holder");
        deltas.push(BalanceDelta::AddTokenId {
            holder,
            token_id: u256_to_decimal(*id),
        });
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{erc20_token, native_token, network, stub_rpc, MemoryPersistence};
    use serde_json::json;
    use tokenwatch_common::NetworkKind;
    use wiremock::MockServer;

    const HOLDER: &str = "0xc0904D38b1D6050f31Bcd34d571DEbE07ce83E8a";

    fn ids(values: &[u64]) -> BTreeSet<U256> {
        values.iter().map(|v| U256::from(*v)).collect()
    }

    #[test]
    fn reconciliation_diff_matches_on_chain_enumeration() {
        // Stored {1, 2, 3}, on-chain {2, 3, 5}: drop 1, add 5, leave the rest.
        let holder: Address = HOLDER.parse().unwrap();
        let deltas = enumerable_diff(holder, &ids(&[1, 2, 3]), &ids(&[2, 3, 5]));
        assert_eq!(
            deltas,
            vec![
                BalanceDelta::RemoveTokenId {
                    holder,
                    token_id: BigDecimal::from(1u64)
                },
                BalanceDelta::AddTokenId {
                    holder,
                    token_id: BigDecimal::from(5u64)
                },
            ]
        );
    }

    #[test]
    fn unchanged_enumeration_yields_no_deltas() {
        let holder: Address = HOLDER.parse().unwrap();
        assert!(enumerable_diff(holder, &ids(&[2, 3]), &ids(&[2, 3])).is_empty());
        assert!(enumerable_diff(holder, &ids(&[]), &ids(&[])).is_empty());
    }

    #[test]
    fn unsupported_kinds_are_config_errors() {
        let net = network("http://localhost:1", NetworkKind::Filterable);
        let rpc = Arc::new(RpcClient::new(&net).unwrap());
        let mut token = erc20_token(1);
        token.kind = TokenKind::Erc1155;
        assert!(matches!(
            balance_caller_for(rpc, token),
            Err(TokenwatchError::Config(_))
        ));
    }

    #[tokio::test]
    async fn native_caller_upserts_only_on_change() {
        let server = MockServer::start().await;
        stub_rpc(&server, "eth_getBalance", json!("0x64")).await;

        let net = network(&server.uri(), NetworkKind::Filterable);
        let rpc = Arc::new(RpcClient::new(&net).unwrap());
        let caller = balance_caller_for(rpc, native_token(5)).unwrap();
        let store = MemoryPersistence::default();
        let holder: Address = HOLDER.parse().unwrap();

        let deltas = caller.get_balance(&store, holder).await;
        assert_eq!(
            deltas,
            vec![BalanceDelta::SetAmount {
                holder,
                amount: BigDecimal::from(100u64)
            }]
        );

        // Same chain state already stored: idempotent, no delta.
        store
            .upsert_balance_amount(5, &holder.to_string(), &BigDecimal::from(100u64), 1)
            .await
            .unwrap();
        assert!(caller.get_balance(&store, holder).await.is_empty());
    }

    #[tokio::test]
    async fn erc20_caller_reads_balance_of() {
        let server = MockServer::start().await;
        stub_rpc(
            &server,
            "eth_call",
            json!("0x0000000000000000000000000000000000000000000000000000000000000190"),
        )
        .await;

        let net = network(&server.uri(), NetworkKind::Filterable);
        let rpc = Arc::new(RpcClient::new(&net).unwrap());
        let caller = balance_caller_for(rpc, erc20_token(2)).unwrap();
        let store = MemoryPersistence::default();
        let holder: Address = HOLDER.parse().unwrap();

        let deltas = caller.get_balance(&store, holder).await;
        assert_eq!(
            deltas,
            vec![BalanceDelta::SetAmount {
                holder,
                amount: BigDecimal::from(400u64)
            }]
        );
    }

    #[tokio::test]
    async fn rpc_failure_yields_an_empty_delta() {
        // Nothing listening on this port.
        let net = network("http://127.0.0.1:9", NetworkKind::Filterable);
        let rpc = Arc::new(RpcClient::new(&net).unwrap());
        let caller = balance_caller_for(rpc, native_token(5)).unwrap();
        let store = MemoryPersistence::default();

        let deltas = caller.get_balance(&store, HOLDER.parse().unwrap()).await;
        assert!(deltas.is_empty());
    }
}
